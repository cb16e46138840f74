pub mod catalog;
pub mod config;
pub mod credentials;
pub mod logger;
