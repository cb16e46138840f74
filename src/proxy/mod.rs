// proxy module - OpenAI-compatible relay service

pub mod config;
pub mod conversation_cache;
pub mod error;
pub mod fingerprint;
pub mod server;
pub mod session;
pub mod token_pool;

pub mod handlers;   // API endpoint handlers
pub mod mappers;    // Protocol converters
pub mod middleware; // Axum middleware
pub mod upstream;   // Backend client

pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use server::AxumServer;
