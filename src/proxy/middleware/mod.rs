// Middleware module - Axum request guards

pub mod auth;

pub use auth::client_auth_middleware;
