//! Client API key authentication middleware
//!
//! Guards the OpenAI-compatible endpoints with the configured client keys.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::proxy::error::error_body;
use crate::proxy::server::AppState;

/// Pull the bearer token out of the Authorization header.
fn extract_bearer_token(request: &Request) -> Option<&str> {
    let value = request.headers().get(header::AUTHORIZATION)?;
    let value = value.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::trim)
}

pub async fn client_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.client_keys.is_empty() {
        tracing::warn!("Rejecting request: no client API keys configured");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "application/json")],
            error_body(
                "service unavailable: no client API keys configured",
                "server_error",
            ),
        )
            .into_response();
    }

    match extract_bearer_token(&request) {
        None => {
            tracing::debug!(
                "Rejecting request without bearer token for {}",
                request.uri().path()
            );
            (
                StatusCode::UNAUTHORIZED,
                [(header::CONTENT_TYPE, "application/json")],
                error_body("missing API key", "auth_error"),
            )
                .into_response()
        }
        Some(token) if !state.client_keys.contains(token) => {
            tracing::debug!(
                "Rejecting request with unknown API key for {}",
                request.uri().path()
            );
            (
                StatusCode::FORBIDDEN,
                [(header::CONTENT_TYPE, "application/json")],
                error_body("invalid API key", "auth_error"),
            )
                .into_response()
        }
        Some(_) => next.run(request).await,
    }
}
