use axum::http::StatusCode;
use thiserror::Error;

/// Errors surfaced by the relay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration loading or validation failed
    #[error("configuration error: {0}")]
    Config(String),

    /// Caller credentials rejected before the relay core runs
    #[error("authentication error: {0}")]
    Auth(String),

    /// Request is structurally unusable (e.g. no user message)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Requested model id is not in the catalog
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Backend did not yield a usable chat id
    #[error("session resolution failed: {0}")]
    SessionResolution(String),

    /// Backend stream violated the line protocol
    #[error("transcode error: {0}")]
    Transcode(String),

    /// Network failure talking to the backend
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a session resolution error
    pub fn session<S: Into<String>>(msg: S) -> Self {
        Self::SessionResolution(msg.into())
    }

    /// Create a transcode error
    pub fn transcode<S: Into<String>>(msg: S) -> Self {
        Self::Transcode(msg.into())
    }

    /// Create a backend unavailability error
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// HTTP status this error maps to at the OpenAI-facing boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ModelNotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionResolution(_) => StatusCode::BAD_GATEWAY,
            Self::Transcode(_) => StatusCode::BAD_GATEWAY,
            Self::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::Config(_) => "server_error",
            Self::Auth(_) => "auth_error",
            Self::InvalidRequest(_) | Self::ModelNotFound(_) => "invalid_request_error",
            Self::SessionResolution(_) | Self::Transcode(_) | Self::BackendUnavailable(_) => {
                "upstream_error"
            }
        }
    }

    /// Status plus OpenAI-style error body, for handler error returns.
    pub fn into_response_parts(self) -> (StatusCode, String) {
        let status = self.status_code();
        (status, error_body(&self.to_string(), self.error_type()))
    }
}

/// OpenAI-style `{"error": {...}}` JSON body.
pub fn error_body(message: &str, error_type: &str) -> String {
    serde_json::json!({
        "error": {
            "message": message,
            "type": error_type,
        }
    })
    .to_string()
}
