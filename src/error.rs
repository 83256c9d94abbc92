//! Error types for the relay service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

use crate::store::StoreError;

/// Result type alias using the relay error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the relay.
///
/// Every failure is terminal for the current request and converted to an
/// HTTP status at the route boundary; nothing is retried and no store
/// mutation is rolled back.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input or request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Per-address rate limit exceeded (gate 1)
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Per-context request ceiling exceeded (gate 2)
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Shared store unreachable or failing
    #[error("Store unavailable: {0}")]
    Store(#[from] StoreError),

    /// LLM backend non-2xx or transport failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this is a rate limit error (either gate).
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::QuotaExceeded(_))
    }

    /// Get the HTTP status code for this error.
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited(_) | Self::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Backend(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Store(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = self.to_string();
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}
