//! Error types for the jina-gateway crate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Error returned when no healthy proxy is available in the pool.
#[derive(Debug, Error)]
#[error("No proxy available in pool")]
pub struct NoProxyAvailable;

/// Errors surfaced by the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Rate limit exceeded, try again later")]
    RateLimited,

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest_middleware::Error),

    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Config(_)
            | GatewayError::Upstream(_)
            | GatewayError::InvalidUrl(_)
            | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        (self.status_code(), Json(body)).into_response()
    }
}
