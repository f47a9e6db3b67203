//! Proxy-level error handling
//!
//! Only genuine proxy faults surface here: a missing credential or a
//! connection-level upstream failure. An upstream non-success status is
//! not an error - the handlers pass it through, body and all. Capture-path
//! failures never reach this type; they are logged at their origin and
//! swallowed.

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use thiserror::Error;

/// Errors that produce the caller-visible `proxy_error` envelope
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    /// No upstream credential available for this request
    #[error("No upstream API key available: set proxy.api_key or the {0} environment variable")]
    Credential(String),

    /// Connection-level upstream failure (connect, timeout, aborted body)
    #[error("Upstream request failed: {0}")]
    Network(String),

    /// The inbound request could not be relayed
    #[error("Invalid request: {0}")]
    Request(String),
}

impl ProxyError {
    /// Render the minimal JSON error envelope with HTTP 500
    pub fn into_response(self) -> Response<Body> {
        let body = serde_json::json!({
            "error": {
                "type": "proxy_error",
                "message": self.to_string(),
            }
        });

        Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| {
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::empty())
                    .unwrap()
            })
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        self.into_response()
    }
}
