use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the mux and its facades.
///
/// Contract violations (an empty key list handed to a fallback lookup) are
/// not represented here: they panic at the call site because they can only
/// come from a programming mistake, never from client input.
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("Route registration failed: {0}")]
    Route(#[from] matchit::InsertError),

    #[error("Request body too large: limit is {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Failed to read request body: {0}")]
    Body(String),

    #[error("Malformed form data: {0}")]
    Form(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl MuxError {
    /// HTTP status used when this error is turned into a response.
    pub fn status(&self) -> StatusCode {
        match self {
            MuxError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            MuxError::Body(_) | MuxError::Form(_) => StatusCode::BAD_REQUEST,
            MuxError::Route(_)
            | MuxError::Serialization(_)
            | MuxError::Io(_)
            | MuxError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error body written by [`ResponseWriter::error`](crate::ResponseWriter::error)
/// and the default not-found handler.
///
/// Wire format: `{"error": "<message text>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

impl IntoResponse for MuxError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Rejected request");
        }

        (status, axum::Json(ApiError::new(self.to_string()))).into_response()
    }
}

/// Convenience type alias for Results with MuxError.
pub type MuxResult<T> = Result<T, MuxError>;
