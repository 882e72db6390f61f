use crate::error::DispatchError;
use crate::exception::ErrorRenderer;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error carrying the HTTP status it should be answered with.
///
/// Stages return it through `anyhow` like any other error; the dispatcher
/// recognizes it and keeps its status.
#[derive(Debug, Clone, Error)]
#[error("{status}: {message}")]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }
}

/// Default renderer: a JSON body with `statusCode`, `message` and
/// `timestamp`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonErrorRenderer {
    /// Expose internal error messages instead of a generic one.
    pub debug: bool,
}

impl JsonErrorRenderer {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }
}

impl ErrorRenderer for JsonErrorRenderer {
    fn render_error(&self, error: &anyhow::Error) -> Response {
        if let Some(http) = error.downcast_ref::<HttpError>() {
            return self.render_status(http.status, &http.message);
        }

        if let Some(internal) = error.downcast_ref::<DispatchError>() {
            tracing::error!(error = %internal, "argument marshalling failed");
        } else {
            tracing::error!(error = %error, "unhandled error in route chain");
        }

        let message = if self.debug {
            format!("{error:#}")
        } else {
            "Internal Server Error".to_string()
        };
        self.render_status(StatusCode::INTERNAL_SERVER_ERROR, &message)
    }

    fn render_status(&self, status: StatusCode, message: &str) -> Response {
        (
            status,
            Json(json!({
                "statusCode": status.as_u16(),
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        )
            .into_response()
    }
}
