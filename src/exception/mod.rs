use axum::http::StatusCode;
use axum::response::Response;

pub mod http;

pub use http::{HttpError, JsonErrorRenderer};

/// Turns request-time failures into responses.
///
/// The dispatcher hands every error escaping a route's chain, and its own
/// 404/405 outcomes, to the application's renderer.
pub trait ErrorRenderer: Send + Sync + 'static {
    /// Render a stage error that escaped the chain.
    fn render_error(&self, error: &anyhow::Error) -> Response;

    /// Render a status produced by the dispatcher itself.
    fn render_status(&self, status: StatusCode, message: &str) -> Response;
}
