//! HTTP transport adapter
//!
//! Bridges axum/tower to [`Application::dispatch`]: the request body is
//! collected into [`Bytes`] so the `request` builtin can be shared by any
//! number of stages.

use crate::application::Application;
use crate::config::ServerConfig;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::net::TcpListener;
use tokio::signal;
use tower::Service;

/// The `request` builtin.
pub type HttpRequest = Request<Bytes>;

/// Default cap on collected request bodies.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Tower service dispatching every request to an [`Application`].
#[derive(Clone)]
pub struct AppService {
    app: Application,
    body_limit: usize,
}

impl AppService {
    pub fn new(app: Application) -> Self {
        Self {
            app,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}

impl Service<Request<Body>> for AppService {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let app = self.app.clone();
        let limit = self.body_limit;

        Box::pin(async move {
            let (parts, body) = request.into_parts();
            let bytes = match axum::body::to_bytes(body, limit).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(error = %e, uri = %parts.uri, "failed to read request body");
                    return Ok(app
                        .error_renderer()
                        .render_status(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large"));
                }
            };
            Ok(app.dispatch(Request::from_parts(parts, bytes)))
        })
    }
}

impl Application {
    pub fn into_service(self) -> AppService {
        AppService::new(self)
    }

    /// An axum router sending every request to this application.
    pub fn into_router(self) -> Router {
        Router::new().fallback_service(self.into_service())
    }
}

/// Bind to the configured address and serve until Ctrl+C or SIGTERM.
pub async fn serve(app: Application, config: &ServerConfig) -> std::io::Result<()> {
    let listener = TcpListener::bind(config.addr()).await?;
    serve_listener(app, listener).await
}

pub async fn serve_listener(app: Application, listener: TcpListener) -> std::io::Result<()> {
    tracing::info!(
        addr = ?listener.local_addr().ok(),
        name = %app.info().name,
        routes = app.routes().len(),
        "server listening"
    );
    axum::serve(listener, app.into_router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

/// Completes when the process receives Ctrl+C or SIGTERM.
///
/// A signal handler that cannot be installed never fires.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
