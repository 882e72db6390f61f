//! # Weft
//!
//! A request-dispatch framework where every stage declares the arguments it
//! needs by name.
//!
//! Endpoints, middleware phases and render stages are [`Stage`]s: a function
//! plus the parameter names it accepts. When a route is bound into an
//! [`Application`], Weft works out where every argument comes from (URL
//! captures, builtins, resources, middleware-provided values or parameter
//! defaults), rejects routes with conflicting, circular or missing
//! providers, and compiles the route's middleware into a single chain.
//! Every error surfaces at bind time rather than on the first request.
//!
//! ## Features
//!
//! - **Declared-argument injection**: stages receive only the names they declare
//! - **Three-phase middleware**: request, endpoint and render phases, each able to provide values downstream
//! - **Bind-time checks**: provider conflicts, cycles and unresolved arguments are reported with the stage that needs them
//! - **Typed path patterns**: `{id:int}`, optional and multi-segment tail captures, per-application converters
//! - **Axum integration**: serve an application directly or mount it as a tower service
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use weft::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let hello = Stage::new(
//!         "hello",
//!         [Param::required("name"), Param::required("request_id")],
//!         |args| {
//!             let name = args.get::<String>("name")?;
//!             let request_id = args.get::<String>("request_id")?;
//!             Ok(Reply::context(json!({ "hello": name, "request": request_id })))
//!         },
//!     );
//!
//!     let app = Application::builder()
//!         .name("greeter")
//!         .middleware(LoggingMiddleware)
//!         .render_factory(JsonRender::factory())
//!         .route(Route::get("/hello/{name}", hello).render("json"))
//!         .build()?;
//!
//!     weft::server::serve(app, &ServerConfig::from_env()).await?;
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod chain;
pub mod config;
pub mod error;
pub mod exception;
pub mod graph;
pub mod inject;
pub mod middleware;
pub mod render;
pub mod routing;
pub mod server;

// Re-export core types
pub use application::{AppInfo, Application, ApplicationBuilder, DispatchState};
pub use config::{BindConfig, ConfigService, ServerConfig};
pub use error::{BindError, DispatchError, Result};
pub use exception::{ErrorRenderer, HttpError, JsonErrorRenderer};
pub use inject::{Args, Next, Param, Reply, Stage, StageResult, Value, Values};
pub use middleware::{Middleware, MiddlewareHandle, MiddlewareMeta, Phase};
pub use routing::{BoundRoute, Route, RouteInfo};

// Re-export commonly used types from dependencies
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use weft::prelude::*;
/// ```
pub mod prelude {
    pub use crate::application::{AppInfo, Application, ApplicationBuilder, DispatchState};
    pub use crate::config::{ConfigService, ServerConfig};
    pub use crate::error::{BindError, DispatchError, Result};
    pub use crate::exception::{ErrorRenderer, HttpError, JsonErrorRenderer};
    pub use crate::inject::{Args, Next, Param, Reply, Stage, StageResult, Value, Values, value};
    pub use crate::middleware::builtins::{ContextProcessor, LoggingMiddleware, QueryParams};
    pub use crate::middleware::{Middleware, MiddlewareHandle, MiddlewareMeta, Phase};
    pub use crate::render::{JsonRender, RenderFactory, noop_render};
    pub use crate::routing::{RenderArg, Route, RouteInfo};
    pub use crate::server::{HttpRequest, serve};
    pub use axum::{
        http::{Method, StatusCode},
        response::{IntoResponse, Response},
    };
    pub use serde_json::json;
    pub use std::sync::Arc;
}
