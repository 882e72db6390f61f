//! Applications and request dispatch
//!
//! An [`Application`] owns global resources and middleware, a render
//! factory and its bound routes. Routes are bound eagerly when added; a
//! route that fails to bind leaves the application as it was.

use crate::config::{BindConfig, ServerConfig};
use crate::error::Result;
use crate::exception::{ErrorRenderer, JsonErrorRenderer};
use crate::inject::{Reply, StageResult, Values};
use crate::middleware::{Middleware, MiddlewareHandle};
use crate::render::RenderFactory;
use crate::routing::{AppContext, BoundRoute, ConverterRegistry, Route, bind_route};
use crate::server::HttpRequest;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::Response;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// The `_application` builtin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppInfo {
    pub name: String,
    pub debug: bool,
}

/// The `_dispatch_state` builtin: what the dispatcher saw while matching.
#[derive(Debug, Clone, Default)]
pub struct DispatchState {
    pub path: String,
    pub method: Option<Method>,
    /// Methods of earlier routes whose pattern matched but whose method
    /// did not.
    pub allowed: Vec<Method>,
}

impl DispatchState {
    fn note_allowed(&mut self, methods: &[Method]) {
        for method in methods {
            if !self.allowed.contains(method) {
                self.allowed.push(method.clone());
            }
        }
    }
}

#[derive(Clone)]
struct AppState {
    info: AppInfo,
    resources: Values,
    middlewares: Vec<MiddlewareHandle>,
    render_factory: Option<RenderFactory>,
    error_renderer: Arc<dyn ErrorRenderer>,
    config: Arc<BindConfig>,
    routes: Vec<BoundRoute>,
}

impl AppState {
    fn context(&self) -> AppContext<'_> {
        AppContext::new(&self.config)
            .resources(&self.resources)
            .middlewares(&self.middlewares)
            .render_factory(self.render_factory.as_ref())
            .info(self.info.clone())
    }

    fn bind_all<'r>(&self, routes: impl IntoIterator<Item = &'r Route>) -> Result<Vec<BoundRoute>> {
        let ctx = self.context();
        routes.into_iter().map(|route| bind_route(route, &ctx)).collect()
    }
}

/// A set of bound routes plus the globals they were bound with.
///
/// Cloning is cheap; clones share the same immutable snapshot until one
/// of them changes its routes.
#[derive(Clone)]
pub struct Application {
    inner: Arc<AppState>,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Bind and append `route`.
    pub fn add(&mut self, route: Route) -> Result<()> {
        self.add_all(std::iter::once(&route))
    }

    /// Bind every route, then append them all. Nothing is added if any
    /// route fails to bind.
    pub fn add_all<'r>(&mut self, routes: impl IntoIterator<Item = &'r Route>) -> Result<()> {
        let bound = self.inner.bind_all(routes)?;
        let mut state = (*self.inner).clone();
        state.routes.extend(bound);
        self.inner = Arc::new(state);
        Ok(())
    }

    /// Add every route of `other` under `prefix`.
    ///
    /// Mounted routes keep the middleware, resources and render stage they
    /// were bound with in `other`; this application's globals are merged
    /// around them.
    pub fn mount(&mut self, prefix: &str, other: &Application) -> Result<()> {
        let routes: Vec<Route> = other
            .routes()
            .iter()
            .map(|bound| bound.detach(prefix))
            .collect();
        self.add_all(&routes)
    }

    /// A new application with `middlewares` as its global middleware and
    /// every route rebound. `self` is unaffected.
    pub fn with_middlewares(&self, middlewares: Vec<MiddlewareHandle>) -> Result<Application> {
        let mut state = (*self.inner).clone();
        state.middlewares = middlewares;
        state.routes = state.bind_all(self.routes().iter().map(BoundRoute::route))?;
        Ok(Application {
            inner: Arc::new(state),
        })
    }

    pub fn routes(&self) -> &[BoundRoute] {
        &self.inner.routes
    }

    pub fn info(&self) -> &AppInfo {
        &self.inner.info
    }

    pub fn resources(&self) -> &Values {
        &self.inner.resources
    }

    pub fn middlewares(&self) -> &[MiddlewareHandle] {
        &self.inner.middlewares
    }

    pub fn bind_config(&self) -> &BindConfig {
        &self.inner.config
    }

    pub fn error_renderer(&self) -> &dyn ErrorRenderer {
        self.inner.error_renderer.as_ref()
    }

    /// Route one request.
    ///
    /// The first route whose pattern and method both match handles it.
    /// When only methods mismatched the answer is `405` with `Allow`,
    /// otherwise `404`.
    pub fn dispatch(&self, request: HttpRequest) -> Response {
        let path = request.uri().path().to_string();
        let method = request.method().clone();
        let mut state = DispatchState {
            path: path.clone(),
            method: Some(method.clone()),
            allowed: Vec::new(),
        };

        for route in self.routes() {
            let Some(captures) = route.match_path(&path) else {
                continue;
            };
            if !route.allows(&method) {
                state.note_allowed(route.methods().unwrap_or_default());
                continue;
            }
            tracing::trace!(pattern = %route.pattern(), %method, %path, "matched route");
            let result = route.execute_with(request, captures, state);
            return self.finish(result);
        }

        let renderer = self.error_renderer();
        if state.allowed.is_empty() {
            return renderer.render_status(StatusCode::NOT_FOUND, "Not Found");
        }
        let allow = state
            .allowed
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let mut resp = renderer.render_status(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        if let Ok(value) = HeaderValue::from_str(&allow) {
            resp.headers_mut().insert(header::ALLOW, value);
        }
        resp
    }

    fn finish(&self, result: StageResult) -> Response {
        match result {
            Ok(Reply::Response(resp)) => resp,
            Ok(Reply::Context(_)) => {
                tracing::error!("route chain finished without producing a response");
                self.error_renderer()
                    .render_status(StatusCode::INTERNAL_SERVER_ERROR, "expected Response")
            }
            Err(err) => self.error_renderer().render_error(&err),
        }
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("info", &self.inner.info)
            .field("resources", &self.inner.resources)
            .field("middlewares", &self.inner.middlewares)
            .field("routes", &self.inner.routes)
            .finish()
    }
}

/// Builder for [`Application`]
///
/// # Example
///
/// ```rust,ignore
/// use weft::prelude::*;
///
/// let app = Application::builder()
///     .name("demo")
///     .resource("greeting", "Hello")
///     .middleware(LoggingMiddleware)
///     .render_factory(JsonRender::factory())
///     .route(Route::get("/hello/{name}", hello).render("json"))
///     .build()?;
/// ```
pub struct ApplicationBuilder {
    info: AppInfo,
    resources: Values,
    middlewares: Vec<MiddlewareHandle>,
    render_factory: Option<RenderFactory>,
    error_renderer: Option<Arc<dyn ErrorRenderer>>,
    converters: ConverterRegistry,
    routes: Vec<Route>,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationBuilder {
    pub fn new() -> Self {
        Self {
            info: AppInfo::default(),
            resources: Values::new(),
            middlewares: Vec::new(),
            render_factory: None,
            error_renderer: None,
            converters: ConverterRegistry::default(),
            routes: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.info.name = name.into();
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.info.debug = debug;
        self
    }

    /// Take the debug flag from a server configuration.
    pub fn server_config(self, config: &ServerConfig) -> Self {
        self.debug(config.debug)
    }

    pub fn resource<T: Any + Send + Sync>(mut self, name: &str, value: T) -> Self {
        self.resources.insert(name, value);
        self
    }

    pub fn middleware<M: Middleware>(self, middleware: M) -> Self {
        self.middleware_handle(MiddlewareHandle::new(middleware))
    }

    pub fn middleware_handle(mut self, handle: MiddlewareHandle) -> Self {
        self.middlewares.push(handle);
        self
    }

    pub fn render_factory(mut self, factory: RenderFactory) -> Self {
        self.render_factory = Some(factory);
        self
    }

    pub fn error_renderer<R: ErrorRenderer>(mut self, renderer: R) -> Self {
        self.error_renderer = Some(Arc::new(renderer));
        self
    }

    /// Register a path converter for this application only.
    pub fn converter<T, F>(mut self, name: &str, parse: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&str) -> Option<T> + Send + Sync + 'static,
    {
        self.converters.register(name, parse);
        self
    }

    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Bind every route. The first binding error aborts the build.
    pub fn build(self) -> Result<Application> {
        let debug = self.info.debug;
        let mut state = AppState {
            info: self.info,
            resources: self.resources,
            middlewares: self.middlewares,
            render_factory: self.render_factory,
            error_renderer: match self.error_renderer {
                Some(renderer) => renderer,
                None => Arc::new(JsonErrorRenderer::new(debug)),
            },
            config: Arc::new(BindConfig::with_converters(self.converters)),
            routes: Vec::new(),
        };
        state.routes = state.bind_all(&self.routes)?;

        tracing::info!(
            name = %state.info.name,
            routes = state.routes.len(),
            middlewares = state.middlewares.len(),
            "application built"
        );
        Ok(Application {
            inner: Arc::new(state),
        })
    }
}
