use crate::application::{AppInfo, DispatchState};
use crate::chain::{CompiledChain, compile_chain};
use crate::config::BindConfig;
use crate::error::{BindError, Result};
use crate::graph::{ProviderGraph, Source, SourceKind, StageNode, StaticSources, build_providers};
use crate::inject::{ArgName, ArgSet, NEXT, Signature, Stage, StageResult, Value, Values};
use crate::middleware::{
    Middleware, MiddlewareHandle, Phase, check_middleware, merge_middlewares,
};
use crate::render::{RenderFactory, noop_render};
use crate::routing::PathPattern;
use crate::server::HttpRequest;
use axum::http::Method;
use indexmap::IndexMap;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, LazyLock};
use strum::IntoEnumIterator;

/// How a route renders its endpoint's context.
#[derive(Clone, Default)]
pub enum RenderArg {
    /// Hand the context back unchanged.
    #[default]
    None,
    Stage(Stage),
    /// Resolved by the application's render factory at bind time.
    Named(String),
}

impl From<Stage> for RenderArg {
    fn from(stage: Stage) -> Self {
        RenderArg::Stage(stage)
    }
}

impl From<&str> for RenderArg {
    fn from(name: &str) -> Self {
        RenderArg::Named(name.to_string())
    }
}

impl fmt::Debug for RenderArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderArg::None => f.write_str("None"),
            RenderArg::Stage(stage) => f.debug_tuple("Stage").field(&stage.name()).finish(),
            RenderArg::Named(name) => f.debug_tuple("Named").field(name).finish(),
        }
    }
}

/// An unbound route definition. Binding never modifies it, so one route
/// can be bound into any number of applications.
#[derive(Clone)]
pub struct Route {
    pattern: String,
    endpoint: Stage,
    render: RenderArg,
    middlewares: Vec<MiddlewareHandle>,
    resources: Values,
    methods: Option<Vec<String>>,
}

impl Route {
    /// A route answering every method.
    pub fn new(pattern: impl Into<String>, endpoint: Stage) -> Self {
        Self {
            pattern: pattern.into(),
            endpoint,
            render: RenderArg::None,
            middlewares: Vec::new(),
            resources: Values::new(),
            methods: None,
        }
    }

    pub fn get(pattern: impl Into<String>, endpoint: Stage) -> Self {
        Self::new(pattern, endpoint).methods(["GET"])
    }

    pub fn post(pattern: impl Into<String>, endpoint: Stage) -> Self {
        Self::new(pattern, endpoint).methods(["POST"])
    }

    /// Restrict the route to `methods`. `GET` implies `HEAD`.
    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    pub fn render(mut self, render: impl Into<RenderArg>) -> Self {
        self.render = render.into();
        self
    }

    pub fn middleware<M: Middleware>(self, middleware: M) -> Self {
        self.middleware_handle(MiddlewareHandle::new(middleware))
    }

    pub fn middleware_handle(mut self, handle: MiddlewareHandle) -> Self {
        self.middlewares.push(handle);
        self
    }

    pub fn resource<T: Any + Send + Sync>(mut self, name: &str, value: T) -> Self {
        self.resources.insert(name, value);
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn endpoint(&self) -> &Stage {
        &self.endpoint
    }

    /// Copy of this route with its pattern under `prefix`.
    pub fn with_prefix(&self, prefix: &str) -> Route {
        Route {
            pattern: format!("{}{}", prefix.trim_end_matches('/'), self.pattern),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern)
            .field("endpoint", &self.endpoint.name())
            .field("render", &self.render)
            .field("middlewares", &self.middlewares)
            .field("resources", &self.resources)
            .field("methods", &self.methods)
            .finish()
    }
}

/// The `_route` builtin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub pattern: String,
    pub endpoint: String,
    /// Empty when the route answers every method.
    pub methods: Vec<Method>,
}

/// Everything an application contributes to a binding.
pub struct AppContext<'a> {
    pub config: &'a BindConfig,
    pub resources: &'a Values,
    pub middlewares: &'a [MiddlewareHandle],
    pub render_factory: Option<&'a RenderFactory>,
    pub info: AppInfo,
}

static NO_RESOURCES: LazyLock<Values> = LazyLock::new(Values::new);

impl<'a> AppContext<'a> {
    /// A context with no resources, middleware or render factory.
    pub fn new(config: &'a BindConfig) -> Self {
        Self {
            config,
            resources: &NO_RESOURCES,
            middlewares: &[],
            render_factory: None,
            info: AppInfo::default(),
        }
    }

    pub fn resources(mut self, resources: &'a Values) -> Self {
        self.resources = resources;
        self
    }

    pub fn middlewares(mut self, middlewares: &'a [MiddlewareHandle]) -> Self {
        self.middlewares = middlewares;
        self
    }

    pub fn render_factory(mut self, factory: Option<&'a RenderFactory>) -> Self {
        self.render_factory = factory;
        self
    }

    pub fn info(mut self, info: AppInfo) -> Self {
        self.info = info;
        self
    }
}

/// Where an endpoint argument comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgOrigin {
    pub kind: SourceKind,
    /// The providing middleware, for [`SourceKind::Middleware`].
    pub provider: Option<String>,
}

impl fmt::Display for ArgOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.provider {
            Some(name) => write!(f, "{}({name})", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl From<&Source> for ArgOrigin {
    fn from(source: &Source) -> Self {
        let provider = match source {
            Source::Middleware { name, .. } => Some(name.clone()),
            _ => None,
        };
        Self {
            kind: source.kind(),
            provider,
        }
    }
}

/// A route merged with an application's middleware, resources and render
/// factory, with its chain compiled.
#[derive(Clone)]
pub struct BoundRoute {
    route: Route,
    pattern: PathPattern,
    methods: Option<Vec<Method>>,
    middlewares: Vec<MiddlewareHandle>,
    resources: Values,
    render: Stage,
    chain: CompiledChain,
    graph: ProviderGraph,
    sources: IndexMap<ArgName, ArgOrigin>,
    info: Arc<RouteInfo>,
    app_value: Value,
}

fn is_standard_method(method: &Method) -> bool {
    [
        Method::GET,
        Method::HEAD,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::PATCH,
        Method::OPTIONS,
        Method::TRACE,
        Method::CONNECT,
    ]
    .contains(method)
}

fn parse_methods(raw: Option<&[String]>) -> Result<Option<Vec<Method>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let mut methods: Vec<Method> = Vec::with_capacity(raw.len() + 1);
    let mut invalid = Vec::new();
    for name in raw {
        match Method::from_bytes(name.to_ascii_uppercase().as_bytes()) {
            Ok(method) if is_standard_method(&method) => {
                if !methods.contains(&method) {
                    methods.push(method);
                }
            }
            _ => invalid.push(name.clone()),
        }
    }
    if !invalid.is_empty() {
        return Err(BindError::InvalidMethod { methods: invalid });
    }
    if methods.contains(&Method::GET) && !methods.contains(&Method::HEAD) {
        methods.push(Method::HEAD);
    }
    Ok(Some(methods))
}

struct OwnedNode {
    label: String,
    provider: Option<Source>,
    signature: Arc<Signature>,
    provides: Vec<ArgName>,
}

/// Bind `route` into an application.
///
/// Checks, in order: methods, pattern, render argument, middleware
/// uniqueness and shape, reserved names, provider conflicts, cycles,
/// transitive resolution, and finally compiles the chain. Nothing is
/// registered anywhere; the caller decides what to do with the result.
pub fn bind_route(route: &Route, ctx: &AppContext<'_>) -> Result<BoundRoute> {
    let config = ctx.config;
    let methods = parse_methods(route.methods.as_deref())?;
    let pattern = PathPattern::parse(&route.pattern, &config.converters)?;

    let render = match &route.render {
        RenderArg::None => noop_render(),
        RenderArg::Stage(stage) => stage.clone(),
        RenderArg::Named(name) => match ctx.render_factory {
            Some(factory) => factory(name.as_str())?,
            None => {
                return Err(BindError::InvalidRender {
                    name: name.clone(),
                    reason: "no render factory configured".to_string(),
                });
            }
        },
    };

    let middlewares = merge_middlewares(&route.middlewares, ctx.middlewares)?;
    for mw in &middlewares {
        check_middleware(mw)?;
    }

    let mut resources = ctx.resources.clone();
    resources.extend(route.resources.clone());

    let captures = pattern.capture_names();
    if let Some(name) = captures
        .iter()
        .chain(resources.names())
        .find(|name| config.is_reserved(name.as_str()))
    {
        return Err(BindError::reserved(route.pattern.clone(), name.clone()));
    }
    let statics = StaticSources {
        url: captures,
        builtins: config.builtins().iter().cloned().collect(),
        resources: resources.names().cloned().collect(),
    };

    let mut owned = Vec::new();
    for (index, mw) in middlewares.iter().enumerate() {
        for phase in Phase::iter() {
            let Some(stage) = mw.stage(phase) else {
                continue;
            };
            owned.push(OwnedNode {
                label: stage.name().to_string(),
                provider: Some(Source::Middleware {
                    name: mw.name().to_string(),
                    index,
                    phase,
                }),
                signature: config.signatures.inspect(stage)?,
                provides: mw
                    .meta()
                    .phase_provides(phase)
                    .iter()
                    .map(|n| ArgName::from(n.as_str()))
                    .collect(),
            });
        }
    }
    let endpoint_sig = config.signatures.inspect(&route.endpoint)?;
    for (stage, signature) in [
        (&route.endpoint, Arc::clone(&endpoint_sig)),
        (&render, config.signatures.inspect(&render)?),
    ] {
        owned.push(OwnedNode {
            label: stage.name().to_string(),
            provider: None,
            signature,
            provides: Vec::new(),
        });
    }
    let nodes: Vec<StageNode<'_>> = owned
        .iter()
        .map(|node| StageNode {
            label: node.label.clone(),
            provider: node.provider.clone(),
            signature: &node.signature,
            provides: &node.provides,
        })
        .collect();

    let graph = build_providers(&nodes, &statics)?;
    graph.check()?;

    let preprovided: ArgSet = statics.iter().map(|(_, name)| name.clone()).collect();
    let chain = compile_chain(
        &middlewares,
        &route.endpoint,
        &render,
        &preprovided,
        &config.signatures,
    )?;

    let sources: IndexMap<ArgName, ArgOrigin> = endpoint_sig
        .names()
        .iter()
        .filter(|n| *n != NEXT)
        .map(|name| {
            let origin = match graph.source_of(name.as_str()) {
                Some(source) => ArgOrigin::from(source),
                None => ArgOrigin {
                    kind: SourceKind::Default,
                    provider: None,
                },
            };
            (name.clone(), origin)
        })
        .collect();

    let info = Arc::new(RouteInfo {
        pattern: route.pattern.clone(),
        endpoint: route.endpoint.name().to_string(),
        methods: methods.clone().unwrap_or_default(),
    });

    tracing::debug!(
        pattern = %route.pattern,
        endpoint = route.endpoint.name(),
        middlewares = middlewares.len(),
        args = ?chain.args(),
        "compiled route"
    );

    Ok(BoundRoute {
        route: route.clone(),
        pattern,
        methods,
        middlewares,
        resources,
        render,
        chain,
        graph,
        sources,
        info,
        app_value: Arc::new(ctx.info.clone()),
    })
}

impl BoundRoute {
    /// The unbound definition this was built from.
    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn info(&self) -> &RouteInfo {
        &self.info
    }

    /// `None` when every method is accepted.
    pub fn methods(&self) -> Option<&[Method]> {
        self.methods.as_deref()
    }

    pub fn allows(&self, method: &Method) -> bool {
        self.methods.as_ref().is_none_or(|m| m.contains(method))
    }

    pub fn middlewares(&self) -> &[MiddlewareHandle] {
        &self.middlewares
    }

    pub fn resources(&self) -> &Values {
        &self.resources
    }

    pub fn render_stage(&self) -> &Stage {
        &self.render
    }

    pub fn chain(&self) -> &CompiledChain {
        &self.chain
    }

    pub fn graph(&self) -> &ProviderGraph {
        &self.graph
    }

    /// Where each endpoint argument comes from.
    pub fn sources(&self) -> &IndexMap<ArgName, ArgOrigin> {
        &self.sources
    }

    /// Human-readable summary of the route's arguments.
    pub fn describe(&self) -> String {
        let args: Vec<String> = self
            .sources
            .iter()
            .map(|(name, origin)| format!("{name} <- {origin}"))
            .collect();
        format!(
            "{} -> {} [{}]",
            self.pattern,
            self.route.endpoint.name(),
            args.join(", ")
        )
    }

    /// Match `path` against this route's pattern.
    pub fn match_path(&self, path: &str) -> Option<Values> {
        self.pattern.match_path(path)
    }

    /// Run the compiled chain for one request.
    pub fn execute(&self, request: HttpRequest, captures: Values) -> StageResult {
        self.execute_with(request, captures, DispatchState::default())
    }

    pub fn execute_with(
        &self,
        request: HttpRequest,
        captures: Values,
        state: DispatchState,
    ) -> StageResult {
        let route_value: Value = self.info.clone();
        let mut values = self.resources.clone();
        values.extend(captures);
        values
            .insert("request", request)
            .insert_value(ArgName::from("_route"), route_value)
            .insert_value(ArgName::from("_application"), Arc::clone(&self.app_value))
            .insert("_dispatch_state", state);
        self.chain.call(&values)
    }

    /// An unbound copy of this route under `prefix`, carrying this
    /// binding's effective middleware, merged resources and render stage.
    ///
    /// Binding the copy into another application layers that
    /// application's globals underneath: its middleware merges in front,
    /// and its resources only fill names this binding did not have.
    pub fn detach(&self, prefix: &str) -> Route {
        Route {
            middlewares: self.middlewares.clone(),
            resources: self.resources.clone(),
            render: RenderArg::Stage(self.render.clone()),
            ..self.route.with_prefix(prefix)
        }
    }

    /// Bind the same unbound route again, into another application.
    pub fn rebind(&self, ctx: &AppContext<'_>) -> Result<BoundRoute> {
        bind_route(&self.route, ctx)
    }
}

impl fmt::Debug for BoundRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundRoute")
            .field("pattern", &self.pattern)
            .field("methods", &self.methods)
            .field("middlewares", &self.middlewares)
            .field("chain", &self.chain)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::inject::{Args, Param, Reply};
    use crate::middleware::MiddlewareMeta;
    use axum::body::Bytes;
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(path: &str) -> HttpRequest {
        Request::builder().uri(path).body(Bytes::new()).unwrap()
    }

    fn hello() -> Stage {
        Stage::new("hello", [Param::required("name")], |args| {
            Ok(Reply::context(format!("Hello, {}!", args.get::<String>("name")?)))
        })
    }

    fn text_render(calls: Arc<AtomicUsize>) -> Stage {
        Stage::new("text_render", [Param::required("context")], move |args| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Reply::Response(args.get::<String>("context")?.clone().into_response()))
        })
    }

    async fn body_text(reply: Reply) -> String {
        let resp = reply.into_response().unwrap();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    struct Account;

    impl Middleware for Account {
        fn meta(&self) -> MiddlewareMeta {
            MiddlewareMeta::new("M1")
                .provides(["account"])
                .request_phase([Param::required("next"), Param::required("token")])
        }
    }

    struct SessionA;
    struct SessionB;

    impl Middleware for SessionA {
        fn meta(&self) -> MiddlewareMeta {
            MiddlewareMeta::new("SessionA")
                .provides(["session"])
                .request_phase([Param::required("next")])
        }
    }

    impl Middleware for SessionB {
        fn meta(&self) -> MiddlewareMeta {
            MiddlewareMeta::new("SessionB")
                .provides(["session"])
                .request_phase([Param::required("next")])
        }
    }

    struct ProvidesX;
    struct ProvidesY;

    impl Middleware for ProvidesX {
        fn meta(&self) -> MiddlewareMeta {
            MiddlewareMeta::new("A")
                .provides(["x"])
                .request_phase([Param::required("next"), Param::required("y")])
        }
    }

    impl Middleware for ProvidesY {
        fn meta(&self) -> MiddlewareMeta {
            MiddlewareMeta::new("B")
                .provides(["y"])
                .request_phase([Param::required("next"), Param::required("x")])
        }
    }

    /// Provides `greeting` from the `salutation` resource.
    struct Greeting;

    impl Middleware for Greeting {
        fn meta(&self) -> MiddlewareMeta {
            MiddlewareMeta::new("Greeting")
                .provides(["greeting"])
                .request_phase([Param::required("next"), Param::required("salutation")])
        }

        fn request(&self, args: Args<'_>) -> StageResult {
            let salutation = args.get::<&'static str>("salutation")?;
            args.next(Values::new().with("greeting", salutation.to_string()))
        }
    }

    /// Declares `account` and `page` but hands neither to `next`.
    struct Forgetful;

    impl Middleware for Forgetful {
        fn meta(&self) -> MiddlewareMeta {
            MiddlewareMeta::new("Forgetful")
                .provides(["account", "page"])
                .request_phase([Param::required("next")])
        }
    }

    #[test]
    fn test_declared_values_must_reach_next() {
        let config = BindConfig::new();
        let endpoint = Stage::new("list", [Param::optional("page", 1u32)], |args| {
            Ok(Reply::context(*args.get::<u32>("page")?))
        });
        let route = Route::new("/", endpoint).middleware(Forgetful);
        let bound = bind_route(&route, &AppContext::new(&config)).unwrap();

        let err = bound.execute(request("/"), Values::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DispatchError>(),
            Some(DispatchError::MissingProvided { stage, name })
                if stage == "Forgetful.request" && name == "account"
        ));
    }

    #[tokio::test]
    async fn test_url_capture_reaches_endpoint_and_render() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = BindConfig::new();
        let route = Route::get("/hello/{name}", hello()).render(text_render(Arc::clone(&calls)));
        let bound = bind_route(&route, &AppContext::new(&config)).unwrap();

        let captures = bound.match_path("/hello/Kurt").unwrap();
        let reply = bound.execute(request("/hello/Kurt"), captures).unwrap();
        assert_eq!(body_text(reply).await, "Hello, Kurt!");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bound.sources()["name"].to_string(), "url");
    }

    #[test]
    fn test_unprovided_token_is_unresolved() {
        let config = BindConfig::new();
        let route = Route::new("/", Stage::new("index", [], |_| Ok(Reply::context(()))))
            .middleware(Account);
        let err = bind_route(&route, &AppContext::new(&config)).unwrap_err();
        match err {
            BindError::UnresolvedArgument { stage, missing } => {
                assert_eq!(stage, "M1.request");
                assert_eq!(missing, vec![ArgName::from("token")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_two_session_providers_conflict() {
        let config = BindConfig::new();
        let route = Route::new("/", Stage::new("index", [], |_| Ok(Reply::context(()))))
            .middleware(SessionA)
            .middleware(SessionB);
        let err = bind_route(&route, &AppContext::new(&config)).unwrap_err();
        let BindError::ProviderConflict { conflicts } = err else {
            panic!("expected a provider conflict");
        };
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].name, "session");
        assert_eq!(conflicts[0].sources, vec!["SessionA", "SessionB"]);
    }

    #[test]
    fn test_mutual_requirements_are_a_cycle() {
        let config = BindConfig::new();
        let route = Route::new("/", Stage::new("index", [], |_| Ok(Reply::context(()))))
            .middleware(ProvidesX)
            .middleware(ProvidesY);
        let err = bind_route(&route, &AppContext::new(&config)).unwrap_err();
        match err {
            BindError::Cycle { path } => assert_eq!(path, vec!["x", "y", "x"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_response_from_endpoint_skips_render() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = BindConfig::new();
        let endpoint = Stage::new("created", [], |_| {
            Ok(Reply::Response(StatusCode::CREATED.into_response()))
        });
        let route = Route::post("/items", endpoint).render(text_render(Arc::clone(&calls)));
        let bound = bind_route(&route, &AppContext::new(&config)).unwrap();

        let reply = bound.execute(request("/items"), Values::new()).unwrap();
        assert_eq!(reply.into_response().unwrap().status(), StatusCode::CREATED);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_one_route_bound_into_two_applications() {
        let endpoint = Stage::new("greet", [Param::required("greeting")], |args| {
            Ok(Reply::context(args.get::<String>("greeting")?.clone()))
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let route = Route::get("/", endpoint).render(text_render(calls));

        let config_a = BindConfig::new();
        let config_b = BindConfig::new();
        let resources_a = Values::new().with("salutation", "hi");
        let resources_b = Values::new().with("greeting", "hello".to_string());
        let middlewares_a = vec![MiddlewareHandle::new(Greeting)];

        let ctx_a = AppContext::new(&config_a)
            .resources(&resources_a)
            .middlewares(&middlewares_a);
        let ctx_b = AppContext::new(&config_b).resources(&resources_b);
        let bound_a = bind_route(&route, &ctx_a).unwrap();
        let bound_b = bind_route(&route, &ctx_b).unwrap();

        assert_eq!(bound_a.sources()["greeting"].to_string(), "middleware(Greeting)");
        assert_eq!(bound_b.sources()["greeting"].to_string(), "resource");

        // rebinding the first application without its middleware fails,
        // and leaves the second application's chain untouched
        let bare_a = AppContext::new(&config_a).resources(&resources_a);
        assert!(bound_a.rebind(&bare_a).is_err());

        let reply = bound_b.execute(request("/"), Values::new()).unwrap();
        assert_eq!(body_text(reply).await, "hello");
        let reply = bound_a.execute(request("/"), Values::new()).unwrap();
        assert_eq!(body_text(reply).await, "hi");
        assert_eq!(route.pattern(), "/");
    }

    #[test]
    fn test_reserved_resource_name() {
        let config = BindConfig::new();
        let resources = Values::new().with("context", 1u8);
        let route = Route::new("/", Stage::new("index", [], |_| Ok(Reply::context(()))));
        let err = bind_route(&route, &AppContext::new(&config).resources(&resources)).unwrap_err();
        assert!(matches!(err, BindError::ReservedArgument { .. }));
    }

    #[test]
    fn test_resource_shadowing_builtin_conflicts() {
        let config = BindConfig::new();
        let resources = Values::new().with("request", 1u8);
        let route = Route::new("/", Stage::new("index", [], |_| Ok(Reply::context(()))));
        let err = bind_route(&route, &AppContext::new(&config).resources(&resources)).unwrap_err();
        assert!(matches!(err, BindError::ProviderConflict { .. }));
    }

    #[test]
    fn test_route_resource_beats_app_resource() {
        let config = BindConfig::new();
        let app_resources = Values::new().with("limit", 10u32);
        let endpoint = Stage::new("limit", [Param::required("limit")], |args| {
            Ok(Reply::context(*args.get::<u32>("limit")?))
        });
        let route = Route::new("/", endpoint).resource("limit", 5u32);
        let bound = bind_route(&route, &AppContext::new(&config).resources(&app_resources)).unwrap();
        let reply = bound.execute(request("/"), Values::new()).unwrap();
        assert_eq!(reply.context_ref::<u32>(), Some(&5));
    }

    #[test]
    fn test_methods_are_validated_and_get_implies_head() {
        let config = BindConfig::new();
        let bound = bind_route(&Route::get("/", hello_index()), &AppContext::new(&config)).unwrap();
        assert!(bound.allows(&Method::HEAD));
        assert!(!bound.allows(&Method::POST));

        let any = bind_route(&Route::new("/", hello_index()), &AppContext::new(&config)).unwrap();
        assert!(any.allows(&Method::DELETE));

        let err = bind_route(
            &Route::new("/", hello_index()).methods(["GET", "FETCH"]),
            &AppContext::new(&config),
        )
        .unwrap_err();
        assert!(matches!(err, BindError::InvalidMethod { ref methods } if methods == &["FETCH"]));
    }

    fn hello_index() -> Stage {
        Stage::new("index", [], |_| Ok(Reply::context(())))
    }

    #[test]
    fn test_named_render_needs_factory() {
        let config = BindConfig::new();
        let route = Route::new("/", hello_index()).render("json");
        assert!(matches!(
            bind_route(&route, &AppContext::new(&config)),
            Err(BindError::InvalidRender { .. })
        ));

        let factory = crate::render::JsonRender::factory();
        let ctx = AppContext::new(&config).render_factory(Some(&factory));
        let bound = bind_route(&route, &ctx).unwrap();
        assert_eq!(bound.render_stage().name(), "json");
    }

    #[test]
    fn test_sources_report_builtins_and_defaults() {
        let config = BindConfig::new();
        let endpoint = Stage::new(
            "show",
            [
                Param::required("request"),
                Param::required("id"),
                Param::optional("verbose", false),
            ],
            |_| Ok(Reply::context(())),
        );
        let bound = bind_route(&Route::new("/items/{id:int}", endpoint), &AppContext::new(&config)).unwrap();
        let described: Vec<String> = bound.sources().values().map(ToString::to_string).collect();
        assert_eq!(described, vec!["builtin", "url", "default"]);
        assert_eq!(
            bound.describe(),
            "/items/{id:int} -> show [request <- builtin, id <- url, verbose <- default]"
        );
    }

    #[test]
    fn test_builtins_reach_stages() {
        let config = BindConfig::new();
        let endpoint = Stage::new(
            "introspect",
            [Param::required("_route"), Param::required("request")],
            |args| {
                let route = args.get::<RouteInfo>("_route")?;
                let request = args.get::<HttpRequest>("request")?;
                Ok(Reply::context(format!("{} {}", route.pattern, request.uri())))
            },
        );
        let bound = bind_route(&Route::new("/x", endpoint), &AppContext::new(&config)).unwrap();
        let reply = bound.execute(request("/x?y=1"), Values::new()).unwrap();
        assert_eq!(reply.context_ref::<String>().map(String::as_str), Some("/x /x?y=1"));
    }
}
