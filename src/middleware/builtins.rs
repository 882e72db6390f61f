use crate::error::{BindError, Result};
use crate::inject::{ArgName, Args, NEXT, Param, Reply, StageResult, Value, Values};
use crate::middleware::{CONTEXT, Middleware, MiddlewareMeta};
use crate::routing::RouteInfo;
use crate::server::HttpRequest;
use axum::extract::Query;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

/// Logs request timing and outcome, and provides a fresh `request_id`.
#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn meta(&self) -> MiddlewareMeta {
        MiddlewareMeta::new("LoggingMiddleware")
            .provides(["request_id"])
            .request_phase([
                Param::required("next"),
                Param::required("request"),
                Param::required("_route"),
            ])
    }

    fn request(&self, args: Args<'_>) -> StageResult {
        let request = args.get::<HttpRequest>("request")?;
        let route = args.get::<RouteInfo>("_route")?;
        let method = request.method().clone();
        let uri = request.uri().clone();
        let request_id = Uuid::new_v4().to_string();
        let start = Instant::now();

        tracing::info!(%request_id, pattern = %route.pattern, "--> {} {}", method, uri);

        match args.next(Values::new().with("request_id", request_id.clone())) {
            Ok(reply) => {
                let elapsed = start.elapsed();
                match &reply {
                    Reply::Response(resp) => tracing::info!(
                        %request_id,
                        status = resp.status().as_u16(),
                        "<-- {} {} {:?}", method, uri, elapsed
                    ),
                    Reply::Context(_) => {
                        tracing::info!(%request_id, "<-- {} {} (unrendered) {:?}", method, uri, elapsed)
                    }
                }
                Ok(reply)
            }
            Err(e) => {
                tracing::warn!(%request_id, error = %e, "<-- {} {} ERROR {:?}", method, uri, start.elapsed());
                Err(e)
            }
        }
    }
}

/// Provides selected query-string parameters as `Option<String>` values,
/// one per name.
#[derive(Debug, Clone)]
pub struct QueryParams {
    params: Vec<String>,
}

impl QueryParams {
    pub fn new<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
        }
    }
}

impl Middleware for QueryParams {
    fn meta(&self) -> MiddlewareMeta {
        MiddlewareMeta::new("QueryParams")
            .provides(self.params.clone())
            .unique(false)
            .request_phase([Param::required("next"), Param::required("request")])
    }

    fn request(&self, args: Args<'_>) -> StageResult {
        let request = args.get::<HttpRequest>("request")?;
        let query = match Query::<HashMap<String, String>>::try_from_uri(request.uri()) {
            Ok(Query(query)) => query,
            Err(rejection) => {
                tracing::debug!(error = %rejection, "unparseable query string");
                HashMap::new()
            }
        };

        let mut provided = Values::new();
        for name in &self.params {
            provided.insert(name, query.get(name).cloned());
        }
        args.next(provided)
    }
}

/// Fills named values into object contexts before they are rendered.
///
/// Required names must be provided by the route, defaulted ones fall back
/// to their default. Keys already in the context are kept unless
/// [`ContextProcessor::overwrite`] is set. Contexts that are not
/// `serde_json::Value` objects pass through untouched.
#[derive(Debug, Clone)]
pub struct ContextProcessor {
    required: Vec<String>,
    defaults: Vec<(String, JsonValue)>,
    overwrite: bool,
}

impl ContextProcessor {
    const NAME: &'static str = "ContextProcessor";

    pub fn new<R, D, S, T>(required: R, defaults: D) -> Result<Self>
    where
        R: IntoIterator<Item = S>,
        D: IntoIterator<Item = (T, JsonValue)>,
        S: Into<String>,
        T: Into<String>,
    {
        let required: Vec<String> = required.into_iter().map(Into::into).collect();
        let defaults: Vec<(String, JsonValue)> = defaults
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .collect();

        for name in required.iter().chain(defaults.iter().map(|(name, _)| name)) {
            if name == NEXT || name == CONTEXT {
                return Err(BindError::reserved(Self::NAME, ArgName::from(name.as_str())));
            }
            if !ArgName::is_valid(name) {
                return Err(BindError::InvalidArgName { name: name.clone() });
            }
        }
        if let Some(name) = required
            .iter()
            .find(|name| defaults.iter().any(|(d, _)| d == *name))
        {
            return Err(BindError::invalid_middleware(
                Self::NAME,
                format!("'{name}' is both required and defaulted"),
            ));
        }

        Ok(Self {
            required,
            defaults,
            overwrite: false,
        })
    }

    /// Every name optional, defaulting to `null`.
    pub fn simple<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            std::iter::empty::<String>(),
            names.into_iter().map(|name| (name, JsonValue::Null)),
        )
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.required
            .iter()
            .map(String::as_str)
            .chain(self.defaults.iter().map(|(name, _)| name.as_str()))
    }
}

fn to_json(value: &Value) -> Option<JsonValue> {
    macro_rules! try_as {
        ($($ty:ty),*) => {
            $(
                if let Some(v) = value.downcast_ref::<$ty>() {
                    return Some(JsonValue::from(v.clone()));
                }
            )*
        };
    }
    try_as!(JsonValue, String, &'static str, Option<String>, bool, i64, i32, u64, u32, f64);
    None
}

impl Middleware for ContextProcessor {
    fn meta(&self) -> MiddlewareMeta {
        let params = [Param::required(NEXT), Param::required(CONTEXT)]
            .into_iter()
            .chain(self.required.iter().map(|name| Param::required(name.as_str())))
            .chain(
                self.defaults
                    .iter()
                    .map(|(name, default)| Param::optional(name.as_str(), default.clone())),
            );
        MiddlewareMeta::new(Self::NAME).render_phase(params)
    }

    fn render(&self, args: Args<'_>) -> StageResult {
        let fields = match args.value(CONTEXT).and_then(|v| v.downcast_ref::<JsonValue>()) {
            Some(JsonValue::Object(fields)) => fields,
            _ => return args.next(Values::new()),
        };

        let mut fields = fields.clone();
        for name in self.names() {
            if !self.overwrite && fields.contains_key(name) {
                continue;
            }
            match args.value(name).and_then(to_json) {
                Some(value) => {
                    fields.insert(name.to_string(), value);
                }
                None => tracing::debug!(name, "skipping value with no JSON form"),
            }
        }
        args.next(Values::new().with(CONTEXT, JsonValue::Object(fields)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::{ArgSet, ChainFn, Next, inject, inspect_signature};
    use crate::middleware::{MiddlewareHandle, Phase};
    use axum::body::Bytes;
    use axum::http::{Method, Request, StatusCode};
    use axum::response::IntoResponse;
    use serde_json::json;

    fn request(uri: &str) -> HttpRequest {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Bytes::new())
            .unwrap()
    }

    fn run_request_phase(handle: &MiddlewareHandle, scope: Values, inner: &ChainFn) -> StageResult {
        let stage = handle.stage(Phase::Request).unwrap();
        let sig = inspect_signature(stage).unwrap();
        let provides: ArgSet = handle
            .meta()
            .provides
            .iter()
            .map(|n| n.as_str().into())
            .collect();
        let next = Next::new(stage.name(), &scope, &provides, inner);
        inject(stage, &sig, &scope, Some(next))
    }

    #[test]
    fn test_query_params_provides_present_and_absent() {
        let handle = MiddlewareHandle::new(QueryParams::new(["q", "page"]));
        let scope = Values::new().with("request", request("/search?q=rust"));

        let inner = |values: Values| -> StageResult {
            assert_eq!(values.get::<Option<String>>("q"), Some(&Some("rust".to_string())));
            assert_eq!(values.get::<Option<String>>("page"), Some(&None));
            Ok(Reply::context("ok".to_string()))
        };
        let reply = run_request_phase(&handle, scope, &inner).unwrap();
        assert_eq!(reply.context_ref::<String>().map(String::as_str), Some("ok"));
    }

    #[test]
    fn test_logging_provides_request_id() {
        let handle = MiddlewareHandle::new(LoggingMiddleware);
        let scope = Values::new()
            .with("request", request("/hello"))
            .with(
                "_route",
                RouteInfo {
                    pattern: "/hello".into(),
                    endpoint: "hello".into(),
                    methods: Vec::new(),
                },
            );

        let inner = |values: Values| -> StageResult {
            let id = values.get::<String>("request_id").unwrap();
            assert!(Uuid::parse_str(id).is_ok());
            Ok(Reply::Response(StatusCode::NO_CONTENT.into_response()))
        };
        let reply = run_request_phase(&handle, scope, &inner).unwrap();
        assert!(reply.is_response());
    }

    fn render_phase(
        processor: ContextProcessor,
        scope: Values,
        inner: &ChainFn,
    ) -> StageResult {
        let handle = MiddlewareHandle::new(processor);
        let stage = handle.stage(Phase::Render).unwrap();
        let sig = inspect_signature(stage).unwrap();
        let provides = ArgSet::new();
        let next = Next::new(stage.name(), &scope, &provides, inner);
        inject(stage, &sig, &scope, Some(next))
    }

    fn rendered_context() -> impl Fn(Values) -> StageResult + Send + Sync {
        |values: Values| Ok(Reply::context(values.get::<JsonValue>(CONTEXT).unwrap().clone()))
    }

    #[test]
    fn test_context_processor_fills_missing_keys() {
        let processor =
            ContextProcessor::new(["user"], [("theme", json!("light"))]).unwrap();
        let scope = Values::new()
            .with(CONTEXT, json!({ "user": "kept", "title": "Home" }))
            .with("user", "ada".to_string());

        let reply = render_phase(processor, scope, &rendered_context()).unwrap();
        assert_eq!(
            reply.context_ref::<JsonValue>(),
            Some(&json!({ "user": "kept", "title": "Home", "theme": "light" }))
        );
    }

    #[test]
    fn test_context_processor_overwrite() {
        let processor = ContextProcessor::new(["user"], Vec::<(String, JsonValue)>::new())
            .unwrap()
            .overwrite(true);
        let scope = Values::new()
            .with(CONTEXT, json!({ "user": "old" }))
            .with("user", "ada".to_string());

        let reply = render_phase(processor, scope, &rendered_context()).unwrap();
        assert_eq!(reply.context_ref::<JsonValue>(), Some(&json!({ "user": "ada" })));
    }

    #[test]
    fn test_context_processor_skips_non_object_contexts() {
        let processor = ContextProcessor::simple(["flash"]).unwrap();
        let scope = Values::new().with(CONTEXT, "plain text".to_string());
        let inner = |values: Values| -> StageResult {
            Ok(Reply::context(values.get::<String>(CONTEXT).cloned()))
        };

        let reply = render_phase(processor, scope, &inner).unwrap();
        assert_eq!(
            reply.context_ref::<Option<String>>(),
            Some(&Some("plain text".to_string()))
        );
    }

    #[test]
    fn test_context_processor_rejects_bad_names() {
        assert!(matches!(
            ContextProcessor::simple(["context"]),
            Err(BindError::ReservedArgument { .. })
        ));
        assert!(matches!(
            ContextProcessor::new(["a"], [("a", JsonValue::Null)]),
            Err(BindError::InvalidMiddleware { .. })
        ));
        assert!(matches!(
            ContextProcessor::simple(["not a name"]),
            Err(BindError::InvalidArgName { .. })
        ));
    }
}
