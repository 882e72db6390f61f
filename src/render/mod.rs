//! Render stages
//!
//! A route's render argument is either a ready [`Stage`] or a name the
//! application's [`RenderFactory`] turns into one at bind time.

use crate::error::{BindError, Result};
use crate::inject::{Param, Reply, Stage};
use axum::Json;
use axum::http::header;
use axum::response::IntoResponse;
use std::sync::{Arc, LazyLock};

/// Maps a named render argument into a render stage.
pub type RenderFactory = Arc<dyn Fn(&str) -> Result<Stage> + Send + Sync>;

static NOOP: LazyLock<Stage> = LazyLock::new(|| {
    Stage::new("noop_render", [Param::required("context")], |args| {
        Ok(Reply::Context(args.value("context").cloned().ok_or_else(|| {
            crate::error::DispatchError::MissingValue {
                stage: "noop_render".into(),
                name: "context".into(),
            }
        })?))
    })
});

/// Render stage that hands the context back untouched. Routes without a
/// render argument use it, so their endpoints must return responses.
pub fn noop_render() -> Stage {
    NOOP.clone()
}

static JSON_COMPACT: LazyLock<Stage> = LazyLock::new(|| json_stage("json", false));
static JSON_PRETTY: LazyLock<Stage> = LazyLock::new(|| json_stage("json_pretty", true));

fn json_stage(name: &'static str, pretty: bool) -> Stage {
    Stage::new(name, [Param::required("context")], move |args| {
        let context = args.get::<serde_json::Value>("context")?;
        if !pretty {
            return Ok(Json(context.clone()).into_response().into());
        }
        let body = serde_json::to_string_pretty(context)?;
        Ok(([(header::CONTENT_TYPE, "application/json")], body)
            .into_response()
            .into())
    })
}

/// Renders `serde_json::Value` contexts as JSON responses.
///
/// As a factory it understands the render arguments `json` and
/// `json_pretty`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRender;

impl JsonRender {
    pub fn compact() -> Stage {
        JSON_COMPACT.clone()
    }

    pub fn pretty() -> Stage {
        JSON_PRETTY.clone()
    }

    pub fn factory() -> RenderFactory {
        Arc::new(|name: &str| match name {
            "json" => Ok(Self::compact()),
            "json_pretty" => Ok(Self::pretty()),
            other => Err(BindError::InvalidRender {
                name: other.to_string(),
                reason: "expected \"json\" or \"json_pretty\"".to_string(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::{SignatureCache, Values, inject};
    use axum::body::to_bytes;
    use serde_json::json;

    fn run(stage: &Stage, context: serde_json::Value) -> Reply {
        let sig = SignatureCache::new().inspect(stage).unwrap();
        inject(stage, &sig, &Values::new().with("context", context), None).unwrap()
    }

    #[test]
    fn test_noop_returns_context() {
        let reply = run(&noop_render(), json!({"a": 1}));
        assert_eq!(reply.context_ref::<serde_json::Value>(), Some(&json!({"a": 1})));
        assert_eq!(noop_render().name(), "noop_render");
    }

    #[tokio::test]
    async fn test_json_pretty_body() {
        let factory = JsonRender::factory();
        let stage = factory("json_pretty").unwrap();
        let resp = run(&stage, json!({"a": 1})).into_response().unwrap();
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_factory_rejects_unknown_name() {
        let factory = JsonRender::factory();
        assert!(matches!(factory("xml"), Err(BindError::InvalidRender { .. })));
    }

    #[test]
    fn test_factory_reuses_stages() {
        let factory = JsonRender::factory();
        let cache = SignatureCache::new();
        cache.inspect(&factory("json").unwrap()).unwrap();
        cache.inspect(&factory("json").unwrap()).unwrap();
        assert_eq!(cache.len(), 1);
    }
}
