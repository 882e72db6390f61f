//! Middleware contract
//!
//! A middleware contributes up to three phases to a route's chain:
//!
//! ```text
//! request phases ─▶ endpoint phases ─▶ endpoint ─┬─▶ response
//!                                                └─▶ render phases ─▶ render
//! ```
//!
//! Each phase declares `next` as its first parameter and may hand newly
//! provided values to `next`. The declared metadata (provided names,
//! uniqueness, phase parameter lists) is read once when the middleware is
//! registered.
//!
//! # Example
//!
//! ```rust,ignore
//! use weft::prelude::*;
//!
//! struct Account;
//!
//! impl Middleware for Account {
//!     fn meta(&self) -> MiddlewareMeta {
//!         MiddlewareMeta::new("Account")
//!             .provides(["account"])
//!             .request_phase([Param::required("next"), Param::required("token")])
//!     }
//!
//!     fn request(&self, args: Args<'_>) -> StageResult {
//!         let token = args.get::<String>("token")?;
//!         args.next(Values::new().with("account", lookup(token)))
//!     }
//! }
//! ```

pub mod builtins;
mod merge;

pub use merge::merge_middlewares;

use crate::error::{BindError, Result};
use crate::inject::{ArgName, Args, NEXT, Param, ParamKind, Stage, StageResult, Values};
use std::any::{Any, TypeId};
use std::sync::Arc;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter};

/// Reserved name under which the render chain receives the endpoint result.
pub const CONTEXT: &str = "context";

/// The three places a middleware can hook into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Request,
    Endpoint,
    Render,
}

/// A middleware. Phases left at their default simply pass through, but
/// only phases declared in [`MiddlewareMeta`] are ever called.
///
/// Middleware instances are shared by every request; per-request data must
/// travel through `next`, never through fields of `self`.
pub trait Middleware: Any + Send + Sync {
    fn meta(&self) -> MiddlewareMeta;

    fn request(&self, args: Args<'_>) -> StageResult {
        args.next(Values::new())
    }

    fn endpoint(&self, args: Args<'_>) -> StageResult {
        args.next(Values::new())
    }

    fn render(&self, args: Args<'_>) -> StageResult {
        args.next(Values::new())
    }
}

/// Declared metadata of a middleware.
#[derive(Debug, Clone)]
pub struct MiddlewareMeta {
    pub name: String,
    pub provides: Vec<String>,
    pub endpoint_provides: Vec<String>,
    pub render_provides: Vec<String>,
    pub unique: bool,
    pub reorderable: bool,
    pub request: Option<Vec<Param>>,
    pub endpoint: Option<Vec<Param>>,
    pub render: Option<Vec<Param>>,
}

impl MiddlewareMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provides: Vec::new(),
            endpoint_provides: Vec::new(),
            render_provides: Vec::new(),
            unique: true,
            reorderable: true,
            request: None,
            endpoint: None,
            render: None,
        }
    }

    pub fn provides<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provides = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn endpoint_provides<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoint_provides = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn render_provides<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.render_provides = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn reorderable(mut self, reorderable: bool) -> Self {
        self.reorderable = reorderable;
        self
    }

    pub fn request_phase(mut self, params: impl IntoIterator<Item = Param>) -> Self {
        self.request = Some(params.into_iter().collect());
        self
    }

    pub fn endpoint_phase(mut self, params: impl IntoIterator<Item = Param>) -> Self {
        self.endpoint = Some(params.into_iter().collect());
        self
    }

    pub fn render_phase(mut self, params: impl IntoIterator<Item = Param>) -> Self {
        self.render = Some(params.into_iter().collect());
        self
    }

    pub fn phase_params(&self, phase: Phase) -> Option<&[Param]> {
        match phase {
            Phase::Request => self.request.as_deref(),
            Phase::Endpoint => self.endpoint.as_deref(),
            Phase::Render => self.render.as_deref(),
        }
    }

    pub fn phase_provides(&self, phase: Phase) -> &[String] {
        match phase {
            Phase::Request => &self.provides,
            Phase::Endpoint => &self.endpoint_provides,
            Phase::Render => &self.render_provides,
        }
    }
}

/// A registered middleware: the instance, its metadata read once, and one
/// prebuilt [`Stage`] per declared phase.
#[derive(Clone)]
pub struct MiddlewareHandle {
    inner: Arc<dyn Middleware>,
    meta: Arc<MiddlewareMeta>,
    type_id: TypeId,
    stages: [Option<Stage>; 3],
}

impl MiddlewareHandle {
    pub fn new<M: Middleware>(middleware: M) -> Self {
        Self::from_arc(Arc::new(middleware))
    }

    pub fn from_arc<M: Middleware>(middleware: Arc<M>) -> Self {
        let type_id = TypeId::of::<M>();
        let inner: Arc<dyn Middleware> = middleware;
        let meta = Arc::new(inner.meta());
        let stages = [Phase::Request, Phase::Endpoint, Phase::Render]
            .map(|phase| phase_stage(&inner, &meta, phase));
        Self {
            inner,
            meta,
            type_id,
            stages,
        }
    }

    pub fn meta(&self) -> &MiddlewareMeta {
        &self.meta
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn stage(&self, phase: Phase) -> Option<&Stage> {
        self.stages[phase as usize].as_ref()
    }

    /// Whether both handles wrap the same concrete middleware type.
    pub fn same_kind(&self, other: &MiddlewareHandle) -> bool {
        self.type_id == other.type_id
    }

    pub fn instance(&self) -> &Arc<dyn Middleware> {
        &self.inner
    }
}

impl std::fmt::Debug for MiddlewareHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareHandle")
            .field("name", &self.meta.name)
            .field("unique", &self.meta.unique)
            .field("reorderable", &self.meta.reorderable)
            .finish()
    }
}

fn phase_stage(inner: &Arc<dyn Middleware>, meta: &MiddlewareMeta, phase: Phase) -> Option<Stage> {
    let params = meta.phase_params(phase)?.to_vec();
    let mw = Arc::clone(inner);
    let name = format!("{}.{}", meta.name, phase);
    Some(match phase {
        Phase::Request => Stage::new(name, params, move |args| mw.request(args)),
        Phase::Endpoint => Stage::new(name, params, move |args| mw.endpoint(args)),
        Phase::Render => Stage::new(name, params, move |args| mw.render(args)),
    })
}

/// Validate a middleware's declared shape.
pub fn check_middleware(handle: &MiddlewareHandle) -> Result<()> {
    let meta = handle.meta();
    for phase in Phase::iter() {
        let provides = meta.phase_provides(phase);
        let params = meta.phase_params(phase);

        if params.is_none() && !provides.is_empty() {
            return Err(BindError::invalid_middleware(
                &meta.name,
                format!("declares values provided by the {phase} phase but has no {phase} phase"),
            ));
        }
        for name in provides {
            if !ArgName::is_valid(name) {
                return Err(BindError::InvalidArgName { name: name.clone() });
            }
            if name == NEXT || name == CONTEXT {
                return Err(BindError::reserved(&meta.name, ArgName::from(name.as_str())));
            }
        }
        if let Some(params) = params {
            let takes_next = params
                .first()
                .is_some_and(|p| p.name() == NEXT && matches!(p.kind(), ParamKind::Required));
            if !takes_next {
                return Err(BindError::invalid_middleware(
                    &meta.name,
                    format!("{phase} phase must take 'next' as its first parameter"),
                ));
            }
        }
    }
    Ok(())
}
