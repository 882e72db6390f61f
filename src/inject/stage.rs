use crate::error::DispatchError;
use crate::inject::value::downcast;
use crate::inject::{ArgSet, Param, Reply, Value, Values};
use crate::middleware::CONTEXT;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Result of running a stage. Stage errors are opaque and propagate
/// through the chain untouched.
pub type StageResult = Result<Reply, anyhow::Error>;

pub(crate) type StageFn = dyn Fn(Args<'_>) -> StageResult + Send + Sync;

/// A callable taking part in a chain: an endpoint, a render function or
/// one phase of a middleware.
#[derive(Clone)]
pub struct Stage {
    name: Arc<str>,
    params: Arc<[Param]>,
    func: Arc<StageFn>,
}

impl Stage {
    pub fn new<F>(name: impl Into<String>, params: impl IntoIterator<Item = Param>, func: F) -> Self
    where
        F: Fn(Args<'_>) -> StageResult + Send + Sync + 'static,
    {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            params: params.into_iter().collect(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Identity of the underlying function, shared by clones.
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.func).cast::<()>() as usize
    }

    pub(crate) fn call(&self, args: Args<'_>) -> StageResult {
        (self.func)(args)
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

pub(crate) type ChainFn = dyn Fn(Values) -> StageResult + Send + Sync;

/// Continuation handed to a middleware phase.
///
/// Calling it runs the rest of the chain with the current values plus the
/// newly provided ones. Exactly the names the phase declared as provided
/// must be passed. Inside the render chain a replacement `context` may be
/// passed as well.
pub struct Next<'a> {
    stage: &'a str,
    scope: &'a Values,
    provides: &'a ArgSet,
    inner: &'a ChainFn,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        stage: &'a str,
        scope: &'a Values,
        provides: &'a ArgSet,
        inner: &'a ChainFn,
    ) -> Self {
        Self {
            stage,
            scope,
            provides,
            inner,
        }
    }

    pub fn call(&self, provided: Values) -> StageResult {
        if let Some(name) = provided.names().find(|name| {
            !self.provides.contains(name.as_str())
                && !(*name == CONTEXT && self.scope.contains(CONTEXT))
        }) {
            return Err(DispatchError::UndeclaredValue {
                stage: self.stage.to_string(),
                name: name.to_string(),
            }
            .into());
        }
        if let Some(name) = self.provides.iter().find(|name| !provided.contains(name.as_str())) {
            return Err(DispatchError::MissingProvided {
                stage: self.stage.to_string(),
                name: name.to_string(),
            }
            .into());
        }
        let mut scope = self.scope.clone();
        scope.extend(provided);
        (self.inner)(scope)
    }
}

/// The arguments a stage was called with: exactly the names it declared.
pub struct Args<'a> {
    stage: &'a str,
    values: Values,
    next: Option<Next<'a>>,
}

impl<'a> Args<'a> {
    pub(crate) fn new(stage: &'a str, values: Values, next: Option<Next<'a>>) -> Self {
        Self {
            stage,
            values,
            next,
        }
    }

    /// Typed access to a declared argument.
    pub fn get<T: Any>(&self, name: &str) -> Result<&T, DispatchError> {
        downcast::<T>(&self.values, name)?.ok_or_else(|| DispatchError::MissingValue {
            stage: self.stage.to_string(),
            name: name.into(),
        })
    }

    /// Like [`Args::get`], but `None` when the argument is absent.
    pub fn get_opt<T: Any>(&self, name: &str) -> Result<Option<&T>, DispatchError> {
        downcast::<T>(&self.values, name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.value(name)
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn stage(&self) -> &str {
        self.stage
    }

    /// Run the rest of the chain, injecting `provided`.
    pub fn next(&self, provided: Values) -> StageResult {
        match &self.next {
            Some(next) => next.call(provided),
            None => Err(DispatchError::NoContinuation {
                stage: self.stage.to_string(),
            }
            .into()),
        }
    }
}
