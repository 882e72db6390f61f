use crate::error::DispatchError;
use axum::response::Response;
use indexmap::IndexMap;
use std::any::Any;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// A type-erased named value: resource, URL capture, builtin or a value
/// provided by a middleware.
pub type Value = Arc<dyn Any + Send + Sync>;

/// An argument name. Names are the only key used for matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArgName(String);

impl ArgName {
    /// Whether `name` can be declared as a parameter.
    pub fn is_valid(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
            _ => return false,
        }
        chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ArgName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ArgName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for ArgName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ArgName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArgName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for ArgName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ArgName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Ordered set of argument names.
pub type ArgSet = indexmap::IndexSet<ArgName>;

/// Wrap any value as a [`Value`].
pub fn value<T: Any + Send + Sync>(v: T) -> Value {
    Arc::new(v)
}

/// The dictionary of named values threaded through a compiled chain.
#[derive(Clone, Default)]
pub struct Values {
    inner: IndexMap<ArgName, Value>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a typed value.
    pub fn with<T: Any + Send + Sync>(mut self, name: &str, v: T) -> Self {
        self.insert(name, v);
        self
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, name: &str, v: T) -> &mut Self {
        self.inner.insert(ArgName::from(name), Arc::new(v));
        self
    }

    pub fn insert_value(&mut self, name: ArgName, v: Value) -> &mut Self {
        self.inner.insert(name, v);
        self
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.inner.get(name)
    }

    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.inner.get(name).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &ArgName> {
        self.inner.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArgName, &Value)> {
        self.inner.iter()
    }

    /// Merge `other` into `self`; values from `other` win.
    pub fn extend(&mut self, other: Values) {
        self.inner.extend(other.inner);
    }

    /// Copy of the values whose names are in `names`.
    pub fn restrict(&self, names: &ArgSet) -> Values {
        Values {
            inner: self
                .inner
                .iter()
                .filter(|(k, _)| names.contains(k.as_str()))
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.inner.keys()).finish()
    }
}

/// What a stage hands back: either a terminal response, or a context value
/// still waiting to be rendered.
pub enum Reply {
    Response(Response),
    Context(Value),
}

impl Reply {
    pub fn context<T: Any + Send + Sync>(v: T) -> Self {
        Reply::Context(Arc::new(v))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Reply::Response(_))
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            Reply::Response(resp) => Some(resp),
            Reply::Context(_) => None,
        }
    }

    /// Borrow the context as `T`.
    pub fn context_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Reply::Context(v) => v.downcast_ref::<T>(),
            Reply::Response(_) => None,
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Response(resp) => f.debug_tuple("Response").field(&resp.status()).finish(),
            Reply::Context(_) => f.write_str("Context(..)"),
        }
    }
}

impl From<Response> for Reply {
    fn from(resp: Response) -> Self {
        Reply::Response(resp)
    }
}

/// Typed lookup shared by [`Values`] and stage arguments.
pub(crate) fn downcast<'a, T: Any>(
    values: &'a Values,
    name: &str,
) -> std::result::Result<Option<&'a T>, DispatchError> {
    match values.value(name) {
        None => Ok(None),
        Some(v) => v
            .downcast_ref::<T>()
            .map(Some)
            .ok_or_else(|| DispatchError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            }),
    }
}
