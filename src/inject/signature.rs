use crate::error::{BindError, Result};
use crate::inject::{ArgName, Stage, Value};
use dashmap::DashMap;
use indexmap::IndexMap;
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

/// How a declared parameter is filled.
#[derive(Clone)]
pub enum ParamKind {
    /// Must be supplied by some provider.
    Required,
    /// Falls back to the carried default when nothing provides it.
    Optional(Value),
    /// Catch-all positional parameter. Never accepted by binding.
    VarPositional,
    /// Catch-all keyword parameter. Never accepted by binding.
    VarKeyword,
}

/// One declared parameter of a stage.
#[derive(Clone)]
pub struct Param {
    name: String,
    kind: ParamKind,
}

impl Param {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Required,
        }
    }

    pub fn optional<T: Any + Send + Sync>(name: impl Into<String>, default: T) -> Self {
        Self::optional_value(name, Arc::new(default))
    }

    pub fn optional_value(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Optional(default),
        }
    }

    pub fn var_positional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::VarPositional,
        }
    }

    pub fn var_keyword(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::VarKeyword,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ParamKind {
        &self.kind
    }
}

impl std::fmt::Debug for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ParamKind::Required => write!(f, "{}", self.name),
            ParamKind::Optional(_) => write!(f, "{}=..", self.name),
            ParamKind::VarPositional => write!(f, "*{}", self.name),
            ParamKind::VarKeyword => write!(f, "**{}", self.name),
        }
    }
}

/// Parameter names of a stage, split into required and defaulted.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    names: Vec<ArgName>,
    required: Vec<ArgName>,
    optional: IndexMap<ArgName, Value>,
}

impl Signature {
    /// All declared names in declaration order.
    pub fn names(&self) -> &[ArgName] {
        &self.names
    }

    pub fn required(&self) -> &[ArgName] {
        &self.required
    }

    pub fn optional(&self) -> impl Iterator<Item = &ArgName> {
        self.optional.keys()
    }

    pub fn default_for(&self, name: &str) -> Option<&Value> {
        self.optional.get(name)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn first(&self) -> Option<&ArgName> {
        self.names.first()
    }
}

/// Derive the [`Signature`] of a stage.
///
/// Fails for catch-all parameters, invalid names and names declared twice.
pub fn inspect_signature(stage: &Stage) -> Result<Signature> {
    let mut sig = Signature::default();
    let mut seen = HashSet::new();

    for param in stage.params() {
        match param.kind() {
            ParamKind::VarPositional => {
                return Err(BindError::unsupported(
                    stage.name(),
                    format!("catch-all positional parameter '*{}'", param.name()),
                ));
            }
            ParamKind::VarKeyword => {
                return Err(BindError::unsupported(
                    stage.name(),
                    format!("catch-all keyword parameter '**{}'", param.name()),
                ));
            }
            _ => {}
        }
        if !ArgName::is_valid(param.name()) {
            return Err(BindError::InvalidArgName {
                name: param.name().to_string(),
            });
        }
        if !seen.insert(param.name()) {
            return Err(BindError::unsupported(
                stage.name(),
                format!("parameter '{}' declared twice", param.name()),
            ));
        }

        let name = ArgName::from(param.name());
        sig.names.push(name.clone());
        match param.kind() {
            ParamKind::Optional(default) => {
                sig.optional.insert(name, Arc::clone(default));
            }
            _ => sig.required.push(name),
        }
    }

    Ok(sig)
}

/// Per-binder memo of inspected signatures, keyed by stage identity.
///
/// The cached entry keeps the stage alive so its identity cannot be reused
/// by another allocation.
#[derive(Default)]
pub struct SignatureCache {
    entries: DashMap<usize, (Stage, Arc<Signature>)>,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inspect(&self, stage: &Stage) -> Result<Arc<Signature>> {
        if let Some(entry) = self.entries.get(&stage.id()) {
            return Ok(Arc::clone(&entry.value().1));
        }
        let sig = Arc::new(inspect_signature(stage)?);
        self.entries
            .insert(stage.id(), (stage.clone(), Arc::clone(&sig)));
        Ok(sig)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::Reply;

    fn names(raw: &[&str]) -> Vec<ArgName> {
        raw.iter().map(|n| ArgName::from(*n)).collect()
    }

    fn stage(params: Vec<Param>) -> Stage {
        Stage::new("sample", params, |_| Ok(Reply::context(())))
    }

    #[test]
    fn test_required_and_optional_split() {
        let sig = inspect_signature(&stage(vec![
            Param::required("a"),
            Param::required("b"),
            Param::optional("c", 5i32),
        ]))
        .unwrap();

        assert_eq!(sig.names(), names(&["a", "b", "c"]).as_slice());
        assert_eq!(sig.required(), names(&["a", "b"]).as_slice());
        assert_eq!(sig.optional().collect::<Vec<_>>(), vec![&ArgName::from("c")]);
        let default = sig.default_for("c").unwrap();
        assert_eq!(default.downcast_ref::<i32>(), Some(&5));
    }

    #[test]
    fn test_rejects_catch_all_parameters() {
        let err = inspect_signature(&stage(vec![
            Param::required("a"),
            Param::var_positional("args"),
        ]))
        .unwrap_err();
        assert!(matches!(err, BindError::UnsupportedSignature { .. }));

        let err = inspect_signature(&stage(vec![Param::var_keyword("kwargs")])).unwrap_err();
        assert!(err.to_string().contains("**kwargs"));
    }

    #[test]
    fn test_rejects_duplicate_and_invalid_names() {
        let err = inspect_signature(&stage(vec![Param::required("a"), Param::required("a")]))
            .unwrap_err();
        assert!(matches!(err, BindError::UnsupportedSignature { .. }));

        let err = inspect_signature(&stage(vec![Param::required("not-a-name")])).unwrap_err();
        assert!(matches!(err, BindError::InvalidArgName { .. }));
    }

    #[test]
    fn test_cache_returns_same_signature() {
        let cache = SignatureCache::new();
        let s = stage(vec![Param::required("a")]);
        let first = cache.inspect(&s).unwrap();
        let second = cache.inspect(&s.clone()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }
}
