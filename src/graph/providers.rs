use crate::error::{BindError, Conflict, Result};
use crate::graph::{find_cycle_normalized, normalize, resolve};
use crate::inject::{ArgName, NEXT, Signature};
use crate::middleware::Phase;
use indexmap::{IndexMap, IndexSet};
use std::fmt;
use strum_macros::{AsRefStr, Display};

/// Name -> names it needs. Stage pseudo-targets are keyed `<label>`.
pub type ProviderMap = IndexMap<String, Vec<String>>;

/// Broad category of an argument provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SourceKind {
    Url,
    Builtin,
    Resource,
    Middleware,
    Default,
}

/// The one provider of an argument name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Url,
    Builtin,
    Resource,
    Middleware {
        name: String,
        index: usize,
        phase: Phase,
    },
}

impl Source {
    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Url => SourceKind::Url,
            Source::Builtin => SourceKind::Builtin,
            Source::Resource => SourceKind::Resource,
            Source::Middleware { .. } => SourceKind::Middleware,
        }
    }

    /// Phases of one middleware instance count as a single provider.
    fn same_provider(&self, other: &Source) -> bool {
        match (self, other) {
            (Source::Middleware { index: a, .. }, Source::Middleware { index: b, .. }) => a == b,
            _ => self == other,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Url => f.write_str("url"),
            Source::Builtin => f.write_str("builtins"),
            Source::Resource => f.write_str("resources"),
            Source::Middleware { name, .. } => f.write_str(name),
        }
    }
}

/// Names available unconditionally, with no further dependencies.
#[derive(Debug, Clone, Default)]
pub struct StaticSources {
    pub url: Vec<ArgName>,
    pub builtins: Vec<ArgName>,
    pub resources: Vec<ArgName>,
}

impl StaticSources {
    pub fn iter(&self) -> impl Iterator<Item = (Source, &ArgName)> {
        self.url
            .iter()
            .map(|n| (Source::Url, n))
            .chain(self.builtins.iter().map(|n| (Source::Builtin, n)))
            .chain(self.resources.iter().map(|n| (Source::Resource, n)))
    }
}

/// A stage as seen by the provider graph.
pub struct StageNode<'a> {
    pub label: String,
    /// `None` for the endpoint and render functions, which provide nothing.
    pub provider: Option<Source>,
    pub signature: &'a Signature,
    pub provides: &'a [ArgName],
}

/// Record who provides every name; fail listing every contested name.
pub fn check_conflicts(
    stages: &[StageNode<'_>],
    statics: &StaticSources,
) -> Result<IndexMap<ArgName, Source>> {
    let mut claims: IndexMap<ArgName, Vec<Source>> = IndexMap::new();
    let mut claim = |name: &ArgName, source: Source| {
        let entry = claims.entry(name.clone()).or_default();
        if !entry.iter().any(|s| s.same_provider(&source)) {
            entry.push(source);
        }
    };

    for (source, name) in statics.iter() {
        claim(name, source);
    }
    for stage in stages {
        if let Some(provider) = &stage.provider {
            for name in stage.provides {
                claim(name, provider.clone());
            }
        }
    }

    let conflicts: Vec<Conflict> = claims
        .iter()
        .filter(|(_, sources)| sources.len() > 1)
        .map(|(name, sources)| Conflict {
            name: name.clone(),
            sources: sources.iter().map(ToString::to_string).collect(),
        })
        .collect();
    if !conflicts.is_empty() {
        return Err(BindError::ProviderConflict { conflicts });
    }

    Ok(claims
        .into_iter()
        .filter_map(|(name, mut sources)| sources.pop().map(|s| (name, s)))
        .collect())
}

/// Dependency structure of one bound route.
#[derive(Debug, Clone)]
pub struct ProviderGraph {
    map: ProviderMap,
    sources: IndexMap<ArgName, Source>,
    targets: Vec<(String, Vec<ArgName>)>,
}

/// Key of the pseudo-node standing for a stage.
pub fn target_key(label: &str) -> String {
    format!("<{label}>")
}

/// Build the provider graph for a list of stages and static sources.
///
/// Each provided name points at the required arguments of every phase
/// that provides it; each stage's pseudo-target points at everything it
/// declares.
pub fn build_providers(stages: &[StageNode<'_>], statics: &StaticSources) -> Result<ProviderGraph> {
    let sources = check_conflicts(stages, statics)?;

    let mut map = ProviderMap::new();
    for (_, name) in statics.iter() {
        map.entry(name.to_string()).or_default();
    }

    let mut targets = Vec::with_capacity(stages.len());
    for stage in stages {
        let required: Vec<ArgName> = stage
            .signature
            .required()
            .iter()
            .filter(|n| *n != NEXT)
            .cloned()
            .collect();
        for name in stage.provides {
            map.entry(name.to_string())
                .or_default()
                .extend(required.iter().map(ToString::to_string));
        }
        map.insert(
            target_key(&stage.label),
            stage
                .signature
                .names()
                .iter()
                .filter(|n| *n != NEXT)
                .map(ToString::to_string)
                .collect(),
        );
        targets.push((stage.label.clone(), required));
    }

    Ok(ProviderGraph {
        map: normalize(&map),
        sources,
        targets,
    })
}

impl ProviderGraph {
    pub fn map(&self) -> &ProviderMap {
        &self.map
    }

    pub fn source_of(&self, name: &str) -> Option<&Source> {
        self.sources.get(name)
    }

    /// Reject cycles, then check that every stage's required names trace
    /// back to a provider. Returns the resolved map.
    pub fn check(&self) -> Result<ProviderMap> {
        if let Some(path) = find_cycle_normalized(&self.map) {
            return Err(BindError::Cycle { path });
        }
        let resolved = resolve(&self.map);

        for (label, required) in &self.targets {
            let mut missing: IndexSet<ArgName> = IndexSet::new();
            for name in required {
                let closure = resolved.get(name.as_str()).map(Vec::as_slice).unwrap_or_default();
                missing.extend(
                    closure
                        .iter()
                        .filter(|n| !self.sources.contains_key(n.as_str()))
                        .map(|n| ArgName::from(n.as_str())),
                );
            }
            if !missing.is_empty() {
                return Err(BindError::UnresolvedArgument {
                    stage: label.clone(),
                    missing: missing.into_iter().collect(),
                });
            }
        }
        Ok(resolved)
    }
}
