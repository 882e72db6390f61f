use crate::inject::ArgName;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BindError>;

/// Errors raised while binding a route into an application.
///
/// Every variant is a configuration problem: nothing is served until the
/// binding succeeds, and a failed binding never mutates the application.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("Unsupported signature for {stage}: {reason}")]
    UnsupportedSignature { stage: String, reason: String },

    #[error("Invalid argument name {name:?}")]
    InvalidArgName { name: String },

    #[error("Conflicting providers: {}", format_conflicts(.conflicts))]
    ProviderConflict { conflicts: Vec<Conflict> },

    #[error("Multiple inclusion of unique middleware {middleware}")]
    DuplicateMiddleware { middleware: String },

    #[error("Reserved argument '{name}' used by {stage}")]
    ReservedArgument { stage: String, name: ArgName },

    #[error("Invalid middleware {middleware}: {reason}")]
    InvalidMiddleware { middleware: String, reason: String },

    #[error("Dependency cycle detected: {}", format_path(.path))]
    Cycle { path: Vec<String> },

    #[error("Unresolved arguments for {stage}: {}", format_path_list(.missing))]
    UnresolvedArgument { stage: String, missing: Vec<ArgName> },

    #[error("Invalid URL pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Unrecognized HTTP method(s): {}", .methods.join(", "))]
    InvalidMethod { methods: Vec<String> },

    #[error("Unknown render argument {name:?}: {reason}")]
    InvalidRender { name: String, reason: String },
}

/// One argument name claimed by more than one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub name: ArgName,
    pub sources: Vec<String>,
}

impl BindError {
    pub fn unsupported(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedSignature {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    pub fn reserved(stage: impl Into<String>, name: ArgName) -> Self {
        Self::ReservedArgument {
            stage: stage.into(),
            name,
        }
    }

    pub fn invalid_middleware(middleware: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMiddleware {
            middleware: middleware.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while marshalling arguments at request time.
///
/// `MissingValue` should be unreachable once a route is bound; seeing it
/// means the compiled chain disagrees with the bind-time analysis.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Internal error: no value for '{name}' when calling {stage}")]
    MissingValue { stage: String, name: ArgName },

    #[error("{stage} passed undeclared value '{name}' to next")]
    UndeclaredValue { stage: String, name: String },

    #[error("{stage} called next without its declared value '{name}'")]
    MissingProvided { stage: String, name: String },

    #[error("Argument '{name}' is not a {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("{stage} has no next continuation")]
    NoContinuation { stage: String },
}

fn format_path(path: &[String]) -> String {
    path.join(" -> ")
}

fn format_path_list(names: &[ArgName]) -> String {
    names
        .iter()
        .map(ArgName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_conflicts(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .map(|c| format!("'{}' provided by [{}]", c.name, c.sources.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_lists_every_source() {
        let err = BindError::ProviderConflict {
            conflicts: vec![
                Conflict {
                    name: ArgName::from("session"),
                    sources: vec!["CookieMiddleware".into(), "SessionMiddleware".into()],
                },
                Conflict {
                    name: ArgName::from("user"),
                    sources: vec!["resources".into(), "AuthMiddleware".into()],
                },
            ],
        };
        let message = err.to_string();
        assert!(message.contains("'session' provided by [CookieMiddleware, SessionMiddleware]"));
        assert!(message.contains("'user' provided by [resources, AuthMiddleware]"));
    }

    #[test]
    fn test_cycle_message_shows_path() {
        let err = BindError::Cycle {
            path: vec!["x".into(), "y".into(), "x".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle detected: x -> y -> x");
    }
}
