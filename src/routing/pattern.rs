use crate::error::{BindError, Result};
use crate::inject::{ArgName, Value, Values};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type ConvertOne = dyn Fn(&str) -> Option<Value> + Send + Sync;
type ConvertOptional = dyn Fn(Option<&str>) -> Option<Value> + Send + Sync;
type ConvertMany = dyn Fn(&[&str]) -> Option<Value> + Send + Sync;

/// Turns captured path segments into typed values.
///
/// A single capture yields `T`, an optional one `Option<T>` and a
/// multi-segment one `Vec<T>`.
#[derive(Clone)]
pub struct Converter {
    one: Arc<ConvertOne>,
    optional: Arc<ConvertOptional>,
    many: Arc<ConvertMany>,
}

impl Converter {
    pub fn new<T, F>(parse: F) -> Self
    where
        T: std::any::Any + Send + Sync,
        F: Fn(&str) -> Option<T> + Send + Sync + 'static,
    {
        let parse = Arc::new(parse);
        let p1 = Arc::clone(&parse);
        let p2 = Arc::clone(&parse);
        Self {
            one: Arc::new(move |s: &str| p1(s).map(|v| Arc::new(v) as Value)),
            optional: Arc::new(move |s: Option<&str>| match s {
                None => Some(Arc::new(None::<T>) as Value),
                Some(s) => p2(s).map(|v| Arc::new(Some(v)) as Value),
            }),
            many: Arc::new(move |segments: &[&str]| {
                segments
                    .iter()
                    .map(|s| parse(*s))
                    .collect::<Option<Vec<T>>>()
                    .map(|v| Arc::new(v) as Value)
            }),
        }
    }
}

/// Named converters usable in path patterns as `{name:converter}`.
///
/// Each application owns its registry; `int`, `float` and `str` are
/// always present.
#[derive(Clone)]
pub struct ConverterRegistry {
    converters: HashMap<String, Converter>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        let mut registry = Self {
            converters: HashMap::new(),
        };
        registry.register("str", |s: &str| Some(s.to_string()));
        registry.register("int", |s: &str| s.parse::<i64>().ok());
        registry.register("float", |s: &str| s.parse::<f64>().ok());
        registry
    }
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T, F>(&mut self, name: &str, parse: F) -> &mut Self
    where
        T: std::any::Any + Send + Sync,
        F: Fn(&str) -> Option<T> + Send + Sync + 'static,
    {
        self.converters.insert(name.to_string(), Converter::new(parse));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Converter> {
        self.converters.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.converters.keys().map(String::as_str)
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("ConverterRegistry").field("converters", &names).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Multiplicity {
    One,
    Optional,
    OneOrMore,
    ZeroOrMore,
}

#[derive(Clone)]
struct Capture {
    name: ArgName,
    multiplicity: Multiplicity,
    converter: Converter,
}

#[derive(Clone)]
enum Segment {
    Literal(String),
    Capture(Capture),
}

/// A parsed URL path pattern such as `/users/{id:int}/files/{path+}`.
///
/// `{name?}`, `{name+}` and `{name*}` may only appear as the last segment.
#[derive(Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl PathPattern {
    pub fn parse(raw: &str, converters: &ConverterRegistry) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(BindError::invalid_pattern(raw, "must start with '/'"));
        }

        let parts: Vec<&str> = split_path(raw).collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut seen: Vec<&str> = Vec::new();

        for (i, part) in parts.iter().enumerate() {
            let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) else {
                if part.contains(['{', '}']) {
                    return Err(BindError::invalid_pattern(
                        raw,
                        format!("segment {part:?} mixes literal text and a capture"),
                    ));
                }
                segments.push(Segment::Literal(part.to_string()));
                continue;
            };

            let (head, conv) = inner.split_once(':').unwrap_or((inner, "str"));
            let (name, multiplicity) = match head.chars().last() {
                Some('?') => (&head[..head.len() - 1], Multiplicity::Optional),
                Some('+') => (&head[..head.len() - 1], Multiplicity::OneOrMore),
                Some('*') => (&head[..head.len() - 1], Multiplicity::ZeroOrMore),
                _ => (head, Multiplicity::One),
            };
            if !ArgName::is_valid(name) {
                return Err(BindError::invalid_pattern(
                    raw,
                    format!("invalid capture name {name:?}"),
                ));
            }
            if seen.contains(&name) {
                return Err(BindError::invalid_pattern(
                    raw,
                    format!("capture {name:?} appears twice"),
                ));
            }
            seen.push(name);
            if multiplicity != Multiplicity::One && i + 1 != parts.len() {
                return Err(BindError::invalid_pattern(
                    raw,
                    format!("capture {name:?} must be the last segment"),
                ));
            }
            let converter = converters.get(conv).cloned().ok_or_else(|| {
                BindError::invalid_pattern(raw, format!("unknown converter {conv:?}"))
            })?;

            segments.push(Segment::Capture(Capture {
                name: ArgName::from(name),
                multiplicity,
                converter,
            }));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names this pattern captures, in order.
    pub fn capture_names(&self) -> Vec<ArgName> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Capture(c) => Some(c.name.clone()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Match `path`, returning the converted captures.
    ///
    /// A segment whose converter rejects the text makes the whole pattern
    /// not match.
    pub fn match_path(&self, path: &str) -> Option<Values> {
        let parts: Vec<&str> = split_path(path).collect();
        let mut values = Values::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Capture(capture) => {
                    let value = match capture.multiplicity {
                        Multiplicity::One => (capture.converter.one)(parts.get(i).copied()?)?,
                        Multiplicity::Optional => {
                            if parts.len() > i + 1 {
                                return None;
                            }
                            (capture.converter.optional)(parts.get(i).copied())?
                        }
                        Multiplicity::OneOrMore | Multiplicity::ZeroOrMore => {
                            let rest = parts.get(i..).unwrap_or_default();
                            if rest.is_empty() && capture.multiplicity == Multiplicity::OneOrMore {
                                return None;
                            }
                            (capture.converter.many)(rest)?
                        }
                    };
                    values.insert_value(capture.name.clone(), value);
                    if capture.multiplicity != Multiplicity::One {
                        return Some(values);
                    }
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(values)
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.raw).finish()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<PathPattern> {
        PathPattern::parse(raw, &ConverterRegistry::default())
    }

    #[test]
    fn test_literal_and_string_capture() {
        let p = parse("/hello/{name}").unwrap();
        let values = p.match_path("/hello/Kurt").unwrap();
        assert_eq!(values.get::<String>("name").map(String::as_str), Some("Kurt"));
        assert!(p.match_path("/hello").is_none());
        assert!(p.match_path("/hello/Kurt/extra").is_none());
        assert!(p.match_path("/bye/Kurt").is_none());
    }

    #[test]
    fn test_int_converter_rejects_text() {
        let p = parse("/users/{id:int}").unwrap();
        assert_eq!(p.match_path("/users/42").unwrap().get::<i64>("id"), Some(&42));
        assert!(p.match_path("/users/abc").is_none());
    }

    #[test]
    fn test_optional_tail() {
        let p = parse("/page/{n?:int}").unwrap();
        assert_eq!(p.match_path("/page/3").unwrap().get::<Option<i64>>("n"), Some(&Some(3)));
        assert_eq!(p.match_path("/page").unwrap().get::<Option<i64>>("n"), Some(&None));
        assert!(p.match_path("/page/3/4").is_none());
    }

    #[test]
    fn test_multi_segment_tails() {
        let plus = parse("/files/{path+}").unwrap();
        let values = plus.match_path("/files/a/b/c").unwrap();
        assert_eq!(
            values.get::<Vec<String>>("path"),
            Some(&vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        assert!(plus.match_path("/files").is_none());

        let star = parse("/tags/{ids*:int}").unwrap();
        assert_eq!(star.match_path("/tags").unwrap().get::<Vec<i64>>("ids"), Some(&vec![]));
        assert_eq!(star.match_path("/tags/1/2").unwrap().get::<Vec<i64>>("ids"), Some(&vec![1, 2]));
        assert!(star.match_path("/tags/1/x").is_none());
    }

    #[test]
    fn test_invalid_patterns() {
        for raw in [
            "no/slash",
            "/a/{x}/{x}",
            "/a/{rest+}/b",
            "/a/{id:uuid}",
            "/a/pre{x}",
            "/a/{2x}",
        ] {
            assert!(
                matches!(parse(raw), Err(BindError::InvalidPattern { .. })),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_custom_converter_per_registry() {
        let mut registry = ConverterRegistry::default();
        registry.register("bool", |s: &str| s.parse::<bool>().ok());
        let p = PathPattern::parse("/flag/{on:bool}", &registry).unwrap();
        assert_eq!(p.match_path("/flag/true").unwrap().get::<bool>("on"), Some(&true));

        // a fresh registry does not see it
        assert!(parse("/flag/{on:bool}").is_err());
    }

    #[test]
    fn test_root_pattern() {
        let root = parse("/").unwrap();
        assert!(root.match_path("/").is_some());
        assert!(root.match_path("/x").is_none());
    }
}
