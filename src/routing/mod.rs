//! Routes, path patterns and route binding
//!
//! A [`Route`] is an unbound description: a pattern, an endpoint stage, a
//! render argument and route-level middleware and resources.
//! [`bind_route`] merges it with an application's [`AppContext`], checks
//! every argument is provided, and compiles its chain into a
//! [`BoundRoute`].

mod pattern;
mod route;

pub use pattern::{Converter, ConverterRegistry, PathPattern};
pub use route::{AppContext, ArgOrigin, BoundRoute, RenderArg, Route, RouteInfo, bind_route};
