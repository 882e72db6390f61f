use crate::error::{BindError, Result};
use crate::middleware::MiddlewareHandle;

/// Combine application-level and route-level middleware into the effective
/// list for one route: application entries first, route entries after.
///
/// For a unique middleware appearing more than once, the route-level entry
/// is the more specific one and replaces the application-level entry in
/// place when reorderable. A non-reorderable duplicate fails the binding.
pub fn merge_middlewares(
    route_level: &[MiddlewareHandle],
    app_level: &[MiddlewareHandle],
) -> Result<Vec<MiddlewareHandle>> {
    let mut merged: Vec<MiddlewareHandle> = Vec::with_capacity(app_level.len() + route_level.len());
    let app_len = app_level.len();

    for (i, mw) in app_level.iter().chain(route_level).enumerate() {
        let from_route = i >= app_len;
        if !mw.meta().unique {
            merged.push(mw.clone());
            continue;
        }
        let Some(pos) = merged.iter().position(|m| m.same_kind(mw)) else {
            merged.push(mw.clone());
            continue;
        };
        if !mw.meta().reorderable || !merged[pos].meta().reorderable {
            return Err(BindError::DuplicateMiddleware {
                middleware: mw.name().to_string(),
            });
        }
        tracing::debug!(
            middleware = mw.name(),
            position = pos,
            from_route,
            "deduplicating reorderable middleware"
        );
        if from_route {
            merged[pos] = mw.clone();
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::Param;
    use crate::middleware::{Middleware, MiddlewareMeta};

    struct Tagged {
        tag: &'static str,
        reorderable: bool,
        unique: bool,
    }

    impl Middleware for Tagged {
        fn meta(&self) -> MiddlewareMeta {
            MiddlewareMeta::new(self.tag)
                .unique(self.unique)
                .reorderable(self.reorderable)
                .request_phase([Param::required("next")])
        }
    }

    struct Other;

    impl Middleware for Other {
        fn meta(&self) -> MiddlewareMeta {
            MiddlewareMeta::new("Other").request_phase([Param::required("next")])
        }
    }

    fn tagged(tag: &'static str, reorderable: bool, unique: bool) -> MiddlewareHandle {
        MiddlewareHandle::new(Tagged {
            tag,
            reorderable,
            unique,
        })
    }

    fn names(list: &[MiddlewareHandle]) -> Vec<&str> {
        list.iter().map(MiddlewareHandle::name).collect()
    }

    #[test]
    fn test_app_entries_come_first() {
        let app = vec![MiddlewareHandle::new(Other)];
        let route = vec![tagged("route", true, true)];
        let merged = merge_middlewares(&route, &app).unwrap();
        assert_eq!(names(&merged), vec!["Other", "route"]);
    }

    #[test]
    fn test_route_level_replaces_reorderable_duplicate_in_place() {
        let app = vec![tagged("app", true, true), MiddlewareHandle::new(Other)];
        let route = vec![tagged("route", true, true)];
        let merged = merge_middlewares(&route, &app).unwrap();
        assert_eq!(names(&merged), vec!["route", "Other"]);
    }

    #[test]
    fn test_non_reorderable_duplicate_fails() {
        let app = vec![tagged("app", false, true)];
        let route = vec![tagged("route", false, true)];
        let err = merge_middlewares(&route, &app).unwrap_err();
        assert!(matches!(err, BindError::DuplicateMiddleware { ref middleware } if middleware == "route"));
    }

    #[test]
    fn test_non_unique_middleware_may_repeat() {
        let app = vec![tagged("a", false, false)];
        let route = vec![tagged("b", false, false)];
        let merged = merge_middlewares(&route, &app).unwrap();
        assert_eq!(names(&merged), vec!["a", "b"]);
    }
}
