//! Route table mapping `(method, path pattern)` to handlers.
//!
//! Patterns are `/`-delimited; a segment starting with `:` binds the path
//! segment at the same position under that name. Resolution tries exact
//! patterns first and then parameterized ones, and registration refuses any
//! pair of parameterized patterns that could both match the same path, so
//! the result never depends on registration order.

use super::Method;
use crate::error::RouteError;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

impl Segment {
    /// Whether some single path segment could match both.
    fn overlaps(&self, other: &Segment) -> bool {
        match (self, other) {
            (Segment::Literal(a), Segment::Literal(b)) => a == b,
            _ => true,
        }
    }
}

#[derive(Debug)]
struct ParamRoute<H> {
    pattern: String,
    segments: Vec<Segment>,
    handler: H,
}

#[derive(Debug)]
struct MethodRoutes<H> {
    exact: HashMap<String, H>,
    parameterized: Vec<ParamRoute<H>>,
}

impl<H> Default for MethodRoutes<H> {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            parameterized: Vec::new(),
        }
    }
}

/// A resolved route.
#[derive(Debug)]
pub struct RouteMatch<'a, H> {
    pub handler: &'a H,
    pub params: HashMap<String, String>,
}

/// Route table generic over the handler type.
#[derive(Debug)]
pub struct Router<H> {
    routes: HashMap<Method, MethodRoutes<H>>,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Router<H> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    pub fn register(&mut self, method: Method, pattern: &str, handler: H) -> Result<(), RouteError> {
        if !pattern.starts_with('/') {
            return Err(RouteError::InvalidPattern(pattern.to_string()));
        }

        let segments = parse_pattern(pattern)?;
        let routes = self.routes.entry(method.clone()).or_default();
        let is_parameterized = segments.iter().any(|s| matches!(s, Segment::Param(_)));

        if !is_parameterized {
            if routes.exact.contains_key(pattern) {
                return Err(RouteError::Duplicate {
                    method: method.to_string(),
                    pattern: pattern.to_string(),
                });
            }
            routes.exact.insert(pattern.to_string(), handler);
            return Ok(());
        }

        for existing in &routes.parameterized {
            if existing.segments.len() == segments.len()
                && existing.segments.iter().zip(&segments).all(|(a, b)| a.overlaps(b))
            {
                if existing.pattern == pattern {
                    return Err(RouteError::Duplicate {
                        method: method.to_string(),
                        pattern: pattern.to_string(),
                    });
                }
                return Err(RouteError::Ambiguous {
                    method: method.to_string(),
                    pattern: pattern.to_string(),
                    existing: existing.pattern.clone(),
                });
            }
        }

        routes.parameterized.push(ParamRoute {
            pattern: pattern.to_string(),
            segments,
            handler,
        });
        Ok(())
    }

    /// Finds the handler for `path`, binding any `:name` segments.
    ///
    /// Parameters only bind non-empty segments, so `/api/data/` does not
    /// match `/api/data/:key`.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch<'_, H>> {
        let routes = self.routes.get(method)?;

        if let Some(handler) = routes.exact.get(path) {
            return Some(RouteMatch {
                handler,
                params: HashMap::new(),
            });
        }

        let parts: Vec<&str> = path.split('/').collect();
        routes.parameterized.iter().find_map(|route| {
            if route.segments.len() != parts.len() {
                return None;
            }
            let mut params = HashMap::new();
            for (segment, part) in route.segments.iter().zip(&parts) {
                match segment {
                    Segment::Literal(literal) if literal == part => {}
                    Segment::Param(name) if !part.is_empty() => {
                        params.insert(name.clone(), (*part).to_string());
                    }
                    _ => return None,
                }
            }
            Some(RouteMatch {
                handler: &route.handler,
                params,
            })
        })
    }
}

fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, RouteError> {
    pattern
        .split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some("") => Err(RouteError::InvalidPattern(pattern.to_string())),
            Some(name) => Ok(Segment::Param(name.to_string())),
            None => Ok(Segment::Literal(segment.to_string())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(routes: &[(Method, &str, &'static str)]) -> Router<&'static str> {
        let mut router = Router::new();
        for (method, pattern, name) in routes {
            router.register(method.clone(), pattern, *name).unwrap();
        }
        router
    }

    #[test]
    fn test_exact_match() {
        let router = router(&[(Method::Get, "/status", "status"), (Method::Get, "/api/data", "all")]);
        let found = router.resolve(&Method::Get, "/api/data").unwrap();
        assert_eq!(*found.handler, "all");
        assert!(found.params.is_empty());
        assert!(router.resolve(&Method::Post, "/api/data").is_none());
        assert!(router.resolve(&Method::Get, "/api/other").is_none());
    }

    #[test]
    fn test_param_binding() {
        let router = router(&[
            (Method::Get, "/api/data/:key", "one"),
            (Method::Get, "/teams/:team/members/:member", "member"),
        ]);

        for key in ["score", "a.b", "%20", "日本", "x-y_z"] {
            let found = router.resolve(&Method::Get, &format!("/api/data/{key}")).unwrap();
            assert_eq!(*found.handler, "one");
            assert_eq!(found.params.get("key").map(String::as_str), Some(key));
        }

        let found = router.resolve(&Method::Get, "/teams/red/members/42").unwrap();
        assert_eq!(*found.handler, "member");
        assert_eq!(found.params["team"], "red");
        assert_eq!(found.params["member"], "42");
    }

    #[test]
    fn test_segment_count_must_match() {
        let router = router(&[(Method::Get, "/api/data/:key", "one")]);
        assert!(router.resolve(&Method::Get, "/api/data/a/b").is_none());
        assert!(router.resolve(&Method::Get, "/api/data").is_none());
        assert!(router.resolve(&Method::Get, "/api/data/").is_none());
    }

    #[test]
    fn test_exact_beats_parameterized_regardless_of_order() {
        let mut param_first = Router::new();
        param_first.register(Method::Get, "/api/data/:key", "param").unwrap();
        param_first.register(Method::Get, "/api/data/stats", "exact").unwrap();

        let mut exact_first = Router::new();
        exact_first.register(Method::Get, "/api/data/stats", "exact").unwrap();
        exact_first.register(Method::Get, "/api/data/:key", "param").unwrap();

        for router in [&param_first, &exact_first] {
            assert_eq!(*router.resolve(&Method::Get, "/api/data/stats").unwrap().handler, "exact");
            assert_eq!(*router.resolve(&Method::Get, "/api/data/score").unwrap().handler, "param");
        }
    }

    #[test]
    fn test_rejects_duplicates_and_overlaps() {
        let mut router = Router::new();
        router.register(Method::Get, "/status", 1).unwrap();
        router.register(Method::Get, "/a/:x", 2).unwrap();

        assert!(matches!(
            router.register(Method::Get, "/status", 3),
            Err(RouteError::Duplicate { .. })
        ));
        assert!(matches!(
            router.register(Method::Get, "/a/:x", 4),
            Err(RouteError::Duplicate { .. })
        ));
        assert_eq!(
            router.register(Method::Get, "/a/:y", 5),
            Err(RouteError::Ambiguous {
                method: "GET".to_string(),
                pattern: "/a/:y".to_string(),
                existing: "/a/:x".to_string(),
            })
        );
        assert!(matches!(
            router.register(Method::Get, "/:z/b", 6),
            Err(RouteError::Ambiguous { .. })
        ));

        // Different literal or method: no overlap
        router.register(Method::Get, "/b/:x", 7).unwrap();
        router.register(Method::Post, "/a/:x", 8).unwrap();
    }

    #[test]
    fn test_invalid_patterns() {
        let mut router = Router::new();
        assert!(matches!(
            router.register(Method::Get, "status", ()),
            Err(RouteError::InvalidPattern(_))
        ));
        assert!(matches!(
            router.register(Method::Get, "/a/:", ()),
            Err(RouteError::InvalidPattern(_))
        ));
    }
}
