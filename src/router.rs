//! Route matcher: glob-style route patterns with `:name` placeholders,
//! compiled once at registration instead of re-parsed per lookup.
//!
//! Rather than pull in `regex` for this, matching is hand-rolled
//! against the small subset patterns actually need: an anchored,
//! segment-by-segment comparison.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A single compiled route pattern, e.g. `/users/:id/posts`.
#[derive(Debug, Clone)]
pub struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn compile(pattern: &str) -> Pattern {
        let segments = pattern
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if let Some(name) = s.strip_prefix(':') {
                    Segment::Param(name.to_string())
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Pattern { segments }
    }

    fn matches<'a>(&self, path_segments: &[&'a str]) -> Option<Vec<(String, String)>> {
        if self.segments.len() != path_segments.len() {
            return None;
        }
        let mut params = Vec::new();
        for (seg, actual) in self.segments.iter().zip(path_segments) {
            match seg {
                Segment::Literal(lit) => {
                    if lit != actual {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.push((name.clone(), actual.to_string()));
                }
            }
        }
        Some(params)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}

/// One `(method, pattern, endpoint key)` registration. The endpoint
/// key follows the `<METHOD>_<pattern>` convention.
struct Route {
    method: String,
    pattern: Pattern,
    endpoint_key: String,
}

/// A compiled route table: registration order decides match priority
/// (first match wins).
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> RouteTable {
        RouteTable { routes: Vec::new() }
    }

    /// Register a route. `pattern` uses `:name` placeholders; the
    /// endpoint key is derived as `<METHOD>_<pattern>`.
    pub fn register(&mut self, method: &str, pattern: &str) -> String {
        let method = method.to_ascii_uppercase();
        let endpoint_key = format!("{}_{}", method, pattern);
        self.routes.push(Route {
            method,
            pattern: Pattern::compile(pattern),
            endpoint_key: endpoint_key.clone(),
        });
        endpoint_key
    }

    /// Find the first route whose method matches (case-insensitively
    /// uppercased) and whose pattern matches `path`, returning its
    /// endpoint key and the extracted `:name` bindings.
    pub fn find(&self, method: &str, path: &str) -> Option<(&str, Vec<(String, String)>)> {
        let method = method.to_ascii_uppercase();
        let path_segments = split_path(path);
        for route in &self.routes {
            if route.method != method {
                continue;
            }
            if let Some(params) = route.pattern.matches(&path_segments) {
                return Some((route.endpoint_key.as_str(), params));
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::RouteTable;

    #[test]
    fn matches_literal_and_param_segments() {
        let mut table = RouteTable::new();
        table.register("GET", "/users/:id");
        let (key, params) = table.find("GET", "/users/42").unwrap();
        assert_eq!(key, "GET_/users/:id");
        assert_eq!(params, vec![("id".to_string(), "42".to_string())]);
    }

    #[test]
    fn no_match_returns_none() {
        let mut table = RouteTable::new();
        table.register("GET", "/users/:id");
        assert!(table.find("GET", "/users/42/posts").is_none());
        assert!(table.find("POST", "/users/42").is_none());
    }

    #[test]
    fn first_registered_wins_on_overlap() {
        let mut table = RouteTable::new();
        table.register("GET", "/users/new");
        table.register("GET", "/users/:id");
        let (key, params) = table.find("GET", "/users/new").unwrap();
        assert_eq!(key, "GET_/users/new");
        assert!(params.is_empty());
    }

    #[test]
    fn method_is_case_insensitive_at_lookup() {
        let mut table = RouteTable::new();
        table.register("get", "/");
        assert!(table.find("GET", "/").is_some());
    }
}
