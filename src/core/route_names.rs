use std::collections::HashMap;

use axum::http::Method;

/// Read-only `(method, path template) -> route name` table.
///
/// Route names identify an endpoint independently of its URL, which is what the
/// redaction policy is keyed on.
#[derive(Debug, Clone, Default)]
pub struct RouteNames {
    names: HashMap<(Method, String), String>,
}

impl RouteNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, method: Method, path: impl Into<String>, name: impl Into<String>) {
        self.names.insert((method, path.into()), name.into());
    }

    /// Name of the route matched by `path` (a template such as `/v1/users/{id}`).
    pub fn lookup(&self, method: &Method, path: &str) -> Option<&str> {
        self.names
            .get(&(method.clone(), path.to_string()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
