//! Route table and declarative registration.
//!
//! Exact-literal routes live in a path-keyed map consulted first at match
//! time; routes with dynamic segments live in a flat list scanned in
//! registration order, so precedence between overlapping dynamic routes is
//! decided by whoever registered first. Registration happens during
//! startup; the table is read-only once the server begins accepting.

mod matcher;
pub mod pattern;

pub use matcher::RouteMatch;
pub use pattern::{CompileError, CompiledPattern, Segment};

use crate::handler::{Handler, IntoResponse};
use crate::http::request::normalize_path;
use crate::http::{Method, Request};
use crate::middleware::Middleware;
use std::collections::HashMap;

pub(crate) struct RouteEntry {
    pub(crate) method: Method,
    pub(crate) pattern: CompiledPattern,
    pub(crate) handler: Box<dyn Handler>,
    pub(crate) middlewares: Vec<Box<dyn Middleware>>,
}

pub struct Router {
    /// Shared by every route registered on this router; the grouping
    /// mechanism for controller-style modules.
    middlewares: Vec<Box<dyn Middleware>>,
    exact: HashMap<String, HashMap<Method, RouteEntry>>,
    dynamic: Vec<RouteEntry>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
            exact: HashMap::new(),
            dynamic: Vec::new(),
        }
    }

    pub fn get<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Request) -> R + Send + Clone + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.register(Method::GET, path, handler, Vec::new())
    }

    pub fn post<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Request) -> R + Send + Clone + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.register(Method::POST, path, handler, Vec::new())
    }

    pub fn put<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Request) -> R + Send + Clone + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.register(Method::PUT, path, handler, Vec::new())
    }

    pub fn patch<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Request) -> R + Send + Clone + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.register(Method::PATCH, path, handler, Vec::new())
    }

    pub fn delete<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Request) -> R + Send + Clone + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.register(Method::DELETE, path, handler, Vec::new())
    }

    pub fn head<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Request) -> R + Send + Clone + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.register(Method::HEAD, path, handler, Vec::new())
    }

    pub fn options<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Request) -> R + Send + Clone + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.register(Method::OPTIONS, path, handler, Vec::new())
    }

    /// Registers one route: method, path, handler, plus middlewares that
    /// apply to this route only (appended after the router's shared set).
    pub fn register<F, R>(
        &mut self,
        method: Method,
        path: &str,
        handler: F,
        middlewares: Vec<Box<dyn Middleware>>,
    ) -> &mut Self
    where
        F: Fn(Request) -> R + Send + Sync + Clone + 'static,
        R: IntoResponse + 'static,
    {
        let mut combined = self.middlewares.clone();
        combined.extend(middlewares);
        self.add_entry(method, path, Box::new(handler), combined);
        self
    }

    /// Middleware shared by every route subsequently registered on this
    /// router (and by mounted sub-routers).
    pub fn middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.middlewares.push(Box::new(middleware));
        self
    }

    /// Controller-style grouping: a shared path prefix and middleware set
    /// around a batch of registrations.
    ///
    /// ```ignore
    /// router.group("/admin", vec![Box::new(auth)], |r| {
    ///     r.get("/stats", stats_handler);
    ///     r.delete("/users/[id]", delete_user);
    /// });
    /// ```
    pub fn group<F>(&mut self, prefix: &str, middlewares: Vec<Box<dyn Middleware>>, build: F)
    where
        F: FnOnce(&mut Router),
    {
        let mut scoped = Router::new();
        scoped.middlewares = middlewares;
        build(&mut scoped);
        self.mount(prefix, scoped);
    }

    /// Mounts a router under a prefix. Paths are joined with duplicate
    /// slashes collapsed; this router's shared middlewares wrap the mounted
    /// routes' own.
    pub fn mount(&mut self, prefix: &str, router: Router) {
        let Router { exact, dynamic, .. } = router;
        let exact_entries = exact
            .into_values()
            .flat_map(|by_method| by_method.into_values());
        for entry in exact_entries.chain(dynamic) {
            let path = join_paths(prefix, &entry.pattern.to_string());
            let mut middlewares = self.middlewares.clone();
            middlewares.extend(entry.middlewares);
            self.add_entry(entry.method, &path, entry.handler, middlewares);
        }
    }

    /// Table insertion with the final middleware list already assembled. A
    /// malformed pattern is a fatal startup error; a shape-equal
    /// re-registration for the same method replaces the earlier route and
    /// logs a shadowing diagnostic.
    pub(crate) fn add_entry(
        &mut self,
        method: Method,
        path: &str,
        handler: Box<dyn Handler>,
        middlewares: Vec<Box<dyn Middleware>>,
    ) {
        let pattern = match CompiledPattern::compile(path) {
            Ok(pattern) => pattern,
            Err(err) => panic!("fatal route registration for `{} {}`: {}", method.as_str(), path, err),
        };
        let entry = RouteEntry {
            method,
            pattern,
            handler,
            middlewares,
        };

        if let Some(literal) = entry.pattern.literal_path() {
            let by_method = self.exact.entry(literal.clone()).or_default();
            if by_method.insert(method, entry).is_some() {
                tracing::warn!(
                    "route {} {} shadows an earlier registration; last one wins",
                    method.as_str(),
                    literal
                );
            } else {
                tracing::debug!("registered route {} {}", method.as_str(), literal);
            }
            return;
        }

        let shadowed = self
            .dynamic
            .iter()
            .position(|existing| existing.method == method && existing.pattern.equal_shape(&entry.pattern));
        match shadowed {
            Some(pos) => {
                tracing::warn!(
                    "route {} {} shadows an earlier registration; last one wins",
                    method.as_str(),
                    entry.pattern
                );
                self.dynamic[pos] = entry;
            }
            None => {
                tracing::debug!("registered route {} {}", method.as_str(), entry.pattern);
                self.dynamic.push(entry);
            }
        }
    }

    pub fn route_count(&self) -> usize {
        self.exact.values().map(HashMap::len).sum::<usize>() + self.dynamic.len()
    }

    pub(crate) fn exact_table(&self) -> &HashMap<String, HashMap<Method, RouteEntry>> {
        &self.exact
    }

    pub(crate) fn dynamic_entries(&self) -> &[RouteEntry] {
        &self.dynamic
    }
}

/// Joins a mount prefix and a route path: duplicate slashes collapse, the
/// result always leads with a slash, and an empty result maps to `/`.
pub(crate) fn join_paths(prefix: &str, path: &str) -> String {
    let joined = format!("{prefix}/{path}");
    let mut result = String::new();
    for part in joined.split('/') {
        if part.is_empty() {
            continue;
        }
        result.push('/');
        result.push_str(part);
    }
    normalize_path(&result)
}
