//! Filesystem route discovery.
//!
//! The URL space is derived from a routes directory: directory names become
//! path segments, `[name]` directories become dynamic captures, and a
//! `route`/`index` file maps to its directory's own path. There is no
//! runtime module import: route modules are ordinary values registered in
//! a [`ModuleRegistry`] under their extensionless path relative to the
//! routes root (`users/[id]/route`), and the directory walk resolves each
//! discovered file against that registry. The walk therefore decides which
//! routes exist and in which order they are registered; the registry
//! supplies the handlers.
//!
//! Discovery is deterministic: directory entries are processed in
//! lexicographic name order, so dynamic-match precedence is reproducible
//! across runs.

use crate::handler::{Handler, IntoResponse};
use crate::http::{Method, Request};
use crate::router::Router;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The HTTP methods a route module may export.
const SUPPORTED_METHODS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
    Method::HEAD,
];

/// One route module: the handlers a route file exports, keyed by method
/// name. Binding names are matched case-insensitively against the
/// supported methods; anything else is ignored at load time.
#[derive(Default, Clone)]
pub struct RouteModule {
    exports: Vec<(String, Box<dyn Handler>)>,
}

impl RouteModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export<F, R>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Request) -> R + Send + Sync + Clone + 'static,
        R: IntoResponse + 'static,
    {
        self.exports.push((name.to_string(), Box::new(handler)));
        self
    }
}

/// Startup-time map from extensionless relative file path to route module.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, RouteModule>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(&mut self, key: &str, module: RouteModule) -> &mut Self {
        self.modules.insert(key.trim_matches('/').to_string(), module);
        self
    }

    fn resolve(&self, key: &str) -> Option<&RouteModule> {
        self.modules.get(key)
    }
}

pub struct FsLoader {
    root: PathBuf,
    extension: String,
    registry: ModuleRegistry,
}

impl FsLoader {
    pub fn new<P: AsRef<Path>>(root: P, registry: ModuleRegistry) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extension: "rs".to_string(),
            registry,
        }
    }

    /// Overrides the file extension treated as a route source.
    pub fn extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    /// Walks the routes directory and registers every resolved route on the
    /// router. Load problems (missing root, unreadable directory, a file
    /// with no registered module) are warnings that contribute zero routes;
    /// the walk never aborts startup.
    pub fn load(&self, router: &mut Router) {
        if !self.root.is_dir() {
            tracing::warn!(
                "routes directory `{}` does not exist; no filesystem routes loaded",
                self.root.display()
            );
            return;
        }
        let before = router.route_count();
        self.walk(&self.root, &mut Vec::new(), router);
        tracing::info!(
            "loaded {} filesystem route(s) from `{}`",
            router.route_count() - before,
            self.root.display()
        );
    }

    fn walk(&self, dir: &Path, url_segments: &mut Vec<String>, router: &mut Router) {
        let mut entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .collect::<Vec<_>>(),
            Err(err) => {
                tracing::warn!("cannot read routes directory `{}`: {}", dir.display(), err);
                return;
            }
        };
        entries.sort();

        for path in entries {
            if path.is_dir() {
                let name = match path.file_name().and_then(|n| n.to_str()) {
                    Some(name) => name.to_string(),
                    None => continue,
                };
                url_segments.push(name);
                self.walk(&path, url_segments, router);
                url_segments.pop();
            } else if path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str()) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    self.load_file(stem, url_segments, router);
                }
            }
            // Anything else is not a route source.
        }
    }

    fn load_file(&self, stem: &str, url_segments: &[String], router: &mut Router) {
        let mut key_parts = url_segments.to_vec();
        key_parts.push(stem.to_string());
        let key = key_parts.join("/");

        let module = match self.registry.resolve(&key) {
            Some(module) => module,
            None => {
                tracing::warn!("no module registered for route file `{key}`; skipping");
                return;
            }
        };

        // The compiler collapses `route`/`index` stems and turns bracketed
        // segments into captures.
        let raw_path = format!("/{key}");
        for (name, handler) in &module.exports {
            let method = SUPPORTED_METHODS
                .iter()
                .find(|m| m.as_str().eq_ignore_ascii_case(name));
            match method {
                Some(&method) => {
                    router.add_entry(method, &raw_path, handler.clone(), Vec::new());
                }
                None => {
                    tracing::debug!("ignoring non-method export `{name}` in `{key}`");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HttpResponse;
    use crate::http::{Response, ResponseBody};
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn tagged(tag: &'static str) -> impl Fn(Request) -> futures::future::BoxFuture<'static, HttpResponse> + Clone {
        move |_req: Request| Box::pin(async move { Ok(Response::text(tag)) })
    }

    async fn body_text(router: &Router, method: Method, path: &str) -> String {
        let found = router.find(method, path).expect("route should match");
        let response = found.entry.handler.handle(Request::new(method, path)).await.unwrap();
        match response.body {
            ResponseBody::Text(text) => text,
            other => panic!("expected text body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bracket_directories_become_dynamic_captures() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "users/[id]/route.rs");

        let mut registry = ModuleRegistry::new();
        registry.module(
            "users/[id]/route",
            RouteModule::new().export("GET", tagged("user-by-id")),
        );

        let mut router = Router::new();
        FsLoader::new(dir.path(), registry).load(&mut router);

        let found = router.find(Method::GET, "/users/42").unwrap();
        assert_eq!(found.params["id"], "42");
        assert_eq!(body_text(&router, Method::GET, "/users/42").await, "user-by-id");
    }

    #[tokio::test]
    async fn one_route_entry_per_exported_method() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "items/route.rs");

        let mut registry = ModuleRegistry::new();
        registry.module(
            "items/route",
            RouteModule::new()
                .export("get", tagged("list"))
                .export("POST", tagged("create"))
                .export("SUBSCRIBE", tagged("never")),
        );

        let mut router = Router::new();
        FsLoader::new(dir.path(), registry).load(&mut router);

        assert_eq!(router.route_count(), 2);
        assert_eq!(body_text(&router, Method::GET, "/items").await, "list");
        assert_eq!(body_text(&router, Method::POST, "/items").await, "create");
    }

    #[tokio::test]
    async fn index_files_collapse_to_the_directory_path() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "docs/index.rs");

        let mut registry = ModuleRegistry::new();
        registry.module("docs/index", RouteModule::new().export("GET", tagged("docs")));

        let mut router = Router::new();
        FsLoader::new(dir.path(), registry).load(&mut router);

        assert_eq!(body_text(&router, Method::GET, "/docs").await, "docs");
    }

    #[tokio::test]
    async fn bare_files_contribute_their_stem_as_a_segment() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "health.rs");

        let mut registry = ModuleRegistry::new();
        registry.module("health", RouteModule::new().export("GET", tagged("healthy")));

        let mut router = Router::new();
        FsLoader::new(dir.path(), registry).load(&mut router);

        assert_eq!(body_text(&router, Method::GET, "/health").await, "healthy");
    }

    #[tokio::test]
    async fn resolution_order_directory_file_before_bare_file() {
        // `users` (the directory) sorts before `users.rs`, so the bare file
        // registers last and wins the shadowing contest.
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "users/route.rs");
        touch(dir.path(), "users.rs");

        let mut registry = ModuleRegistry::new();
        registry.module("users/route", RouteModule::new().export("GET", tagged("nested")));
        registry.module("users", RouteModule::new().export("GET", tagged("bare")));

        let mut router = Router::new();
        FsLoader::new(dir.path(), registry).load(&mut router);

        assert_eq!(router.route_count(), 1);
        assert_eq!(body_text(&router, Method::GET, "/users").await, "bare");
    }

    #[test]
    fn missing_root_and_unregistered_files_are_warnings_not_failures() {
        let mut router = Router::new();
        FsLoader::new("/nonexistent/routes", ModuleRegistry::new()).load(&mut router);
        assert_eq!(router.route_count(), 0);

        let dir = TempDir::new().unwrap();
        touch(dir.path(), "orphan/route.rs");
        FsLoader::new(dir.path(), ModuleRegistry::new()).load(&mut router);
        assert_eq!(router.route_count(), 0);
    }

    #[test]
    fn non_route_extensions_are_ignored() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "notes.md");
        touch(dir.path(), "assets/logo.png");

        let mut registry = ModuleRegistry::new();
        registry.module("notes", RouteModule::new().export("GET", tagged("nope")));

        let mut router = Router::new();
        FsLoader::new(dir.path(), registry).load(&mut router);
        assert_eq!(router.route_count(), 0);
    }

    #[test]
    fn custom_extension_is_respected() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "ping.ts");

        let mut registry = ModuleRegistry::new();
        registry.module("ping", RouteModule::new().export("GET", tagged("pong")));

        let mut router = Router::new();
        FsLoader::new(dir.path(), registry).extension(".ts").load(&mut router);
        assert_eq!(router.route_count(), 1);
    }
}
