//! # Trellis
//!
//! A lightweight request routing and dispatch engine for Rust.
//!
//! ## Features
//!
//! - Route discovery from a filesystem convention (`users/[id]/route`) and
//!   from explicit declarative registration
//! - Dynamic path segments with parameter extraction
//! - Composable middleware pipeline (logging, auth, CORS, rate limiting,
//!   compression, response caching) with short-circuit support
//! - JSON, form, multipart and raw-text request bodies
//! - JSON, file and streaming responses
//! - Static file serving checked before routing
//! - Async/await throughout
//!
//! ## Quick Start
//!
//! ```rust
//! use trellis::app::Application;
//! use trellis::ok_json;
//!
//! fn main() {
//!     let mut app = Application::new();
//!
//!     app.get("/", |_req| async {
//!         ok_json!({
//!             "message": "Hello, World!"
//!         })
//!     });
//!
//!     // Start server
//!     // app.listen("127.0.0.1:3000").unwrap();
//! }
//! ```
//!
//! ## Filesystem Routes
//!
//! ```rust,no_run
//! use trellis::app::Application;
//! use trellis::loader::{FsLoader, ModuleRegistry, RouteModule};
//! use trellis::http::Response;
//!
//! let mut registry = ModuleRegistry::new();
//! registry.module(
//!     "users/[id]/route",
//!     RouteModule::new().export("GET", |req: trellis::http::Request| async move {
//!         Ok(Response::text(format!("user {}", req.param("id").unwrap_or(""))))
//!     }),
//! );
//!
//! let mut app = Application::new();
//! app.load_routes(&FsLoader::new("app/routes", registry));
//! ```

pub mod app;
pub mod error;
pub mod extensions;
pub mod handler;
pub mod http;
pub mod loader;
pub mod middleware;
pub mod router;

pub use app::Application;
pub use error::{ServerError, ServerResult};
pub use http::{Body, Method, Request, Response};
pub use router::Router;

// Reexport serde_json
pub use serde_json::{json, Value};
