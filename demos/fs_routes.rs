//! Filesystem route discovery example.
//!
//! The routes directory defines the URL space; the module registry supplies
//! the handlers. This demo writes a small routes tree to a temp directory
//! so it is self-contained.

use std::fs;
use trellis::app::Application;
use trellis::loader::{FsLoader, ModuleRegistry, RouteModule};
use trellis::{ok_json, Response};

fn main() {
    tracing_subscriber::fmt::init();

    // app/
    //   index.rs          -> GET /
    //   users/
    //     route.rs        -> GET /users
    //     [id]/route.rs   -> GET /users/[id]
    let root = std::env::temp_dir().join("trellis-fs-routes-demo");
    fs::create_dir_all(root.join("users/[id]")).expect("create routes tree");
    fs::write(root.join("index.rs"), b"").unwrap();
    fs::write(root.join("users/route.rs"), b"").unwrap();
    fs::write(root.join("users/[id]/route.rs"), b"").unwrap();

    let mut registry = ModuleRegistry::new();
    registry.module(
        "index",
        RouteModule::new().export("GET", |_req: trellis::Request| async {
            Ok(Response::text("home"))
        }),
    );
    registry.module(
        "users/route",
        RouteModule::new()
            .export("GET", |_req: trellis::Request| async {
                ok_json!({ "users": ["ada", "grace"] })
            })
            .export("POST", |_req: trellis::Request| async {
                ok_json!({ "created": true })
            }),
    );
    registry.module(
        "users/[id]/route",
        RouteModule::new().export("GET", |req: trellis::Request| async move {
            let id = req.param("id").unwrap_or("?").to_string();
            ok_json!({ "user": id })
        }),
    );

    let mut app = Application::new();
    app.load_routes(&FsLoader::new(&root, registry));

    app.listen("127.0.0.1:3000").expect("Server failed to start");
}
