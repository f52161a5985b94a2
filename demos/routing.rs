//! Routing example for Trellis
//!
//! This example demonstrates different routing techniques including:
//! - Basic routes
//! - Path parameters
//! - Query parameters
//! - Controller-style grouping

use serde::{Deserialize, Serialize};
use trellis::{Response, Router, ServerError};
use trellis::app::Application;

#[derive(Serialize, Deserialize)]
struct User {
    name: String,
    role: String,
}

fn main() {
    tracing_subscriber::fmt::init();

    let mut app = Application::new();

    // Basic GET route
    app.get("/", |_req| async {
        Ok(Response::text("Welcome to the Trellis API server!"))
    });

    // Route with a path parameter
    app.get("/users/[id]", |req| async move {
        let user_id = req.param("id").unwrap_or("unknown");
        Ok(Response::text(format!("User ID: {user_id}")))
    });

    // POST request with a JSON body
    app.post("/users", |req| async move {
        match req.body.json::<User>() {
            Some(user) => Response::created(&user),
            None => Err(ServerError::BadRequest("Invalid JSON body".to_string())),
        }
    });

    // Query parameters: /search?tag=a&tag=b
    app.get("/search", |req| async move {
        let tags: Vec<String> = req
            .query
            .get("tag")
            .map(|v| v.all().into_iter().map(str::to_string).collect())
            .unwrap_or_default();
        Response::ok(&tags)
    });

    // Group routes under an /api prefix
    let mut api = Router::new();
    api.get("/status", |_req| async {
        Response::ok(&trellis::json!({
            "status": "operational",
            "version": "1.0.0"
        }))
    });
    app.mount("/api", api);

    app.listen("127.0.0.1:3000").expect("Server failed to start")
}
