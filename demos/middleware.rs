//! Middleware example for Trellis
//!
//! This example demonstrates how to create and use middleware for:
//! - Logging requests
//! - Authentication (short-circuiting)
//! - CORS handling

use std::time::Instant;
use trellis::app::Application;
use trellis::middleware::{Cors, CorsConfig, Middleware, MiddlewareResult, Next};
use trellis::{ok_json, Response, ServerError};

// Logger middleware that tracks request duration
struct Logger;

impl Middleware for Logger {
    fn call(&self, req: trellis::Request, next: Next) -> MiddlewareResult {
        Box::pin(async move {
            let start = Instant::now();
            let path = req.path.clone();
            let method = req.method;
            let res = next.handle(req).await;
            let status = match &res {
                Ok(res) => res.status,
                Err(err) => err.status_code(),
            };
            let duration = start.elapsed().as_millis();
            tracing::info!("[{status}] {} {path} - {duration}ms", method.as_str());
            res
        })
    }

    fn clone_box(&self) -> Box<dyn Middleware> {
        Box::new(Self)
    }
}

// Simple auth middleware: requests without a bearer token never reach the
// handler.
struct AuthMiddleware;

impl Middleware for AuthMiddleware {
    fn call(&self, req: trellis::Request, next: Next) -> MiddlewareResult {
        Box::pin(async move {
            match req.header("authorization") {
                Some(token) if token.starts_with("Bearer ") => next.handle(req).await,
                _ => Err(ServerError::Unauthorized("Authentication required".to_string())),
            }
        })
    }

    fn clone_box(&self) -> Box<dyn Middleware> {
        Box::new(Self)
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let mut app = Application::new();

    // Global middleware wraps every matched route.
    app.middleware(Logger);
    app.middleware(Cors::new(CorsConfig::default()));

    // Public route - no auth required
    app.get("/public", |_req| async {
        Ok(Response::text("This is a public endpoint"))
    });

    // Protected routes behind the auth middleware
    app.group("/api", vec![Box::new(AuthMiddleware)], |r| {
        r.get("/profile", |_req| async {
            ok_json!({
                "name": "User",
                "email": "user@example.com"
            })
        });
    });

    app.listen("127.0.0.1:3000").expect("Server failed to start");
}
