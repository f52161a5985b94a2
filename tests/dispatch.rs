//! End-to-end dispatch scenarios through the public surface: registration,
//! matching, the middleware pipeline and error containment, without a
//! socket in the loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use trellis::app::Application;
use trellis::loader::{FsLoader, ModuleRegistry, RouteModule};
use trellis::middleware::{Middleware, MiddlewareResult, Next};
use trellis::{Method, Request, Response, ServerError};

fn body_text(response: &Response) -> String {
    match &response.body {
        trellis::http::ResponseBody::Text(text) => text.clone(),
        trellis::http::ResponseBody::Json(value) => value.to_string(),
        other => panic!("expected textual body, got {other:?}"),
    }
}

struct CountingAuth {
    attempts: Arc<AtomicUsize>,
}

impl Middleware for CountingAuth {
    fn call(&self, req: Request, next: Next) -> MiddlewareResult {
        let attempts = self.attempts.clone();
        Box::pin(async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            if req.header("authorization").is_none() {
                return Err(ServerError::Unauthorized("missing credentials".into()));
            }
            next.handle(req).await
        })
    }

    fn clone_box(&self) -> Box<dyn Middleware> {
        Box::new(CountingAuth {
            attempts: self.attempts.clone(),
        })
    }
}

struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Middleware for Recorder {
    fn call(&self, req: Request, next: Next) -> MiddlewareResult {
        let name = self.name;
        let log = self.log.clone();
        Box::pin(async move {
            log.lock().unwrap().push(format!("{name}:in"));
            let res = next.handle(req).await;
            log.lock().unwrap().push(format!("{name}:out"));
            res
        })
    }

    fn clone_box(&self) -> Box<dyn Middleware> {
        Box::new(Recorder {
            name: self.name,
            log: self.log.clone(),
        })
    }
}

#[tokio::test]
async fn declarative_health_route_runs_with_zero_middleware_overhead() {
    let side_effects = Arc::new(AtomicUsize::new(0));

    let mut app = Application::new();
    // Auth protects a different route; /health carries no middleware.
    app.register(
        Method::GET,
        "/admin",
        |_req| async { Ok(Response::text("admin")) },
        vec![Box::new(CountingAuth {
            attempts: side_effects.clone(),
        })],
    );
    app.get("/health", |_req| async { Ok(Response::text("healthy")) });

    let response = app.dispatch(Request::new(Method::GET, "/health")).await;
    assert_eq!(response.status, 200);
    assert_eq!(body_text(&response), "healthy");
    assert_eq!(side_effects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn auth_middleware_short_circuits_before_the_protected_handler() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let handler_hits = Arc::new(AtomicUsize::new(0));

    let mut app = Application::new();
    let hits = handler_hits.clone();
    app.register(
        Method::GET,
        "/private",
        move |_req| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(Response::text("secret"))
            }
        },
        vec![Box::new(CountingAuth {
            attempts: attempts.clone(),
        })],
    );

    let denied = app.dispatch(Request::new(Method::GET, "/private")).await;
    assert_eq!(denied.status, 401);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(handler_hits.load(Ordering::SeqCst), 0);

    let allowed = app
        .dispatch(Request::new(Method::GET, "/private").with_header("Authorization", "Bearer t"))
        .await;
    assert_eq!(allowed.status, 200);
    assert_eq!(handler_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn global_then_route_middleware_onion_order() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut app = Application::new();
    app.middleware(Recorder {
        name: "global",
        log: log.clone(),
    });
    let inner_log = log.clone();
    app.register(
        Method::GET,
        "/ordered",
        move |_req| {
            let log = inner_log.clone();
            async move {
                log.lock().unwrap().push("handler".to_string());
                Ok(Response::text("done"))
            }
        },
        vec![Box::new(Recorder {
            name: "route",
            log: log.clone(),
        })],
    );

    app.dispatch(Request::new(Method::GET, "/ordered")).await;
    assert_eq!(
        *log.lock().unwrap(),
        vec!["global:in", "route:in", "handler", "route:out", "global:out"]
    );
}

#[tokio::test]
async fn filesystem_and_declarative_routes_share_one_table() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("users/[id]")).unwrap();
    std::fs::write(dir.path().join("users/[id]/route.rs"), b"").unwrap();

    let mut registry = ModuleRegistry::new();
    registry.module(
        "users/[id]/route",
        RouteModule::new().export("GET", |req: Request| async move {
            Ok(Response::text(format!("fs user {}", req.param("id").unwrap_or(""))))
        }),
    );

    let mut app = Application::new();
    // Filesystem routes first, declarative second: the documented feeder
    // order.
    app.load_routes(&FsLoader::new(dir.path(), registry));
    app.get("/health", |_req| async { Ok(Response::text("ok")) });

    let fs_hit = app.dispatch(Request::new(Method::GET, "/users/42")).await;
    assert_eq!(body_text(&fs_hit), "fs user 42");
    let decl_hit = app.dispatch(Request::new(Method::GET, "/health")).await;
    assert_eq!(decl_hit.status, 200);
}

#[tokio::test]
async fn percent_encoded_segments_arrive_decoded_in_params() {
    let mut app = Application::new();
    app.get("/files/[name]", |req: Request| async move {
        Ok(Response::text(req.param("name").unwrap_or("").to_string()))
    });

    // The wire target carries the encoded form; the matcher sees the
    // decoded path and captures the decoded value.
    let req = Request::from_wire(
        "GET",
        "/files/annual%20report%202026.pdf",
        Vec::new(),
        Vec::new(),
        Default::default(),
    )
    .unwrap();
    let response = app.dispatch(req).await;
    assert_eq!(body_text(&response), "annual report 2026.pdf");
}

#[tokio::test]
async fn unmatched_method_collapses_into_404() {
    let mut app = Application::new();
    app.get("/resource", |_req| async { Ok(Response::text("here")) });

    // Same path, wrong method: 404 by design, not 405.
    let response = app.dispatch(Request::new(Method::DELETE, "/resource")).await;
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn failing_handler_is_contained_per_request() {
    let mut app = Application::new();
    app.get("/fragile", |_req| async {
        Err::<Response, _>(ServerError::Internal("boom".into()))
    });
    app.get("/stable", |_req| async { Ok(Response::text("fine")) });

    let failed = app.dispatch(Request::new(Method::GET, "/fragile")).await;
    assert_eq!(failed.status, 500);

    // Subsequent requests are unaffected.
    let ok = app.dispatch(Request::new(Method::GET, "/stable")).await;
    assert_eq!(ok.status, 200);
}

#[tokio::test]
async fn middleware_can_inject_derived_data_for_the_handler() {
    struct Principal;
    impl Middleware for Principal {
        fn call(&self, mut req: Request, next: Next) -> MiddlewareResult {
            Box::pin(async move {
                req.set_data("principal", "ada");
                next.handle(req).await
            })
        }
        fn clone_box(&self) -> Box<dyn Middleware> {
            Box::new(Principal)
        }
    }

    let mut app = Application::new();
    app.middleware(Principal);
    app.get("/whoami", |req: Request| async move {
        let who = req
            .get_typed_data::<String>("principal")
            .unwrap_or_else(|| "anonymous".to_string());
        Ok(Response::text(who))
    });

    let response = app.dispatch(Request::new(Method::GET, "/whoami")).await;
    assert_eq!(body_text(&response), "ada");
}
