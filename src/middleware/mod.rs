//! Middleware contract and the pipeline executor.
//!
//! A middleware receives the request context and a `Next` continuation. It
//! may pass through, transform the response after awaiting `next`, or
//! short-circuit by never calling `next` at all. The executor composes the
//! global list, the matched route's list and the terminal handler into one
//! continuation chain: globals run first on the way in, and any
//! post-processing runs in reverse order on the way out.

mod cache;
mod compression;
mod security;

pub use cache::{CacheConfig, CacheMiddleware};
pub use compression::{CompressionConfig, CompressionMiddleware};
pub use security::{Cors, CorsConfig, RateLimitConfig, RateLimiter, SecurityConfig, SecurityHeaders};

use crate::handler::{Handler, HttpResponse, IntoResponse};
use crate::http::Request;
use futures::future::BoxFuture;

/// The continuation handed to each middleware; invoking it advances the
/// chain toward the terminal handler.
#[derive(Clone)]
pub struct Next {
    handler: Box<dyn Handler>,
}

impl Next {
    pub fn new<F, R>(handler: F) -> Self
    where
        F: Fn(Request) -> R + Send + Sync + Clone + 'static,
        R: IntoResponse,
    {
        Self {
            handler: Box::new(handler),
        }
    }

    pub(crate) fn new_handler(handler: Box<dyn Handler>) -> Self {
        Self { handler }
    }

    pub async fn handle(&self, req: Request) -> HttpResponse {
        self.handler.handle(req).await
    }
}

pub type MiddlewareResult = BoxFuture<'static, HttpResponse>;

pub trait Middleware: Send + Sync + 'static {
    fn call(&self, req: Request, next: Next) -> MiddlewareResult;
    fn clone_box(&self) -> Box<dyn Middleware>;
}

impl Clone for Box<dyn Middleware> {
    fn clone(&self) -> Box<dyn Middleware> {
        self.clone_box()
    }
}

/// Executes one request through `globals ++ route ++ handler`. The chain is
/// rebuilt per request by folding the combined list in reverse, so the first
/// middleware in the list is the outermost layer of the onion.
pub(crate) async fn run(
    globals: &[Box<dyn Middleware>],
    route: &[Box<dyn Middleware>],
    handler: Box<dyn Handler>,
    req: Request,
) -> HttpResponse {
    let mut next = Next::new_handler(handler);
    for middleware in globals.iter().chain(route.iter()).rev() {
        let middleware = middleware.clone();
        next = Next::new_handler(Box::new(move |req| middleware.call(req, next.clone())));
    }
    next.handle(req).await
}
