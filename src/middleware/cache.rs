//! In-memory response cache keyed by a request fingerprint. A shared
//! auxiliary store: the concurrent map handles cross-task access, so no
//! critical section is needed around its get/insert.

use crate::http::{Method, QueryValue, Request, Response, ResponseBody};
use crate::middleware::{Middleware, MiddlewareResult, Next};
use moka::future::Cache;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Clone)]
pub struct CacheConfig {
    pub max_capacity: u64,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 1024,
            ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Clone)]
struct CachedResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

/// Caches successful GET responses with buffered bodies. File and stream
/// bodies are never cached; they are consumed on materialization.
pub struct CacheMiddleware {
    cache: Cache<String, CachedResponse>,
}

impl CacheMiddleware {
    pub fn new(config: CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.ttl)
            .build();
        Self { cache }
    }

    /// method + path + query in sorted key order, so equivalent requests
    /// with reordered query strings share an entry.
    fn fingerprint(req: &Request) -> String {
        let mut query: Vec<(&String, &QueryValue)> = req.query.iter().collect();
        query.sort_by_key(|(k, _)| k.as_str());
        let mut fingerprint = format!("{} {}", req.method.as_str(), req.path);
        for (key, value) in query {
            for v in value.all() {
                fingerprint.push_str(&format!("&{key}={v}"));
            }
        }
        fingerprint
    }

    fn snapshot(response: &Response) -> Option<CachedResponse> {
        let body = match &response.body {
            ResponseBody::Text(text) => text.as_bytes().to_vec(),
            ResponseBody::Bytes(bytes) => bytes.clone(),
            ResponseBody::Json(value) => serde_json::to_vec(value).ok()?,
            _ => return None,
        };
        Some(CachedResponse {
            status: response.status,
            headers: response.headers.clone(),
            body,
        })
    }

    fn restore(cached: CachedResponse) -> Response {
        let mut response = Response::new(cached.status);
        for (name, value) in cached.headers {
            response.header(name, value);
        }
        response.body = ResponseBody::Bytes(cached.body);
        response
    }
}

impl Middleware for CacheMiddleware {
    fn call(&self, req: Request, next: Next) -> MiddlewareResult {
        let cache = self.cache.clone();
        Box::pin(async move {
            if req.method != Method::GET {
                return next.handle(req).await;
            }
            let key = Self::fingerprint(&req);
            if let Some(cached) = cache.get(&key).await {
                let mut response = Self::restore(cached);
                response.header("X-Cache", "hit");
                return Ok(response);
            }

            let response = next.handle(req).await?;
            if response.status == 200 {
                if let Some(snapshot) = Self::snapshot(&response) {
                    cache.insert(key, snapshot).await;
                }
            }
            Ok(response)
        })
    }

    fn clone_box(&self) -> Box<dyn Middleware> {
        Box::new(Self {
            cache: self.cache.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_handler(hits: Arc<AtomicUsize>) -> Box<dyn Handler> {
        Box::new(move |_req: Request| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(Response::text("payload"))
            }
        })
    }

    #[tokio::test]
    async fn second_get_is_served_from_cache() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mws: Vec<Box<dyn Middleware>> =
            vec![Box::new(CacheMiddleware::new(CacheConfig::default()))];

        let first = crate::middleware::run(
            &mws,
            &[],
            counting_handler(hits.clone()),
            Request::new(Method::GET, "/cached"),
        )
        .await
        .unwrap();
        assert_eq!(first.status, 200);

        // moka's insert is visible after run_pending_tasks via get; a short
        // yield lets the write settle.
        tokio::task::yield_now().await;

        let second = crate::middleware::run(
            &mws,
            &[],
            counting_handler(hits.clone()),
            Request::new(Method::GET, "/cached"),
        )
        .await
        .unwrap();
        assert_eq!(second.headers.get("X-Cache").map(String::as_str), Some("hit"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_get_requests_bypass_the_cache() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mws: Vec<Box<dyn Middleware>> =
            vec![Box::new(CacheMiddleware::new(CacheConfig::default()))];

        for _ in 0..2 {
            crate::middleware::run(
                &mws,
                &[],
                counting_handler(hits.clone()),
                Request::new(Method::POST, "/cached"),
            )
            .await
            .unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fingerprint_is_stable_under_query_reordering() {
        let mut a = Request::new(Method::GET, "/items");
        a.query.insert("b".into(), QueryValue::Single("2".into()));
        a.query.insert("a".into(), QueryValue::Single("1".into()));
        let mut b = Request::new(Method::GET, "/items");
        b.query.insert("a".into(), QueryValue::Single("1".into()));
        b.query.insert("b".into(), QueryValue::Single("2".into()));
        assert_eq!(CacheMiddleware::fingerprint(&a), CacheMiddleware::fingerprint(&b));
    }
}
