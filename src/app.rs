//! Application is the main entry point: it owns the route table, the
//! global middleware list and the listening socket, and drives each request
//! through static-file serving, context building, matching, the middleware
//! pipeline and response materialization. Per-request failures are
//! contained here; nothing a handler does can take the process down.
//!
//! # Examples
//!
//! ```rust
//! use trellis::app::Application;
//! use trellis::ok_json;
//!
//! let mut app = Application::new();
//! app.get("/", |_req| async {
//!     ok_json!({ "message": "Hello!" })
//! });
//! ```

use crate::error::{ServerError, ServerResult};
use crate::extensions::Extensions;
use crate::handler::IntoResponse;
use crate::http::response::{Payload, WireResponse};
use crate::http::{Method, Request, Response};
use crate::loader::FsLoader;
use crate::middleware::{self, Middleware};
use crate::router::Router;
use futures::{FutureExt, StreamExt};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader as StdBufReader;
use std::io::{Error, ErrorKind};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio_rustls::TlsAcceptor;

type ErrorHandler = Arc<dyn Fn(ServerError) -> Response + Send + Sync>;

/// TLS configuration for HTTPS support
pub struct TlsConfig {
    cert_file: PathBuf,
    key_file: PathBuf,
}

impl TlsConfig {
    pub fn new<P: AsRef<Path>>(cert_file: P, key_file: P) -> Self {
        Self {
            cert_file: cert_file.as_ref().to_path_buf(),
            key_file: key_file.as_ref().to_path_buf(),
        }
    }

    fn load_certs(&self) -> Result<Vec<CertificateDer<'static>>, Box<dyn std::error::Error>> {
        let cert_file = File::open(&self.cert_file)?;
        let mut reader = StdBufReader::new(cert_file);
        let certs = rustls_pemfile::certs(&mut reader)
            .filter_map(|result| result.ok())
            .collect();
        Ok(certs)
    }

    fn load_key(&self) -> Result<PrivateKeyDer<'static>, Box<dyn std::error::Error>> {
        let key_file = File::open(&self.key_file)?;
        let mut reader = StdBufReader::new(key_file);
        let key = rustls_pemfile::private_key(&mut reader)?
            .ok_or("No private key found")?;
        Ok(key)
    }
}

/// The server shell. Routes and middleware are registered during startup;
/// `listen` freezes the table and begins serving.
#[derive(Clone)]
pub struct Application {
    pub max_connections: usize,
    pub keep_alive: Duration,
    router: Arc<Router>,
    globals: Vec<Box<dyn Middleware>>,
    static_dir: Option<PathBuf>,
    extensions: Extensions,
    on_error: Option<ErrorHandler>,
    tls_config: Option<Arc<TlsConfig>>,
    development: bool,
    request_timeout: Option<Duration>,
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    pub fn new() -> Self {
        Self {
            max_connections: 256,
            keep_alive: Duration::from_secs(5),
            router: Arc::new(Router::new()),
            globals: Vec::new(),
            static_dir: None,
            extensions: Extensions::new(),
            on_error: None,
            tls_config: None,
            development: false,
            request_timeout: None,
        }
    }

    pub fn max_connections(&mut self, max_connections: usize) -> &mut Self {
        self.max_connections = max_connections;
        self
    }

    pub fn keep_alive(&mut self, keep_alive: Duration) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Development mode exposes internal error detail in 500 bodies.
    /// Production responses carry a generic message only.
    pub fn development(&mut self, enabled: bool) -> &mut Self {
        self.development = enabled;
        self
    }

    /// Bounds one request end to end: body read, matching, the middleware
    /// pipeline and materialization. Nothing has been flushed when the
    /// window lapses, so the client receives a clean 504.
    pub fn request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Registers typed application state available to every request via
    /// `req.extensions.get::<T>()`.
    pub fn extension<T>(&mut self, value: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.extensions.insert(value);
        self
    }

    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(ServerError) -> Response + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    fn router_mut(&mut self) -> &mut Router {
        Arc::get_mut(&mut self.router)
            .expect("Cannot register routes after the application has started")
    }

    /// Registers a GET route handler
    pub fn get<F, R>(&mut self, path: &str, handler: F)
    where
        F: Fn(Request) -> R + Send + Clone + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.router_mut().get(path, handler);
    }

    /// Registers a POST route handler
    pub fn post<F, R>(&mut self, path: &str, handler: F)
    where
        F: Fn(Request) -> R + Send + Clone + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.router_mut().post(path, handler);
    }

    /// Registers a PUT route handler
    pub fn put<F, R>(&mut self, path: &str, handler: F)
    where
        F: Fn(Request) -> R + Send + Clone + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.router_mut().put(path, handler);
    }

    /// Registers a PATCH route handler
    pub fn patch<F, R>(&mut self, path: &str, handler: F)
    where
        F: Fn(Request) -> R + Send + Clone + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.router_mut().patch(path, handler);
    }

    /// Registers a DELETE route handler
    pub fn delete<F, R>(&mut self, path: &str, handler: F)
    where
        F: Fn(Request) -> R + Send + Clone + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.router_mut().delete(path, handler);
    }

    /// Registers a HEAD route handler
    pub fn head<F, R>(&mut self, path: &str, handler: F)
    where
        F: Fn(Request) -> R + Send + Clone + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.router_mut().head(path, handler);
    }

    /// Registers an OPTIONS route handler
    pub fn options<F, R>(&mut self, path: &str, handler: F)
    where
        F: Fn(Request) -> R + Send + Clone + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.router_mut().options(path, handler);
    }

    /// Explicit registration: method, path, handler and route-scoped
    /// middlewares in one call.
    pub fn register<F, R>(
        &mut self,
        method: Method,
        path: &str,
        handler: F,
        middlewares: Vec<Box<dyn Middleware>>,
    ) where
        F: Fn(Request) -> R + Send + Clone + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.router_mut().register(method, path, handler, middlewares);
    }

    /// Adds a middleware that wraps every matched route, before any
    /// route-scoped middleware.
    pub fn middleware(&mut self, middleware: impl Middleware + 'static) {
        self.globals.push(Box::new(middleware));
    }

    /// Mounts a router at a path prefix.
    pub fn mount(&mut self, path: &str, router: Router) {
        self.router_mut().mount(path, router);
    }

    /// Controller-style grouping on the application router.
    pub fn group<F>(&mut self, prefix: &str, middlewares: Vec<Box<dyn Middleware>>, build: F)
    where
        F: FnOnce(&mut Router),
    {
        self.router_mut().group(prefix, middlewares, build);
    }

    /// Runs the filesystem loader against the application router. Feeders
    /// are order-joined by call order: load filesystem routes before
    /// declarative registrations to give them precedence among dynamic
    /// routes.
    pub fn load_routes(&mut self, loader: &FsLoader) {
        loader.load(self.router_mut());
    }

    /// Sets the directory for serving static files. GET requests are
    /// checked against it before the route matcher runs.
    pub fn static_dir(&mut self, dir: &str) -> &mut Self {
        self.static_dir = Some(PathBuf::from(dir));
        self
    }

    /// Configure TLS for HTTPS support
    pub fn with_tls<P: AsRef<Path>>(&mut self, cert_file: P, key_file: P) -> &mut Self {
        self.tls_config = Some(Arc::new(TlsConfig::new(cert_file, key_file)));
        self
    }

    /// Starts the HTTP server
    ///
    /// # Arguments
    /// * `addr` - Address to listen on (e.g. "127.0.0.1:3000")
    pub fn listen(self, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
        let runtime = Runtime::new()?;
        runtime.block_on(async {
            let listener = TcpListener::bind(addr).await?;
            let connection_counter = Arc::new(AtomicUsize::new(0));

            tracing::info!(
                "server running on {} with {} route(s)",
                if self.tls_config.is_some() {
                    format!("https://{addr}")
                } else {
                    format!("http://{addr}")
                },
                self.router.route_count()
            );

            let tls_acceptor = if let Some(tls_config) = &self.tls_config {
                let certs = tls_config.load_certs()?;
                let key = tls_config.load_key()?;
                let config = ServerConfig::builder()
                    .with_no_client_auth()
                    .with_single_cert(certs, key)?;
                Some(TlsAcceptor::from(Arc::new(config)))
            } else {
                None
            };

            loop {
                let counter = Arc::clone(&connection_counter);
                if counter.load(Ordering::Relaxed) >= self.max_connections {
                    tracing::warn!("max connections reached");
                    continue;
                }

                match listener.accept().await {
                    Ok((stream, _)) => {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let app = self.clone();
                        let counter = Arc::clone(&counter);
                        let acceptor = tls_acceptor.clone();

                        tokio::spawn(async move {
                            let result = if let Some(acceptor) = acceptor {
                                match acceptor.accept(stream).await {
                                    Ok(tls_stream) => app.handle_connection(tls_stream).await,
                                    Err(e) => {
                                        tracing::warn!("TLS handshake failed: {e}");
                                        Ok(())
                                    }
                                }
                            } else {
                                app.handle_connection(stream).await
                            };

                            if let Err(e) = result {
                                tracing::warn!("connection error: {e}");
                            }
                            counter.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => tracing::warn!("connection failed: {e}"),
                }
            }
        })
    }

    async fn handle_connection<S>(&self, stream: S) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(stream);

        loop {
            // Idle wait for the next request line, bounded by keep-alive.
            let mut request_line = String::new();
            let read = tokio::time::timeout(self.keep_alive, reader.read_line(&mut request_line)).await;
            let bytes = match read {
                Ok(result) => result?,
                Err(_) => return Ok(()),
            };
            if bytes == 0 || request_line.trim().is_empty() {
                return Ok(());
            }

            let mut parts = request_line.trim().split_whitespace();
            let method = parts
                .next()
                .ok_or_else(|| Error::new(ErrorKind::InvalidData, "Invalid request line"))?
                .to_string();
            let target = parts
                .next()
                .ok_or_else(|| Error::new(ErrorKind::InvalidData, "Invalid request line"))?
                .to_string();

            // The request-timeout window opens once the request line is in
            // and covers header/body reads, dispatch and materialization;
            // nothing is written before the window closes.
            let work = self.read_and_run(&mut reader, method, target);
            let (wire, close) = match self.request_timeout {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(outcome) => outcome?,
                    Err(_) => {
                        let response = self.recover(ServerError::Timeout);
                        (self.materialize_or_minimal(response).await, true)
                    }
                },
                None => work.await?,
            };

            reader.write_all(&wire.head).await?;
            match wire.payload {
                Payload::Buffered(bytes) => reader.write_all(&bytes).await?,
                Payload::Streamed(mut stream) => {
                    while let Some(chunk) = stream.next().await {
                        match chunk {
                            Ok(chunk) if chunk.is_empty() => continue,
                            Ok(chunk) => {
                                reader
                                    .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                                    .await?;
                                reader.write_all(&chunk).await?;
                                reader.write_all(b"\r\n").await?;
                            }
                            Err(err) => {
                                tracing::warn!("response stream failed mid-body: {err}");
                                break;
                            }
                        }
                    }
                    reader.write_all(b"0\r\n\r\n").await?;
                }
            }
            reader.flush().await?;

            if close {
                return Ok(());
            }
        }
    }

    /// Reads the remainder of one request off the socket, builds the
    /// context, runs the pipeline and materializes the outcome.
    async fn read_and_run<S>(
        &self,
        reader: &mut BufReader<S>,
        method: String,
        target: String,
    ) -> Result<(WireResponse, bool), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut raw_headers = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            if line.trim().is_empty() {
                break;
            }
            if let Some((key, value)) = line.trim().split_once(':') {
                raw_headers.push((key.to_string(), value.to_string()));
            }
        }

        let mut body = Vec::new();
        let content_length = raw_headers
            .iter()
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok());
        if let Some(length) = content_length {
            body.reserve(length);
            let mut take = reader.take(length as u64);
            take.read_to_end(&mut body).await?;
        }

        let request = Request::from_wire(&method, &target, raw_headers, body, self.extensions.clone());
        let (response, close) = match request {
            Ok(request) => {
                let close = request
                    .header("connection")
                    .map(|v| v.eq_ignore_ascii_case("close"))
                    .unwrap_or(false);
                (self.run_request(request).await, close)
            }
            // An unparsable request is answered and the connection dropped.
            Err(err) => (self.recover(err), true),
        };

        Ok((self.materialize_or_minimal(response).await, close))
    }

    /// Full per-request flow minus the timeout: static files, matching,
    /// pipeline, panic isolation and error recovery.
    pub(crate) async fn run_request(&self, req: Request) -> Response {
        let outcome = AssertUnwindSafe(self.execute(req)).catch_unwind().await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = if let Some(msg) = panic.downcast_ref::<&str>() {
                    msg.to_string()
                } else if let Some(msg) = panic.downcast_ref::<String>() {
                    msg.clone()
                } else {
                    "Unknown panic".to_string()
                };
                Err(ServerError::Panic(message))
            }
        };
        match outcome {
            Ok(response) => response,
            Err(err) => self.recover(err),
        }
    }

    /// The embedding/test entry point: one request in, one response out,
    /// with the same timeout and failure containment as the wire path.
    pub async fn dispatch(&self, req: Request) -> Response {
        match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.run_request(req)).await {
                Ok(response) => response,
                Err(_) => self.recover(ServerError::Timeout),
            },
            None => self.run_request(req).await,
        }
    }

    async fn execute(&self, mut req: Request) -> ServerResult<Response> {
        // Static files short-circuit routing entirely for GET requests.
        if req.method == Method::GET {
            if let Some(response) = self.try_static(&req.path) {
                tracing::debug!("serving static file for GET {}", req.path);
                return Ok(response);
            }
        }

        match self.router.find(req.method, &req.path) {
            Some(found) => {
                tracing::debug!(
                    "matched {} {} ({} params)",
                    req.method.as_str(),
                    req.path,
                    found.params.len()
                );
                req.params = found.params;
                middleware::run(
                    &self.globals,
                    &found.entry.middlewares,
                    found.entry.handler.clone(),
                    req,
                )
                .await
            }
            None => Err(ServerError::NotFound),
        }
    }

    fn recover(&self, err: ServerError) -> Response {
        if err.status_code() >= 500 {
            tracing::error!("request failed: {err}");
        } else {
            tracing::debug!("request rejected: {err}");
        }
        if let Some(handler) = &self.on_error {
            handler(err)
        } else {
            Response::from_error(&err, self.development)
        }
    }

    async fn materialize_or_minimal(&self, response: Response) -> WireResponse {
        match response.materialize().await {
            Ok(wire) => wire,
            Err(err) => {
                let fallback = self.recover(err);
                match fallback.materialize().await {
                    Ok(wire) => wire,
                    Err(_) => WireResponse {
                        head: b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n"
                            .to_vec(),
                        payload: Payload::Buffered(Vec::new()),
                    },
                }
            }
        }
    }

    /// Maps the request path into the public directory, refusing anything
    /// that escapes it; directory requests fall back to index.html.
    fn try_static(&self, path: &str) -> Option<Response> {
        let static_dir = self.static_dir.as_ref()?;
        let file_path = static_dir.join(path.trim_start_matches('/'));
        let canonical = std::fs::canonicalize(&file_path).ok()?;
        if !canonical.starts_with(std::fs::canonicalize(static_dir).ok()?) {
            return None;
        }
        let canonical = if canonical.is_dir() {
            let index = canonical.join("index.html");
            index.is_file().then_some(index)?
        } else {
            canonical
        };
        if !canonical.is_file() {
            return None;
        }
        let mut response = Response::new(200);
        response.file(canonical);
        Some(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ResponseBody;
    use serde_json::Value;

    fn body_json(response: &Response) -> Value {
        match &response.body {
            ResponseBody::Json(value) => value.clone(),
            other => panic!("expected json body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unmatched_requests_become_404() {
        let app = Application::new();
        let response = app.dispatch(Request::new(Method::DELETE, "/unknown")).await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn handler_errors_become_500_without_detail_by_default() {
        let mut app = Application::new();
        app.get("/widgets", |_req| async {
            Err::<Response, _>(ServerError::Internal("secret detail".into()))
        });

        let response = app.dispatch(Request::new(Method::GET, "/widgets")).await;
        assert_eq!(response.status, 500);
        assert!(!body_json(&response).to_string().contains("secret detail"));
    }

    #[tokio::test]
    async fn development_mode_exposes_error_detail() {
        let mut app = Application::new();
        app.development(true);
        app.get("/widgets", |_req| async {
            Err::<Response, _>(ServerError::Internal("secret detail".into()))
        });

        let response = app.dispatch(Request::new(Method::GET, "/widgets")).await;
        assert_eq!(response.status, 500);
        assert!(body_json(&response).to_string().contains("secret detail"));
    }

    #[tokio::test]
    async fn handler_panics_are_contained_as_500() {
        let mut app = Application::new();
        app.get("/boom", |_req| async {
            if true {
                panic!("kaboom");
            }
            Ok(Response::text("unreached"))
        });

        let response = app.dispatch(Request::new(Method::GET, "/boom")).await;
        assert_eq!(response.status, 500);
        assert!(!body_json(&response).to_string().contains("kaboom"));
    }

    #[tokio::test]
    async fn slow_handlers_hit_the_request_timeout() {
        let mut app = Application::new();
        app.request_timeout(Duration::from_millis(20));
        app.get("/slow", |_req| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Response::text("late"))
        });

        let response = app.dispatch(Request::new(Method::GET, "/slow")).await;
        assert_eq!(response.status, 504);
    }

    #[tokio::test]
    async fn on_error_hook_replaces_the_default_error_body() {
        let mut app = Application::new();
        app.on_error(|err| {
            let mut response = Response::new(err.status_code());
            response.body("custom error page");
            response
        });

        let response = app.dispatch(Request::new(Method::GET, "/missing")).await;
        assert_eq!(response.status, 404);
        match &response.body {
            ResponseBody::Text(text) => assert_eq!(text, "custom error page"),
            other => panic!("expected text body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn static_files_bypass_the_router_for_get() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.js"), b"console.log(1)").unwrap();

        let mut app = Application::new();
        app.static_dir(dir.path().to_str().unwrap());
        // A shape-equal dynamic route exists; the file must win without
        // the matcher being consulted.
        app.get("/[anything]", |_req| async { Ok(Response::text("routed")) });

        let response = app.dispatch(Request::new(Method::GET, "/app.js")).await;
        assert_eq!(response.status, 200);
        match &response.body {
            ResponseBody::File(path) => assert!(path.ends_with("app.js")),
            other => panic!("expected file body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn directory_requests_fall_back_to_index_html() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/index.html"), b"<html></html>").unwrap();

        let mut app = Application::new();
        app.static_dir(dir.path().to_str().unwrap());

        let response = app.dispatch(Request::new(Method::GET, "/docs")).await;
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn path_traversal_cannot_escape_the_static_dir() {
        let parent = tempfile::tempdir().unwrap();
        let public = parent.path().join("public");
        std::fs::create_dir(&public).unwrap();
        std::fs::write(parent.path().join("secret.txt"), b"top secret").unwrap();

        let mut app = Application::new();
        app.static_dir(public.to_str().unwrap());

        let response = app
            .dispatch(Request::new(Method::GET, "/../secret.txt"))
            .await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn extensions_reach_handlers_through_the_context() {
        #[derive(Clone)]
        struct Greeting(&'static str);

        let mut app = Application::new();
        app.extension(Greeting("hello from state"));
        app.get("/greet", |req: Request| async move {
            let greeting = req.extensions.get::<Greeting>().unwrap().0;
            Ok(Response::text(greeting))
        });

        // On the wire path from_wire attaches the app's extensions; do the
        // same by hand here.
        let mut req = Request::new(Method::GET, "/greet");
        req.extensions = app.extensions.clone();
        let response = app.dispatch(req).await;
        match &response.body {
            ResponseBody::Text(text) => assert_eq!(*text, "hello from state"),
            other => panic!("expected text body, got {other:?}"),
        }
    }
}
