//! The abstract response a handler produces, and its materialization into a
//! transport response. A body can be empty, text, raw bytes, a
//! JSON-serializable value, a file on disk, or a byte stream; each encoding
//! is reduced uniformly to a head (status line + headers) and a payload.

use crate::error::{ServerError, ServerResult};
use futures::stream::Stream;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::SystemTime;

pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Vec<u8>>> + Send>>;

pub enum ResponseBody {
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
    File(PathBuf),
    Stream(ByteStream),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => write!(f, "Empty"),
            ResponseBody::Text(text) => write!(f, "Text({} bytes)", text.len()),
            ResponseBody::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            ResponseBody::Json(value) => write!(f, "Json({value})"),
            ResponseBody::File(path) => write!(f, "File({})", path.display()),
            ResponseBody::Stream(_) => write!(f, "Stream"),
        }
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ResponseBody,
}

impl Response {
    pub fn new(status: u16) -> Response {
        Response {
            status,
            headers: HashMap::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn status(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    pub fn body<T: AsRef<str>>(&mut self, body: T) -> &mut Self {
        self.body = ResponseBody::Text(body.as_ref().to_string());
        self
    }

    pub fn bytes(&mut self, bytes: Vec<u8>) -> &mut Self {
        self.body = ResponseBody::Bytes(bytes);
        self
    }

    pub fn header<K: AsRef<str>, V: AsRef<str>>(&mut self, name: K, value: V) -> &mut Self {
        self.headers
            .insert(name.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    pub fn json<T: Serialize>(&mut self, value: &T) -> ServerResult<&mut Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| ServerError::Internal(format!("JSON serialization error: {e}")))?;
        self.body = ResponseBody::Json(value);
        Ok(self)
    }

    pub fn file<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.body = ResponseBody::File(path.as_ref().to_path_buf());
        self
    }

    pub fn stream(&mut self, content_type: &str, stream: ByteStream) -> &mut Self {
        self.header("Content-Type", content_type);
        self.body = ResponseBody::Stream(stream);
        self
    }

    // Static constructors for common responses.

    pub fn ok<T: Serialize>(data: &T) -> ServerResult<Response> {
        let mut response = Response::new(200);
        response.json(data)?;
        Ok(response)
    }

    pub fn created<T: Serialize>(data: &T) -> ServerResult<Response> {
        let mut response = Response::new(201);
        response.json(data)?;
        Ok(response)
    }

    pub fn no_content() -> Response {
        Response::new(204)
    }

    pub fn bad_request<T: Serialize>(data: &T) -> ServerResult<Response> {
        let mut response = Response::new(400);
        response.json(data)?;
        Ok(response)
    }

    pub fn unauthorized<T: Serialize>(data: &T) -> ServerResult<Response> {
        let mut response = Response::new(401);
        response.json(data)?;
        Ok(response)
    }

    pub fn forbidden<T: Serialize>(data: &T) -> ServerResult<Response> {
        let mut response = Response::new(403);
        response.json(data)?;
        Ok(response)
    }

    pub fn not_found<T: Serialize>(data: &T) -> ServerResult<Response> {
        let mut response = Response::new(404);
        response.json(data)?;
        Ok(response)
    }

    pub fn conflict<T: Serialize>(data: &T) -> ServerResult<Response> {
        let mut response = Response::new(409);
        response.json(data)?;
        Ok(response)
    }

    pub fn too_many_requests<T: Serialize>(data: &T) -> ServerResult<Response> {
        let mut response = Response::new(429);
        response.json(data)?;
        Ok(response)
    }

    pub fn text<T: AsRef<str>>(content: T) -> Response {
        let mut response = Response::new(200);
        response.header("Content-Type", "text/plain").body(content);
        response
    }

    pub fn html<T: AsRef<str>>(content: T) -> Response {
        let mut response = Response::new(200);
        response.header("Content-Type", "text/html").body(content);
        response
    }

    pub fn redirect(location: &str) -> Response {
        let mut response = Response::new(302);
        response.header("Location", location);
        response
    }

    /// The wire form of a failed request. Detail is included only in
    /// development mode; production bodies carry the canned message.
    pub(crate) fn from_error(err: &ServerError, development: bool) -> Response {
        let status = err.status_code();
        let message = if development {
            err.to_string()
        } else {
            err.public_message()
        };
        let mut response = Response::new(status);
        let body = serde_json::json!({
            "error": { "message": message, "status": status }
        });
        response.body = ResponseBody::Json(body);
        response
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }

    fn default_header(&mut self, name: &str, value: &str) {
        if !self.has_header(name) {
            self.header(name, value);
        }
    }

    /// Reduces the response to a head and a payload. Everything except
    /// `Stream` is fully buffered so nothing reaches the socket until the
    /// whole response is decided (the timeout guarantee relies on this).
    pub(crate) async fn materialize(self) -> ServerResult<WireResponse> {
        let mut response = self;
        response.default_header("Server", "trellis");

        let body = std::mem::replace(&mut response.body, ResponseBody::Empty);
        let payload = match body {
            ResponseBody::Empty => Payload::Buffered(Vec::new()),
            ResponseBody::Text(text) => {
                response.default_header("Content-Type", "text/plain");
                Payload::Buffered(text.into_bytes())
            }
            ResponseBody::Bytes(bytes) => {
                response.default_header("Content-Type", "application/octet-stream");
                Payload::Buffered(bytes)
            }
            ResponseBody::Json(value) => {
                response.default_header("Content-Type", "application/json");
                let bytes = serde_json::to_vec(&value)
                    .map_err(|e| ServerError::Internal(format!("JSON serialization error: {e}")))?;
                Payload::Buffered(bytes)
            }
            ResponseBody::File(path) => {
                let bytes = match tokio::fs::read(&path).await {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(ServerError::NotFound)
                    }
                    Err(e) => return Err(ServerError::Io(e)),
                };
                response.default_header("Content-Type", mime_for_path(&path));
                response.default_header("Cache-Control", "public, max-age=31536000");
                if let Ok(metadata) = std::fs::metadata(&path) {
                    if let Ok(modified) = metadata.modified() {
                        response.default_header("Last-Modified", &httpdate::fmt_http_date(modified));
                        let secs = modified
                            .duration_since(SystemTime::UNIX_EPOCH)
                            .map(|d| d.as_secs())
                            .unwrap_or(0);
                        response.default_header("ETag", &format!("\"{}-{}\"", metadata.len(), secs));
                    }
                }
                Payload::Buffered(bytes)
            }
            ResponseBody::Stream(stream) => Payload::Streamed(stream),
        };

        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            response.status,
            status_text(response.status)
        );
        for (name, value) in &response.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        match &payload {
            Payload::Buffered(bytes) => {
                head.push_str(&format!("Content-Length: {}\r\n\r\n", bytes.len()));
            }
            Payload::Streamed(_) => {
                head.push_str("Transfer-Encoding: chunked\r\n\r\n");
            }
        }

        Ok(WireResponse {
            head: head.into_bytes(),
            payload,
        })
    }
}

/// A materialized response: complete head bytes plus either a fully
/// buffered payload or a pass-through stream.
pub(crate) struct WireResponse {
    pub(crate) head: Vec<u8>,
    pub(crate) payload: Payload,
}

pub(crate) enum Payload {
    Buffered(Vec<u8>),
    Streamed(ByteStream),
}

impl std::fmt::Debug for WireResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireResponse")
            .field("head", &self.head)
            .field("payload", &self.payload)
            .finish()
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Buffered(bytes) => f.debug_tuple("Buffered").field(bytes).finish(),
            Payload::Streamed(_) => f.debug_tuple("Streamed").finish(),
        }
    }
}

/// Fixed extension to MIME table for file-typed bodies and static assets.
pub(crate) fn mime_for_path(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

#[macro_export]
macro_rules! ok_json {
    ($($json:tt)+) => {{
        let mut response = $crate::http::Response::new(200);
        response.json(&$crate::json!($($json)+))?;
        Ok(response)
    }};
}

#[macro_export]
macro_rules! created_json {
    ($($json:tt)+) => {{
        let mut response = $crate::http::Response::new(201);
        response.json(&$crate::json!($($json)+))?;
        Ok(response)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn head_str(wire: &WireResponse) -> String {
        String::from_utf8(wire.head.clone()).unwrap()
    }

    #[tokio::test]
    async fn json_bodies_round_trip_through_the_wire() {
        let original = json!({"id": 7, "tags": ["a", "b"], "nested": {"ok": true}});
        let mut response = Response::new(200);
        response.json(&original).unwrap();
        let wire = response.materialize().await.unwrap();

        assert!(head_str(&wire).contains("Content-Type: application/json"));
        let bytes = match wire.payload {
            Payload::Buffered(bytes) => bytes,
            Payload::Streamed(_) => panic!("expected buffered payload"),
        };
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, original);
    }

    #[tokio::test]
    async fn caller_headers_take_precedence_over_defaults() {
        let mut response = Response::new(200);
        response.header("Server", "custom");
        response.header("content-type", "application/vnd.custom+json");
        response.json(&json!({"x": 1})).unwrap();
        let head = head_str(&response.materialize().await.unwrap());

        assert!(head.contains("Server: custom"));
        assert!(!head.contains("Server: trellis"));
        assert!(head.contains("content-type: application/vnd.custom+json"));
        assert!(!head.contains("Content-Type: application/json"));
    }

    #[tokio::test]
    async fn empty_bodies_emit_status_and_zero_length() {
        let wire = Response::no_content().materialize().await.unwrap();
        let head = head_str(&wire);
        assert!(head.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(head.contains("Content-Length: 0"));
        assert!(head.contains("Server: trellis"));
    }

    #[tokio::test]
    async fn file_bodies_get_extension_mime_and_cache_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("style.css");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"body{}").unwrap();

        let mut response = Response::new(200);
        response.file(&path);
        let wire = response.materialize().await.unwrap();
        let head = head_str(&wire);
        assert!(head.contains("Content-Type: text/css"));
        assert!(head.contains("Cache-Control: public, max-age=31536000"));
        match wire.payload {
            Payload::Buffered(bytes) => assert_eq!(bytes, b"body{}"),
            Payload::Streamed(_) => panic!("expected buffered payload"),
        }
    }

    #[tokio::test]
    async fn missing_file_surfaces_not_found() {
        let mut response = Response::new(200);
        response.file("/definitely/not/here.txt");
        let err = response.materialize().await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn stream_bodies_pass_through_chunked() {
        let chunks: Vec<std::io::Result<Vec<u8>>> = vec![Ok(b"ab".to_vec()), Ok(b"cd".to_vec())];
        let mut response = Response::new(200);
        response.stream("text/plain", Box::pin(futures::stream::iter(chunks)));
        let wire = response.materialize().await.unwrap();
        assert!(head_str(&wire).contains("Transfer-Encoding: chunked"));
        assert!(matches!(wire.payload, Payload::Streamed(_)));
    }

    #[test]
    fn error_bodies_hide_detail_outside_development() {
        let err = ServerError::Internal("secret stack".into());
        let prod = Response::from_error(&err, false);
        let dev = Response::from_error(&err, true);
        let text = |r: &Response| match &r.body {
            ResponseBody::Json(v) => v.to_string(),
            _ => panic!("expected json error body"),
        };
        assert!(!text(&prod).contains("secret stack"));
        assert!(text(&dev).contains("secret stack"));
        assert_eq!(prod.status, 500);
    }

    #[test]
    fn mime_table_covers_static_asset_extensions() {
        assert_eq!(mime_for_path(Path::new("a/index.html")), "text/html");
        assert_eq!(mime_for_path(Path::new("a.svg")), "image/svg+xml");
        assert_eq!(mime_for_path(Path::new("a.unknown")), "application/octet-stream");
    }
}
