//! The per-request context: method, path, query, headers, decoded body and
//! matched path parameters. Built fresh for every request and owned by the
//! task serving it.

use crate::error::{ServerError, ServerResult};
use crate::extensions::Extensions;
use base64::Engine;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug)]
pub enum Method {
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
    CONNECT,
    OPTIONS,
    TRACE,
    PATCH,
}

impl Method {
    /// Parses a wire method token, uppercasing on ingestion. Unknown tokens
    /// are a 400 at the server shell, not a silent default.
    pub fn parse(s: &str) -> Option<Method> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "CONNECT" => Some(Method::CONNECT),
            "OPTIONS" => Some(Method::OPTIONS),
            "TRACE" => Some(Method::TRACE),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::CONNECT => "CONNECT",
            Method::OPTIONS => "OPTIONS",
            Method::TRACE => "TRACE",
            Method::PATCH => "PATCH",
        }
    }

    /// Methods that conventionally carry a request body; only these get
    /// content-type driven body decoding.
    pub(crate) fn carries_body(&self) -> bool {
        matches!(
            self,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }
}

/// A query value: repeated keys collect into `Multi` in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Single(String),
    Multi(Vec<String>),
}

impl QueryValue {
    pub fn first(&self) -> &str {
        match self {
            QueryValue::Single(v) => v,
            QueryValue::Multi(vs) => vs.first().map(String::as_str).unwrap_or(""),
        }
    }

    pub fn all(&self) -> Vec<&str> {
        match self {
            QueryValue::Single(v) => vec![v.as_str()],
            QueryValue::Multi(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            QueryValue::Single(existing) => {
                *self = QueryValue::Multi(vec![std::mem::take(existing), value]);
            }
            QueryValue::Multi(vs) => vs.push(value),
        }
    }
}

/// The decoded request body. Decoding is content-type driven and happens
/// once at context construction; a malformed body never fails the request,
/// it decodes to `Empty` with a diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    Form(Map<String, Value>),
    Text(String),
}

impl Body {
    pub(crate) fn decode(content_type: Option<&str>, data: &[u8]) -> Body {
        if data.is_empty() {
            return Body::Empty;
        }
        let content_type = content_type.unwrap_or("");
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match media_type.as_str() {
            "application/json" => match serde_json::from_slice(data) {
                Ok(value) => Body::Json(value),
                Err(err) => {
                    tracing::warn!("malformed JSON body left undecoded: {err}");
                    Body::Empty
                }
            },
            "application/x-www-form-urlencoded" => Body::Form(parse_urlencoded(data)),
            "multipart/form-data" => match parse_multipart(content_type, data) {
                Some(fields) => Body::Form(fields),
                None => {
                    tracing::warn!("malformed multipart body left undecoded");
                    Body::Empty
                }
            },
            // Missing or unrecognized content types fall back to raw text.
            _ => Body::Text(String::from_utf8_lossy(data).to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    pub fn json<T>(&self) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        match self {
            Body::Json(value) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }

    pub fn form<T>(&self) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        match self {
            Body::Form(fields) => serde_json::from_value(Value::Object(fields.clone())).ok(),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Flat key/value decoding; a repeated key collects into an array.
fn parse_urlencoded(data: &[u8]) -> Map<String, Value> {
    let mut fields = Map::new();
    for pair in String::from_utf8_lossy(data).split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = percent_decode(key);
        let value = Value::String(percent_decode(value));
        insert_form_field(&mut fields, key, value);
    }
    fields
}

fn insert_form_field(fields: &mut Map<String, Value>, key: String, value: Value) {
    match fields.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(key, value);
        }
    }
}

/// Multipart fields decode to strings; file-valued fields are preserved as
/// opaque blobs `{filename, content (base64), content_type}`.
fn parse_multipart(content_type: &str, body: &[u8]) -> Option<Map<String, Value>> {
    let boundary = content_type
        .split(';')
        .find_map(|s| s.trim().strip_prefix("boundary="))
        .map(|s| s.trim_matches('"'))?;
    let delimiter = format!("--{boundary}");

    let mut fields = Map::new();
    for part in split_multipart(body, &delimiter) {
        let (header_bytes, content) = split_once_bytes(part, b"\r\n\r\n")?;
        let headers = std::str::from_utf8(header_bytes).ok()?;

        let mut name = None;
        let mut filename = None;
        let mut part_type = None;
        for line in headers.split("\r\n") {
            let (key, value) = match line.split_once(':') {
                Some(kv) => kv,
                None => continue,
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "content-disposition" => {
                    for param in value.split(';').skip(1) {
                        if let Some((k, v)) = param.trim().split_once('=') {
                            match k {
                                "name" => name = Some(v.trim_matches('"').to_string()),
                                "filename" => filename = Some(v.trim_matches('"').to_string()),
                                _ => {}
                            }
                        }
                    }
                }
                "content-type" => part_type = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let name = match name {
            Some(name) => name,
            None => continue,
        };
        let value = if let Some(filename) = filename {
            json!({
                "filename": filename,
                "content": base64::engine::general_purpose::STANDARD.encode(content),
                "content_type": part_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            })
        } else {
            Value::String(String::from_utf8_lossy(content).to_string())
        };
        insert_form_field(&mut fields, name, value);
    }
    Some(fields)
}

fn split_multipart<'a>(body: &'a [u8], delimiter: &str) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let boundary = delimiter.as_bytes();
    let mut rest = body;
    loop {
        let start = match find_subsequence(rest, boundary) {
            Some(pos) => pos + boundary.len(),
            None => break,
        };
        rest = &rest[start..];
        if rest.starts_with(b"--") {
            break;
        }
        rest = rest.strip_prefix(b"\r\n").unwrap_or(rest);
        match find_subsequence(rest, boundary) {
            Some(end) => {
                let part = &rest[..end];
                parts.push(part.strip_suffix(b"\r\n").unwrap_or(part));
                // Leave the boundary in place for the next scan.
                rest = &rest[end..];
            }
            None => break,
        }
    }
    parts
}

fn split_once_bytes<'a>(data: &'a [u8], separator: &[u8]) -> Option<(&'a [u8], &'a [u8])> {
    find_subsequence(data, separator).map(|pos| (&data[..pos], &data[pos + separator.len()..]))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn percent_decode(input: &str) -> String {
    // '+' means space in query strings and urlencoded forms.
    let plus_as_space = input.replace('+', " ");
    urlencoding::decode(&plus_as_space)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(plus_as_space)
}

#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, QueryValue>,
    pub params: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub data: HashMap<String, Value>,
    pub body: Body,
    pub extensions: Extensions,
}

impl Request {
    /// A bare context for tests and embedding; the path is normalized the
    /// same way the wire path is.
    pub fn new(method: Method, path: &str) -> Request {
        Request {
            method,
            path: normalize_path(path),
            query: HashMap::new(),
            params: HashMap::new(),
            headers: HashMap::new(),
            data: HashMap::new(),
            body: Body::Empty,
            extensions: Extensions::new(),
        }
    }

    /// Builds the context from raw wire pieces: method token, request
    /// target, header lines and body bytes. Header names lowercase on
    /// ingestion; the path is percent-decoded with the query string
    /// stripped; the body decodes according to content type.
    pub fn from_wire(
        method: &str,
        target: &str,
        raw_headers: Vec<(String, String)>,
        body: Vec<u8>,
        extensions: Extensions,
    ) -> ServerResult<Request> {
        let method = Method::parse(method)
            .ok_or_else(|| ServerError::BadRequest(format!("unsupported method `{method}`")))?;

        let (raw_path, raw_query) = match target.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (target, None),
        };
        // Unlike query strings, '+' is literal in a path.
        let decoded_path = urlencoding::decode(raw_path)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| raw_path.to_string());
        let path = normalize_path(&decoded_path);
        let query = raw_query.map(parse_query).unwrap_or_default();

        let mut headers = HashMap::new();
        for (key, value) in raw_headers {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }

        let body = if method.carries_body() {
            Body::decode(headers.get("content-type").map(String::as_str), &body)
        } else {
            Body::Empty
        };

        Ok(Request {
            method,
            path,
            query,
            params: HashMap::new(),
            headers,
            data: HashMap::new(),
            body,
            extensions,
        })
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn query_first(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(QueryValue::first)
    }

    /// Test/builder convenience.
    pub fn with_header(mut self, key: &str, value: &str) -> Request {
        self.headers.insert(key.to_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, content_type: &str, data: &[u8]) -> Request {
        self.headers
            .insert("content-type".to_string(), content_type.to_string());
        self.body = Body::decode(Some(content_type), data);
        self
    }

    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Middleware-injected derived values (an authenticated principal, a
    /// request id) travel on the context through this slot.
    pub fn set_data<T>(&mut self, key: &str, value: T)
    where
        T: serde::Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.data.insert(key.to_string(), value);
        }
    }

    pub fn get_typed_data<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.data
            .get(key)
            .and_then(|value| serde_json::from_value(value.to_owned()).ok())
    }
}

/// Strips the trailing slash and guarantees a leading one; the compiler,
/// the matcher and the wire parser all agree on this form.
pub(crate) fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn parse_query(raw: &str) -> HashMap<String, QueryValue> {
    let mut query: HashMap<String, QueryValue> = HashMap::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = percent_decode(key);
        let value = percent_decode(value);
        match query.get_mut(&key) {
            Some(existing) => existing.push(value),
            None => {
                query.insert(key, QueryValue::Single(value));
            }
        }
    }
    query
}
