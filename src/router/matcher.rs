//! Request-to-route matching.
//!
//! The exact-literal table is consulted first and wins over any dynamic
//! route that could also match the same path. Dynamic entries are then
//! scanned in registration order, segment by segment; the first full match
//! wins. A method mismatch on an otherwise-matching path is simply no
//! match; the shell collapses it into a 404, a deliberate simplification
//! over 405 semantics.

use crate::http::request::normalize_path;
use crate::http::Method;
use crate::router::pattern::Segment;
use crate::router::{RouteEntry, Router};
use std::collections::HashMap;

pub struct RouteMatch<'a> {
    pub(crate) entry: &'a RouteEntry,
    pub params: HashMap<String, String>,
}

impl Router {
    pub(crate) fn find(&self, method: Method, path: &str) -> Option<RouteMatch<'_>> {
        let path = normalize_path(path);

        if let Some(entry) = self
            .exact_table()
            .get(&path)
            .and_then(|by_method| by_method.get(&method))
        {
            tracing::trace!("exact match for {} {}", method.as_str(), path);
            return Some(RouteMatch {
                entry,
                params: HashMap::new(),
            });
        }

        let parts: Vec<&str> = if path == "/" {
            Vec::new()
        } else {
            path[1..].split('/').collect()
        };

        'entries: for entry in self.dynamic_entries() {
            if entry.method != method {
                continue;
            }
            let segments = entry.pattern.segments();
            if segments.len() != parts.len() {
                continue;
            }
            let mut params = HashMap::new();
            for (segment, part) in segments.iter().zip(parts.iter()) {
                match segment {
                    Segment::Literal(value) if value == part => {}
                    Segment::Param(name) if !part.is_empty() => {
                        params.insert(name.clone(), part.to_string());
                    }
                    _ => continue 'entries,
                }
            }
            tracing::trace!("dynamic match {} for {} {}", entry.pattern, method.as_str(), path);
            return Some(RouteMatch { entry, params });
        }

        tracing::trace!("no route for {} {}", method.as_str(), path);
        None
    }
}
