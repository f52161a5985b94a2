//! Route path compilation.
//!
//! A raw route path such as `/users/[id]/posts` (or the equivalent
//! `/users/:id/posts`) is compiled once at registration time into an ordered
//! segment list that the matcher walks per request. Segments named `index`
//! or `route` collapse into their parent path, which is how a directory's
//! own route file maps to the directory URL.

use std::fmt;
use thiserror::Error;

pub(crate) const ROUTE_MARKER: &str = "route";
pub(crate) const INDEX_MARKER: &str = "index";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPattern {
    segments: Vec<Segment>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("duplicate parameter `{name}` in route `{pattern}`")]
    DuplicateParam { pattern: String, name: String },
}

impl CompiledPattern {
    /// Compiles a raw route path. Fatal at startup: a duplicate parameter
    /// name makes capture ambiguous and is rejected here rather than at
    /// match time.
    pub fn compile(raw: &str) -> Result<CompiledPattern, CompileError> {
        let mut segments = Vec::new();
        for part in raw.split('/') {
            if part.is_empty() || part == ROUTE_MARKER || part == INDEX_MARKER {
                continue;
            }
            let segment = if let Some(name) = part.strip_prefix('[').and_then(|p| p.strip_suffix(']')) {
                Segment::Param(name.to_string())
            } else if let Some(name) = part.strip_prefix(':') {
                Segment::Param(name.to_string())
            } else {
                Segment::Literal(part.to_string())
            };
            if let Segment::Param(name) = &segment {
                let taken = segments.iter().any(|existing| match existing {
                    Segment::Param(other) => other == name,
                    Segment::Literal(_) => false,
                });
                if taken {
                    return Err(CompileError::DuplicateParam {
                        pattern: raw.to_string(),
                        name: name.clone(),
                    });
                }
            }
            segments.push(segment);
        }
        Ok(CompiledPattern { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_dynamic(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Param(_)))
    }

    /// The normalized path string this pattern occupies in the exact-literal
    /// table. Dynamic patterns have no such key.
    pub(crate) fn literal_path(&self) -> Option<String> {
        if self.is_dynamic() {
            return None;
        }
        if self.segments.is_empty() {
            return Some("/".to_string());
        }
        let mut path = String::new();
        for segment in &self.segments {
            if let Segment::Literal(value) = segment {
                path.push('/');
                path.push_str(value);
            }
        }
        Some(path)
    }

    /// Two patterns are equal-shape when they have the same segment count
    /// and identical literals in identical positions. Equal-shape patterns
    /// registered for the same method shadow each other.
    pub(crate) fn equal_shape(&self, other: &CompiledPattern) -> bool {
        if self.segments.len() != other.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(other.segments.iter())
            .all(|(a, b)| match (a, b) {
                (Segment::Literal(x), Segment::Literal(y)) => x == y,
                (Segment::Param(_), Segment::Param(_)) => true,
                _ => false,
            })
    }
}

impl fmt::Display for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            match segment {
                Segment::Literal(value) => write!(f, "/{}", value)?,
                Segment::Param(name) => write!(f, "/[{}]", name)?,
            }
        }
        Ok(())
    }
}
