use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("route compile error: {0}")]
    RouteCompile(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("too many requests")]
    TooManyRequests,
    #[error("request timed out")]
    Timeout,
    #[error("internal error: {0}")]
    Internal(String),
    #[error("handler panicked: {0}")]
    Panic(String),
}

impl ServerError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::BadRequest(_) => 400,
            ServerError::Unauthorized(_) => 401,
            ServerError::Forbidden(_) => 403,
            ServerError::NotFound => 404,
            ServerError::Conflict(_) => 409,
            ServerError::TooManyRequests => 429,
            ServerError::Timeout => 504,
            ServerError::Io(_)
            | ServerError::RouteCompile(_)
            | ServerError::Internal(_)
            | ServerError::Panic(_) => 500,
        }
    }

    /// Message safe to expose to clients regardless of the development flag.
    /// Server-side failures collapse to a canned phrase; everything else is
    /// already client-caused and keeps its detail.
    pub(crate) fn public_message(&self) -> String {
        match self.status_code() {
            500 => "Internal Server Error".to_string(),
            504 => "Gateway Timeout".to_string(),
            _ => self.to_string(),
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
