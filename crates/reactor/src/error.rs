//! Typed error kinds shared by every component of the runtime.
//!
//! A closed set of kinds callers can `match` on, each carrying a message and,
//! where one exists, the underlying I/O error.

use std::fmt;

/// One row per kind in the error handling table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParam,
    NoMemory,
    NotConnected,
    Timeout,
    Io,
    NotFound,
    AlreadyExists,
    MethodNotFound,
    Cancelled,
    Framing,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidParam => "INVALID_PARAM",
            ErrorKind::NoMemory => "NO_MEMORY",
            ErrorKind::NotConnected => "NOT_CONNECTED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Io => "IO",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Framing => "FRAMING",
        };
        f.write_str(s)
    }
}

/// The runtime's error type. There is no `OK` variant — success is simply
/// `Result::Ok`.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<anyhow::Error>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    pub fn with_source(kind: ErrorKind, message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self { kind, message: message.into(), source: Some(source.into()) }
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::with_source(ErrorKind::Io, message, source)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub type Result<T> = std::result::Result<T, Error>;
