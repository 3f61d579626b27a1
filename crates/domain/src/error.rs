//! Shared error type used across all bothive crates.
//!
//! The variants mirror how failures surface at the edges: validation and
//! policy errors become 4xx responses, transient errors become
//! `processing_failed` stream events (never retried inside the core), and
//! fatal errors abort startup.

/// Coarse classification used by handlers and the orchestrator to decide
/// how a failure surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    PolicyDenied,
    TokenExhausted,
    Transient,
    Conflict,
    Fatal,
    Internal,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("token exhausted: {0}")]
    TokenExhausted(String),

    /// Upstream 5xx, timeout, or connection failure. The orchestrator
    /// surfaces these as `processing_failed`; retry policy belongs to the
    /// caller.
    #[error("transient: {0}")]
    Transient(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Programmer or configuration error discovered at startup
    /// (double-registered channel type, empty JWT secret, ...).
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::PolicyDenied(_) => ErrorKind::PolicyDenied,
            Error::TokenExhausted(_) => ErrorKind::TokenExhausted,
            Error::Transient(_) => ErrorKind::Transient,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Fatal(_) => ErrorKind::Fatal,
            Error::Io(_) | Error::Json(_) | Error::Http(_) => ErrorKind::Internal,
        }
    }

    /// True for failures that a caller may meaningfully retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// HTTP status the API layer maps this error to.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::PolicyDenied => 403,
            ErrorKind::TokenExhausted => 401,
            ErrorKind::Conflict => 409,
            ErrorKind::Transient => 502,
            ErrorKind::Fatal | ErrorKind::Internal => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
