//! Shared HTTP helpers for the platform adapters.

use bh_domain::Error;

/// Convert a [`reqwest::Error`] into the domain error type. Timeouts and
/// connection failures are transient.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() {
        Error::Transient(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Classify a non-success platform response. 429 and 5xx are transient;
/// everything else is a permanent protocol error.
pub(crate) fn classify_status(channel: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let detail = format!("{channel} returned {status}: {body}");
    if status.as_u16() == 429 || status.is_server_error() {
        Error::Transient(detail)
    } else {
        Error::Http(detail)
    }
}
