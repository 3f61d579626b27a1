//! API authentication middleware.
//!
//! The bearer token is read from the environment once at startup and only
//! its SHA-256 digest is kept. With no token configured the server runs
//! open (dev mode) and says so once in the log.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Enforce `Authorization: Bearer <token>` on protected routes.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected_hash = match &state.api_token_hash {
        Some(h) => h,
        None => return next.run(req).await,
    };

    // Schedule-trigger requests authenticate with their own JWT.
    if req.uri().path().ends_with("/trigger") {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Compare fixed-length digests in constant time; the token length
    // never leaks.
    let provided_hash = Sha256::digest(provided.as_bytes());
    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "invalid or missing API token" })),
        )
            .into_response();
    }

    next.run(req).await
}

/// Hash the configured API token once at startup.
pub fn token_hash_from_env(var: &str) -> Option<Vec<u8>> {
    match std::env::var(var) {
        Ok(token) if !token.is_empty() => Some(Sha256::digest(token.as_bytes()).to_vec()),
        _ => {
            tracing::warn!("{var} not set — API runs unauthenticated (dev mode)");
            None
        }
    }
}
