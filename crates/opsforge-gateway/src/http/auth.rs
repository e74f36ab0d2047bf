//! Shared-secret check for the HTTP surface.
//!
//! Every route except `/health` and the platform event webhook requires the
//! `x-webhook-secret` header to match the configured secret. An empty
//! configured secret disables the check (local development).

use axum::http::{HeaderMap, StatusCode};

pub const SECRET_HEADER: &str = "x-webhook-secret";

pub fn require_secret(headers: &HeaderMap, expected: &str) -> Result<(), StatusCode> {
    if expected.is_empty() {
        return Ok(());
    }
    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided == expected {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}
