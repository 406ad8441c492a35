//! Admin credential check for mutating endpoints.
//!
//! The credential arrives in `X-Admin-Secret` or as a bearer token. An empty
//! configured secret denies every request.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use subtle::ConstantTimeEq;

pub const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

/// Credential presented by the caller, if any
pub fn presented_secret(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get(ADMIN_SECRET_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(value.trim());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

pub fn is_authorized(headers: &HeaderMap, configured: &str) -> bool {
    if configured.is_empty() {
        return false;
    }
    match presented_secret(headers) {
        Some(presented) => bool::from(presented.as_bytes().ct_eq(configured.as_bytes())),
        None => false,
    }
}
