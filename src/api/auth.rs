use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::api::state::AppState;
use crate::api::types::SignedAuth;
use crate::error::{MarketError, Result};

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

pub fn admin_token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn extract_bearer_token(raw: &str) -> Option<&str> {
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
}

/// Resolve the caller's wallet address.
///
/// A signature in the body wins; otherwise a bearer session token is
/// required. Returns the lowercased address.
pub fn authenticate(state: &AppState, headers: &HeaderMap, auth: Option<&SignedAuth>) -> Result<String> {
    let now = Utc::now();

    if let Some(auth) = auth {
        return state
            .verifier
            .verify(&auth.message, &auth.signature, &auth.address, now);
    }

    match bearer_token(headers) {
        Some(token) => state.sessions.verify(token, now),
        None => Err(MarketError::Authentication(
            "no signature or bearer token supplied".to_string(),
        )),
    }
}

/// Gate for settlement and market callbacks.
///
/// Accepts `x-admin-token` or a bearer header. With no admin token
/// configured the routes are unavailable rather than open.
pub fn ensure_admin(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let Some(expected) = state
        .config
        .auth
        .admin_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    else {
        return Err(MarketError::dependency(
            "admin",
            "auth.admin_token is not configured",
        ));
    };

    let provided = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .or_else(|| bearer_token(headers));

    // Compare digests so the check does not short-circuit on a shared prefix
    let expected_fp = admin_token_fingerprint(expected);
    if provided.is_some_and(|v| admin_token_fingerprint(v) == expected_fp) {
        return Ok(());
    }

    Err(MarketError::Authentication(
        "admin token missing or invalid".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_prefix_is_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let fp = admin_token_fingerprint("secret");
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, admin_token_fingerprint("secret"));
        assert_ne!(fp, admin_token_fingerprint("secret2"));
    }
}
