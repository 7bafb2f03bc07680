//! Bearer header helpers
//!
//! Provides helpers for:
//! - Building an `Authorization: Bearer <token>` header value
//! - Extracting the bearer token back out of a header map

use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue, AUTHORIZATION};

/// Build the `Authorization` header value for an access token
pub fn bearer_value(token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Set the bearer header, replacing any previous `Authorization` value
///
/// Returns `false` when the token cannot be represented as a header value.
pub fn attach_bearer(headers: &mut HeaderMap, token: &str) -> bool {
    match bearer_value(token) {
        Ok(value) => {
            headers.insert(AUTHORIZATION, value);
            true
        }
        Err(_) => {
            tracing::warn!("access token contains characters not allowed in a header");
            false
        }
    }
}

/// Extract the token from an `Authorization: Bearer` header
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}
