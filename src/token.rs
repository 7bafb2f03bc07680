//! Session token pair and expiry computation

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;

/// Access token, optional refresh token and the access token's absolute expiry
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl TokenPair {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at,
        }
    }

    /// Build a pair for freshly issued tokens
    ///
    /// Expiry comes from the access token's `exp` claim when it is a JWT,
    /// otherwise from `fallback_ttl`, saturating at the latest representable instant.
    pub fn issued(
        access_token: String,
        refresh_token: Option<String>,
        fallback_ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = jwt_expiry(&access_token)
            .or_else(|| now.checked_add_signed(fallback_ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            access_token,
            refresh_token,
            expires_at,
        }
    }

    /// Check expiry against the current time
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// A token expiring exactly at `now` counts as expired
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Refresh token, ignoring empty values
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: f64,
}

/// Read the `exp` claim of a JWT without verifying its signature
///
/// The client only needs to know when to refresh; the server stays the verifier.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claim.exp as i64, 0)
}
