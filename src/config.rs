//! Client configuration

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use crate::ClientError;

/// Longest accepted fallback lifetime for access tokens
pub const MAX_ACCESS_TOKEN_TTL_SECS: i64 = 366 * 24 * 60 * 60;

/// Complete client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// GraphQL endpoint URL
    pub endpoint: String,
    /// Path the navigator is sent to when the session is torn down
    pub login_path: String,
    /// Request timeout in seconds, `None` keeps the transport default
    pub timeout_secs: Option<u64>,
    pub user_agent: String,
    /// Lifetime assumed for access tokens that carry no `exp` claim,
    /// between 1 and [`MAX_ACCESS_TOKEN_TTL_SECS`]
    pub access_token_ttl_secs: i64,
    /// Clear stored tokens when the server rejects a refresh token
    pub clear_on_refresh_failure: bool,
    pub storage_keys: StorageKeys,
    /// File used for durable token storage, in-memory storage when unset
    pub storage_path: Option<PathBuf>,
    pub retry: RetryConfig,
}

/// Names of the persisted token entries
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageKeys {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: String,
}

/// Retry configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one; 1 disables retries
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4000/graphql".to_string(),
            login_path: "/login".to_string(),
            timeout_secs: None,
            user_agent: concat!("storefront-auth-client/", env!("CARGO_PKG_VERSION")).to_string(),
            access_token_ttl_secs: 3600,
            clear_on_refresh_failure: true,
            storage_keys: StorageKeys::default(),
            storage_path: None,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            access_token: "accessToken".to_string(),
            refresh_token: "refreshToken".to_string(),
            expires_at: "tokenExpiresAt".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 300,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Configuration with retries turned off
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn initial_delay(&self) -> StdDuration {
        StdDuration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> StdDuration {
        StdDuration::from_millis(self.max_delay_ms)
    }
}

impl ClientConfig {
    /// Create client config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(endpoint) = std::env::var("GRAPHQL_ENDPOINT") {
            config.endpoint = endpoint;
        }

        if let Ok(path) = std::env::var("AUTH_LOGIN_PATH") {
            config.login_path = path;
        }

        if let Ok(path) = std::env::var("AUTH_STORAGE_PATH") {
            config.storage_path = Some(PathBuf::from(path));
        }

        if let Some(timeout) = std::env::var("GRAPHQL_TIMEOUT_SECONDS")
            .ok()
            .and_then(|t| t.parse::<u64>().ok())
        {
            config.timeout_secs = Some(timeout);
        }

        if let Some(attempts) = std::env::var("GRAPHQL_RETRY_MAX_ATTEMPTS")
            .ok()
            .and_then(|a| a.parse::<u32>().ok())
        {
            config.retry.max_attempts = attempts.max(1);
        }

        config
    }

    /// Reject values the client cannot work with
    pub fn validate(&self) -> Result<(), ClientError> {
        if !(1..=MAX_ACCESS_TOKEN_TTL_SECS).contains(&self.access_token_ttl_secs) {
            return Err(ClientError::Config(format!(
                "access_token_ttl_secs must be between 1 and {MAX_ACCESS_TOKEN_TTL_SECS}, got {}",
                self.access_token_ttl_secs
            )));
        }
        Ok(())
    }

    /// Fallback access token lifetime, clamped to the accepted range
    pub fn access_token_ttl(&self) -> Duration {
        let secs = self.access_token_ttl_secs.clamp(1, MAX_ACCESS_TOKEN_TTL_SECS);
        Duration::try_seconds(secs).unwrap_or_else(|| Duration::hours(1))
    }

    pub fn timeout(&self) -> Option<StdDuration> {
        self.timeout_secs.map(StdDuration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_match_persisted_layout() {
        let config = ClientConfig::default();
        assert_eq!(config.storage_keys.access_token, "accessToken");
        assert_eq!(config.storage_keys.refresh_token, "refreshToken");
        assert_eq!(config.storage_keys.expires_at, "tokenExpiresAt");
        assert_eq!(config.login_path, "/login");
        assert!(config.clear_on_refresh_failure);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ClientConfig = serde_json::from_value(json!({
            "endpoint": "https://shop.example.com/graphql",
            "retry": { "max_attempts": 2 }
        }))
        .unwrap();

        assert_eq!(config.endpoint, "https://shop.example.com/graphql");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.initial_delay_ms, 300);
        assert_eq!(config.access_token_ttl(), Duration::hours(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_ttl_is_rejected() {
        for secs in [0i64, -5, 10_000_000_000_000] {
            let config: ClientConfig =
                serde_json::from_value(json!({ "access_token_ttl_secs": secs })).unwrap();

            assert!(matches!(config.validate(), Err(ClientError::Config(_))));
            assert!(config.access_token_ttl() >= Duration::seconds(1));
            assert!(config.access_token_ttl() <= Duration::days(366));
        }
    }
}
