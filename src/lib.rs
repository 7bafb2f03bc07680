//! # storefront-auth-client
//!
//! Authenticated GraphQL client layer for the storefront/admin API.
//!
//! ## Features
//!
//! - **Token Store** - Durable access/refresh token persistence behind a storage port
//! - **Auth Session Service** - Login, logout, refresh and current-user lookups
//! - **Request Middleware** - Bearer injection, just-in-time refresh, auth error interception
//! - **Retry Policy** - Jittered exponential backoff that never retries auth failures
//! - **HTTP Transport** - GraphQL over `reqwest`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use storefront_auth_client::{ClientBuilder, ClientConfig, Credentials};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClientBuilder::new(ClientConfig::from_env()).build().await?;
//!
//! let session = client.auth()
//!     .login(Credentials::new("a@b.com", "secret"))
//!     .await?;
//! println!("signed in as {}", session.user.email);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod classify;
pub mod client;
pub mod config;
pub mod middleware;
pub mod navigation;
pub mod operations;
pub mod retry;
pub mod service;
pub mod session;
pub mod storage;
pub mod token;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::ErrorClass;
pub use client::{ClientBuilder, GraphQLClient};
pub use config::{ClientConfig, RetryConfig, StorageKeys};
pub use middleware::AuthMiddleware;
pub use navigation::{MemoryNavigator, Navigator, RedirectGuard};
pub use retry::RetryPolicy;
pub use service::{AuthService, CurrentUser};
pub use session::Session;
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, TokenStore};
pub use token::TokenPair;
pub use transport::{GraphQLErrorEntry, GraphQLResponse, HttpTransport, Operation, Transport};
pub use types::{AuthPayload, Credentials, Envelope, Role, User, UserProfile};

use thiserror::Error;

/// Authentication errors surfaced by login and refresh
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct AuthError {
    /// Category tag, either one of the constants below or the server's own code
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl AuthError {
    pub const LOGIN_FAILED: &'static str = "LOGIN_FAILED";
    pub const REFRESH_FAILED: &'static str = "REFRESH_FAILED";
    pub const NO_REFRESH_TOKEN: &'static str = "NO_REFRESH_TOKEN";
    pub const NETWORK_ERROR: &'static str = "NETWORK_ERROR";
    pub const INVALID_RESPONSE: &'static str = "INVALID_RESPONSE";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Server error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl TransportError {
    /// Create error from HTTP status code
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        Self::Status {
            status: status.as_u16(),
            message,
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether sending the same request again could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Request(err) => err.is_connect() || err.is_timeout(),
            Self::Decode(_) | Self::Configuration(_) => false,
        }
    }
}

/// Token storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by [`GraphQLClient`]
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("GraphQL error: {}", .0.first().map(|e| e.message.as_str()).unwrap_or("unknown error"))]
    GraphQL(Vec<GraphQLErrorEntry>),

    #[error("Failed to decode response data: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Response contained no data")]
    MissingData,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for authentication operations
pub type Result<T> = std::result::Result<T, AuthError>;
