//! Auth session service
//!
//! Drives the remote login/logout/refresh/currentUser protocol and keeps the
//! [`TokenStore`] in sync with it:
//!
//! - Anonymous --login--> Authenticated
//! - Authenticated --expiry--> Authenticated-Stale
//! - Authenticated-Stale --refresh--> Authenticated
//! - any --logout or rejected refresh--> Anonymous
//!
//! `login` and `refresh` fail loudly with [`AuthError`]; `logout` and
//! `current_user` never fail and leave the client in a safe default state.

use chrono::{Duration, Utc};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::attach_bearer;
use crate::classify::ErrorClass;
use crate::config::ClientConfig;
use crate::navigation::RedirectGuard;
use crate::operations;
use crate::storage::TokenStore;
use crate::token::TokenPair;
use crate::transport::{GraphQLErrorEntry, GraphQLResponse, Transport};
use crate::types::{AuthPayload, Credentials, Envelope, SessionData, User};
use crate::{AuthError, Result, StorageError};

const LOGIN_FAILED: &str = "Login failed";
const REFRESH_FAILED: &str = "Token refresh failed";

/// Outcome of a current-user lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CurrentUser {
    SignedIn(User),
    /// No stored session
    SignedOut,
    /// Stored access token expired, or the server no longer accepts it
    Expired,
    /// The lookup could not be completed; the session may still be valid
    Unavailable(String),
}

impl CurrentUser {
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::SignedIn(user) => Some(user),
            _ => None,
        }
    }
}

/// Authentication protocol client bound to one token store
pub struct AuthService {
    transport: Arc<dyn Transport>,
    store: TokenStore,
    access_token_ttl: Duration,
    clear_on_refresh_failure: bool,
    redirect_guard: RedirectGuard,
    refresh_flight: Mutex<Option<RefreshOutcome>>,
    refresh_count: AtomicU64,
}

/// Last refresh token exchanged and what the exchange produced
struct RefreshOutcome {
    refresh_token: String,
    result: Result<TokenPair>,
}

impl AuthService {
    /// `transport` must not be an [`AuthMiddleware`](crate::AuthMiddleware) wrapping this service
    pub fn new(transport: Arc<dyn Transport>, store: TokenStore) -> Self {
        let defaults = ClientConfig::default();
        Self {
            transport,
            store,
            access_token_ttl: defaults.access_token_ttl(),
            clear_on_refresh_failure: defaults.clear_on_refresh_failure,
            redirect_guard: RedirectGuard::new(),
            refresh_flight: Mutex::new(None),
            refresh_count: AtomicU64::new(0),
        }
    }

    pub fn from_config(
        transport: Arc<dyn Transport>,
        store: TokenStore,
        config: &ClientConfig,
    ) -> Self {
        Self::new(transport, store)
            .with_access_token_ttl(config.access_token_ttl())
            .with_clear_on_refresh_failure(config.clear_on_refresh_failure)
    }

    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    pub fn with_clear_on_refresh_failure(mut self, clear: bool) -> Self {
        self.clear_on_refresh_failure = clear;
        self
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn redirect_guard(&self) -> &RedirectGuard {
        &self.redirect_guard
    }

    /// Exchange email and password for a session
    pub async fn login(&self, credentials: Credentials) -> Result<AuthPayload> {
        tracing::debug!(email = %credentials.email, "logging in");

        let response = match self.transport.execute(operations::login(&credentials)).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "login request failed");
                return Err(AuthError::new(AuthError::NETWORK_ERROR, LOGIN_FAILED)
                    .with_details(json!({ "reason": err.to_string() })));
            }
        };

        let envelope = decode_envelope::<SessionData>(&response, operations::LOGIN_FIELD);
        let data = match envelope {
            Some(envelope) if envelope.success => envelope.data.unwrap_or_default(),
            other => {
                let err =
                    rejection(&response, other.as_ref(), AuthError::LOGIN_FAILED, LOGIN_FAILED);
                tracing::info!(email = %credentials.email, code = %err.code, "login rejected");
                return Err(err);
            }
        };

        let (Some(user), Some(access_token)) =
            (data.user, data.access_token.filter(|t| !t.is_empty()))
        else {
            tracing::warn!("login succeeded without user or access token");
            return Err(AuthError::new(AuthError::INVALID_RESPONSE, LOGIN_FAILED));
        };

        let tokens = TokenPair::issued(
            access_token,
            data.refresh_token.filter(|t| !t.is_empty()),
            self.access_token_ttl,
            Utc::now(),
        );
        if let Err(err) = self.store.store(&tokens).await {
            tracing::error!(error = %err, "could not persist session after login");
            return Err(AuthError::new(AuthError::LOGIN_FAILED, LOGIN_FAILED)
                .with_details(json!({ "reason": err.to_string() })));
        }

        tracing::info!(user_id = %user.id, expires_at = %tokens.expires_at, "login succeeded");
        Ok(AuthPayload { user, tokens })
    }

    /// End the session
    ///
    /// The remote call is best effort; the local session is cleared whatever it returns.
    pub async fn logout(&self) {
        match self.store.read().await {
            Ok(Some(pair)) => {
                let mut operation = operations::logout();
                attach_bearer(&mut operation.headers, &pair.access_token);
                match self.transport.execute(operation).await {
                    Ok(response) if response.has_errors() => {
                        tracing::debug!(
                            error = response.first_error_message().unwrap_or_default(),
                            "server reported an error on logout"
                        );
                    }
                    Ok(_) => tracing::debug!("remote logout acknowledged"),
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            "remote logout failed, clearing local session anyway"
                        )
                    }
                }
            }
            Ok(None) => tracing::debug!("logout without a stored session"),
            Err(err) => tracing::warn!(error = %err, "could not read stored session on logout"),
        }

        if let Err(err) = self.store.clear().await {
            tracing::error!(error = %err, "failed to clear stored session on logout");
        } else {
            tracing::info!("logged out");
        }
    }

    /// Exchange a refresh token for a new token pair
    ///
    /// One exchange runs at a time. Callers that queued behind an exchange of
    /// the same refresh token get its result instead of spending the token again.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        if refresh_token.is_empty() {
            return Err(AuthError::new(AuthError::NO_REFRESH_TOKEN, REFRESH_FAILED));
        }

        let seen = self.refresh_count.load(Ordering::Acquire);
        let mut flight = self.refresh_flight.lock().await;

        if let Some(last) = flight.as_ref().filter(|last| last.refresh_token == refresh_token) {
            let concurrent = self.refresh_count.load(Ordering::Acquire) != seen;
            let still_valid = matches!(&last.result, Ok(tokens) if !tokens.is_expired());
            if concurrent || still_valid {
                tracing::debug!("refresh token already exchanged, reusing the result");
                return last.result.clone();
            }
        }

        let result = self.exchange(refresh_token).await;
        *flight = Some(RefreshOutcome {
            refresh_token: refresh_token.to_string(),
            result: result.clone(),
        });
        self.refresh_count.fetch_add(1, Ordering::AcqRel);
        result
    }

    async fn exchange(&self, refresh_token: &str) -> Result<TokenPair> {
        let response = match self.transport.execute(operations::refresh(refresh_token)).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "token refresh request failed");
                if ErrorClass::of_transport(&err).is_authentication() {
                    self.reject_refresh().await;
                }
                return Err(AuthError::new(AuthError::NETWORK_ERROR, REFRESH_FAILED)
                    .with_details(json!({ "reason": err.to_string() })));
            }
        };

        let data = match decode_envelope::<SessionData>(&response, operations::REFRESH_FIELD) {
            Some(envelope) if envelope.success => envelope.data.unwrap_or_default(),
            Some(envelope) => {
                let err = rejection(
                    &response,
                    Some(&envelope),
                    AuthError::REFRESH_FAILED,
                    REFRESH_FAILED,
                );
                tracing::info!(code = %err.code, "refresh token rejected");
                self.reject_refresh().await;
                return Err(err);
            }
            None => {
                if ErrorClass::of_response(&response).is_authentication() {
                    self.reject_refresh().await;
                }
                return Err(AuthError::new(AuthError::REFRESH_FAILED, REFRESH_FAILED)
                    .with_details(json!({ "errors": response.errors })));
            }
        };

        let Some(access_token) = data.access_token.filter(|t| !t.is_empty()) else {
            tracing::warn!("refresh succeeded without an access token");
            return Err(AuthError::new(AuthError::INVALID_RESPONSE, REFRESH_FAILED));
        };

        // Servers that do not rotate refresh tokens keep the old one valid
        let next_refresh = data
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| refresh_token.to_string());

        let tokens = TokenPair::issued(
            access_token,
            Some(next_refresh),
            self.access_token_ttl,
            Utc::now(),
        );
        if let Err(err) = self.store.store(&tokens).await {
            tracing::error!(error = %err, "could not persist refreshed session");
            return Err(AuthError::new(AuthError::REFRESH_FAILED, REFRESH_FAILED)
                .with_details(json!({ "reason": err.to_string() })));
        }

        tracing::debug!(expires_at = %tokens.expires_at, "access token refreshed");
        Ok(tokens)
    }

    /// Fetch the signed-in user; never fails
    ///
    /// Returns without a network call when there is no session or its token has expired.
    pub async fn current_user(&self) -> CurrentUser {
        let pair = match self.store.read().await {
            Ok(Some(pair)) => pair,
            Ok(None) => return CurrentUser::SignedOut,
            Err(err) => {
                tracing::warn!(error = %err, "could not read stored session");
                return CurrentUser::Unavailable(err.to_string());
            }
        };

        if pair.is_expired() {
            tracing::debug!(expired_at = %pair.expires_at, "stored access token expired");
            return CurrentUser::Expired;
        }

        let mut operation = operations::current_user();
        if !attach_bearer(&mut operation.headers, &pair.access_token) {
            return CurrentUser::Expired;
        }

        let response = match self.transport.execute(operation).await {
            Ok(response) => response,
            Err(err) if ErrorClass::of_transport(&err).is_authentication() => {
                return CurrentUser::Expired
            }
            Err(err) => {
                tracing::debug!(error = %err, "current user lookup failed");
                return CurrentUser::Unavailable(err.to_string());
            }
        };

        match decode_envelope::<SessionData>(&response, operations::CURRENT_USER_FIELD) {
            Some(envelope) if envelope.success => match envelope.data.and_then(|d| d.user) {
                Some(user) => CurrentUser::SignedIn(user),
                None => CurrentUser::Unavailable("current user missing from response".into()),
            },
            Some(envelope) => {
                let message = envelope.message().unwrap_or("current user lookup rejected");
                let mut entry = GraphQLErrorEntry::new(message);
                if let Some(code) = &envelope.code {
                    entry = entry.with_code(code);
                }
                if ErrorClass::of_entry(&entry).is_authentication() {
                    CurrentUser::Expired
                } else {
                    CurrentUser::Unavailable(message.to_string())
                }
            }
            None if ErrorClass::of_response(&response).is_authentication() => CurrentUser::Expired,
            None => CurrentUser::Unavailable(
                response
                    .first_error_message()
                    .unwrap_or("invalid current user response")
                    .to_string(),
            ),
        }
    }

    /// A session exists and its access token has not expired; no network access
    pub async fn is_authenticated(&self) -> bool {
        match self.store.read().await {
            Ok(Some(pair)) => !pair.is_expired(),
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(error = %err, "could not read stored session");
                false
            }
        }
    }

    pub async fn stored_tokens(&self) -> std::result::Result<Option<TokenPair>, StorageError> {
        self.store.read().await
    }

    pub async fn refresh_token(&self) -> std::result::Result<Option<String>, StorageError> {
        self.store.refresh_token().await
    }

    async fn reject_refresh(&self) {
        if !self.clear_on_refresh_failure {
            return;
        }
        match self.store.clear().await {
            Ok(()) => tracing::info!("refresh token rejected, stored session cleared"),
            Err(err) => tracing::error!(error = %err, "failed to clear stored session"),
        }
    }
}

fn decode_envelope<T: DeserializeOwned>(
    response: &GraphQLResponse,
    field: &str,
) -> Option<Envelope<T>> {
    let value = response.field(field)?;
    match serde_json::from_value(value.clone()) {
        Ok(envelope) => Some(envelope),
        Err(err) => {
            tracing::warn!(field, error = %err, "malformed response envelope");
            None
        }
    }
}

/// Error for a rejected login or refresh, preferring the server's own wording
fn rejection<T>(
    response: &GraphQLResponse,
    envelope: Option<&Envelope<T>>,
    default_code: &str,
    fallback: &str,
) -> AuthError {
    let message = envelope
        .and_then(Envelope::message)
        .or_else(|| response.first_error_message())
        .unwrap_or(fallback);
    let code = envelope
        .and_then(|e| e.code.as_deref())
        .or_else(|| response.errors.iter().find_map(GraphQLErrorEntry::code))
        .unwrap_or(default_code);

    let err = AuthError::new(code, message);
    if response.has_errors() {
        err.with_details(json!({ "errors": response.errors }))
    } else {
        err
    }
}
