//! Request middleware
//!
//! Wraps a [`Transport`] and, for every operation:
//! - attaches `Authorization: Bearer <token>` from the token store
//! - refreshes an expired access token first when a refresh token exists
//! - tears the session down and redirects to login on authentication failures
//! - retries transient transport failures per the [`RetryPolicy`]

use async_trait::async_trait;
use std::sync::Arc;

use crate::auth::attach_bearer;
use crate::classify::ErrorClass;
use crate::navigation::{is_at_path, Navigator};
use crate::retry::RetryPolicy;
use crate::service::AuthService;
use crate::token::TokenPair;
use crate::transport::{GraphQLResponse, Operation, Transport};
use crate::TransportError;

pub struct AuthMiddleware {
    inner: Arc<dyn Transport>,
    auth: Arc<AuthService>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
    retry: RetryPolicy,
}

impl AuthMiddleware {
    /// Middleware with retries disabled and `/login` as the login path
    pub fn new(
        inner: Arc<dyn Transport>,
        auth: Arc<AuthService>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            inner,
            auth,
            navigator,
            login_path: "/login".to_string(),
            retry: RetryPolicy::disabled(),
        }
    }

    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn auth(&self) -> &Arc<AuthService> {
        &self.auth
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Attach the current access token, refreshing it first if it has expired
    async fn authorize(&self, operation: &mut Operation) {
        let pair = match self.auth.store().read().await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "could not read stored session, sending request unauthenticated"
                );
                None
            }
        };

        let Some(pair) = pair else {
            return;
        };

        if !pair.is_expired() {
            attach_bearer(&mut operation.headers, &pair.access_token);
            return;
        }

        if pair.refresh_token().is_none() {
            tracing::debug!("access token expired and no refresh token stored");
            return;
        }

        if let Some(access_token) = self.refresh_access_token(&pair).await {
            attach_bearer(&mut operation.headers, &access_token);
        }
    }

    /// Exchange the stored refresh token; concurrent callers share one exchange
    async fn refresh_access_token(&self, pair: &TokenPair) -> Option<String> {
        let refresh_token = pair.refresh_token()?;
        match self.auth.refresh(refresh_token).await {
            Ok(tokens) => Some(tokens.access_token),
            Err(err) => {
                tracing::warn!(
                    code = %err.code,
                    error = %err,
                    "just-in-time refresh failed, sending request unauthenticated"
                );
                if let Err(err) = self.auth.store().clear().await {
                    tracing::error!(error = %err, "failed to clear stored session");
                }
                None
            }
        }
    }

    async fn send(&self, operation: Operation) -> Result<GraphQLResponse, TransportError> {
        let mut attempt = 1;
        loop {
            match self.inner.execute(operation.clone()).await {
                Err(err) if self.retry.should_retry(attempt, &err) => {
                    let delay = self.retry.delay(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        operation = ?operation.operation_name,
                        "retrying graphql request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn end_session(&self, epoch: u64) {
        if let Err(err) = self.auth.store().clear().await {
            tracing::error!(error = %err, "failed to clear stored session");
        }
        self.redirect_to_login(epoch);
    }

    /// Navigate to login unless already there or another failure of the same
    /// burst has done so
    fn redirect_to_login(&self, epoch: u64) {
        if let Some(current) = self.navigator.current_path() {
            if is_at_path(&current, &self.login_path) {
                tracing::debug!("already on the login page");
                return;
            }
        }

        if !self.auth.redirect_guard().try_acquire(epoch) {
            tracing::debug!("redirect to login already in progress");
            return;
        }

        tracing::info!(path = %self.login_path, "session ended, redirecting to login");
        self.navigator.navigate(&self.login_path);
    }
}

#[async_trait]
impl Transport for AuthMiddleware {
    async fn execute(&self, mut operation: Operation) -> Result<GraphQLResponse, TransportError> {
        let epoch = self.auth.redirect_guard().epoch();
        self.authorize(&mut operation).await;
        let operation_name = operation.operation_name.clone();

        match self.send(operation).await {
            Ok(response) => {
                match ErrorClass::of_response(&response) {
                    ErrorClass::Authentication => {
                        tracing::warn!(
                            operation = ?operation_name,
                            error = response.first_error_message().unwrap_or_default(),
                            "authentication rejected by api"
                        );
                        self.end_session(epoch).await;
                    }
                    ErrorClass::Authorization => {
                        tracing::warn!(
                            operation = ?operation_name,
                            error = response.first_error_message().unwrap_or_default(),
                            "insufficient privileges"
                        );
                    }
                    ErrorClass::Other if response.has_errors() => {
                        tracing::debug!(
                            operation = ?operation_name,
                            errors = response.errors.len(),
                            "graphql errors in response"
                        );
                    }
                    ErrorClass::Other => {}
                }
                Ok(response)
            }
            Err(err) => {
                match ErrorClass::of_transport(&err) {
                    ErrorClass::Authentication => {
                        tracing::warn!(
                            operation = ?operation_name,
                            error = %err,
                            "authentication rejected by api"
                        );
                        self.end_session(epoch).await;
                    }
                    ErrorClass::Authorization => {
                        tracing::warn!(
                            operation = ?operation_name,
                            error = %err,
                            "insufficient privileges"
                        );
                    }
                    ErrorClass::Other => {
                        tracing::warn!(
                            operation = ?operation_name,
                            error = %err,
                            "graphql request failed"
                        );
                    }
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::navigation::MemoryNavigator;
    use crate::storage::TokenStore;
    use crate::testing::*;
    use crate::types::Credentials;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration as StdDuration;
    use tokio::task::JoinSet;

    /// Records navigations but never changes location
    #[derive(Default)]
    struct StuckNavigator {
        navigations: StdMutex<Vec<String>>,
    }

    impl Navigator for StuckNavigator {
        fn current_path(&self) -> Option<String> {
            Some("/orders".to_string())
        }

        fn navigate(&self, path: &str) {
            self.navigations.lock().unwrap().push(path.to_string());
        }
    }

    struct Harness {
        transport: Arc<ScriptedTransport>,
        store: TokenStore,
        navigator: Arc<MemoryNavigator>,
        middleware: Arc<AuthMiddleware>,
    }

    fn harness(transport: ScriptedTransport) -> Harness {
        let transport = Arc::new(transport);
        let store = TokenStore::in_memory();
        let auth = Arc::new(AuthService::new(transport.clone(), store.clone()));
        let navigator = Arc::new(MemoryNavigator::new("/orders"));
        let middleware = Arc::new(AuthMiddleware::new(transport.clone(), auth, navigator.clone()));
        Harness {
            transport,
            store,
            navigator,
            middleware,
        }
    }

    fn valid(access: &str, refresh: Option<&str>) -> TokenPair {
        TokenPair::new(access, refresh.map(str::to_string), Utc::now() + Duration::minutes(10))
    }

    fn expired(access: &str, refresh: Option<&str>) -> TokenPair {
        TokenPair::new(access, refresh.map(str::to_string), Utc::now() - Duration::seconds(5))
    }

    fn unauthorized() -> TransportError {
        TransportError::Status {
            status: 401,
            message: "Unauthorized".into(),
        }
    }

    fn products() -> Operation {
        Operation::new("query Products { products { id } }").operation_name("Products")
    }

    fn products_data() -> serde_json::Value {
        json!({ "products": [{ "id": "p1" }] })
    }

    #[tokio::test]
    async fn test_attaches_valid_token() {
        let h = harness(ScriptedTransport::new());
        h.transport.push_data(products_data());
        h.store.store(&valid("AT1", Some("RT1"))).await.unwrap();

        let response = h.middleware.execute(products()).await.unwrap();

        assert!(!response.has_errors());
        assert_eq!(h.transport.calls()[0].bearer(), Some("AT1"));
    }

    #[tokio::test]
    async fn test_anonymous_request_has_no_header() {
        let h = harness(ScriptedTransport::new());
        h.transport.push_data(products_data());

        h.middleware.execute(products()).await.unwrap();

        assert_eq!(h.transport.calls()[0].bearer(), None);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_before_request() {
        let h = harness(ScriptedTransport::new());
        h.transport.push_data(refresh_success("AT2", Some("RT2")));
        h.transport.push_data(products_data());
        h.store.store(&expired("AT1", Some("RT1"))).await.unwrap();

        h.middleware.execute(products()).await.unwrap();

        assert_eq!(h.transport.operation_names(), vec!["RefreshToken", "Products"]);
        assert_eq!(h.transport.calls()[0].variables["refreshToken"], "RT1");
        assert_eq!(h.transport.calls()[1].bearer(), Some("AT2"));
        assert_eq!(h.store.read().await.unwrap().unwrap().access_token, "AT2");
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_store_and_sends_unauthenticated() {
        let h = harness(ScriptedTransport::new());
        h.transport.push(Err(TransportError::Connection("refused".into())));
        h.transport.push_data(products_data());
        h.store.store(&expired("AT1", Some("RT1"))).await.unwrap();

        let response = h.middleware.execute(products()).await;

        assert!(response.is_ok());
        assert_eq!(h.transport.calls()[1].bearer(), None);
        assert_eq!(h.store.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_token_without_refresh_token_is_not_sent() {
        let h = harness(ScriptedTransport::new());
        h.transport.push_data(products_data());
        h.store.store(&expired("AT1", None)).await.unwrap();

        h.middleware.execute(products()).await.unwrap();

        assert_eq!(h.transport.operation_names(), vec!["Products"]);
        assert_eq!(h.transport.calls()[0].bearer(), None);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_refresh() {
        let transport = ScriptedTransport::from_fn(|op| {
            if op.operation_name.as_deref() == Some("RefreshToken") {
                Ok(data_response(refresh_success("AT2", Some("RT2"))))
            } else {
                Ok(data_response(products_data()))
            }
        })
        .with_latency(StdDuration::from_millis(20));
        let h = harness(transport);
        h.store.store(&expired("AT1", Some("RT1"))).await.unwrap();

        let mut set = JoinSet::new();
        for _ in 0..5 {
            let middleware = h.middleware.clone();
            set.spawn(async move { middleware.execute(products()).await });
        }
        while let Some(result) = set.join_next().await {
            assert!(result.unwrap().is_ok());
        }

        let names = h.transport.operation_names();
        assert_eq!(names.iter().filter(|n| *n == "RefreshToken").count(), 1);
        let calls = h.transport.calls();
        let products_calls = calls
            .iter()
            .filter(|c| c.operation_name.as_deref() == Some("Products"));
        for call in products_calls {
            assert_eq!(call.bearer(), Some("AT2"));
        }
    }

    #[tokio::test]
    async fn test_unauthenticated_response_clears_and_redirects() {
        let h = harness(ScriptedTransport::new());
        h.transport.push(Ok(error_response("Not logged in", Some("UNAUTHENTICATED"))));
        h.store.store(&valid("AT1", Some("RT1"))).await.unwrap();

        let response = h.middleware.execute(products()).await.unwrap();

        assert!(response.has_errors());
        assert_eq!(h.store.read().await.unwrap(), None);
        assert_eq!(h.navigator.current_path().as_deref(), Some("/login"));
    }

    #[tokio::test]
    async fn test_concurrent_auth_failures_redirect_once() {
        let transport = Arc::new(
            ScriptedTransport::from_fn(|_| Ok(error_response("jwt expired", None)))
                .with_latency(StdDuration::from_millis(10)),
        );
        let store = TokenStore::in_memory();
        store.store(&valid("AT1", Some("RT1"))).await.unwrap();
        let auth = Arc::new(AuthService::new(transport.clone(), store.clone()));
        let navigator = Arc::new(StuckNavigator::default());
        let middleware = Arc::new(AuthMiddleware::new(transport, auth, navigator.clone()));

        let mut set = JoinSet::new();
        for _ in 0..8 {
            let middleware = middleware.clone();
            set.spawn(async move { middleware.execute(products()).await });
        }
        while let Some(result) = set.join_next().await {
            assert!(result.unwrap().is_ok());
        }

        assert_eq!(*navigator.navigations.lock().unwrap(), vec!["/login".to_string()]);
        assert_eq!(store.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_redirect_after_login_and_new_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = TokenStore::in_memory();
        let auth = Arc::new(AuthService::new(transport.clone(), store.clone()));
        let navigator = Arc::new(StuckNavigator::default());
        let middleware = AuthMiddleware::new(transport.clone(), auth.clone(), navigator.clone());

        transport.push(Err(unauthorized()));
        transport.push_data(login_success("1", "AT1", Some("RT1")));
        transport.push(Err(unauthorized()));

        assert!(middleware.execute(products()).await.is_err());
        auth.login(Credentials::new("a@b.com", "x")).await.unwrap();
        assert!(middleware.execute(products()).await.is_err());

        assert_eq!(navigator.navigations.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_redirects_again_after_leaving_login_page() {
        let h = harness(ScriptedTransport::new());
        h.transport.push(Ok(error_response("Not logged in", Some("UNAUTHENTICATED"))));
        h.transport.push(Ok(error_response("Not logged in", Some("UNAUTHENTICATED"))));
        h.store.store(&valid("AT1", Some("RT1"))).await.unwrap();

        h.middleware.execute(products()).await.unwrap();
        assert_eq!(h.navigator.current_path().as_deref(), Some("/login"));

        h.navigator.navigate("/account/orders");
        h.middleware.execute(products()).await.unwrap();

        assert_eq!(h.navigator.current_path().as_deref(), Some("/login"));
        assert_eq!(h.navigator.history(), vec!["/login", "/account/orders", "/login"]);
    }

    #[tokio::test]
    async fn test_no_redirect_when_already_on_login() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Ok(error_response("Not logged in", Some("UNAUTHENTICATED"))));
        let store = TokenStore::in_memory();
        store.store(&valid("AT1", None)).await.unwrap();
        let auth = Arc::new(AuthService::new(transport.clone(), store.clone()));
        let navigator = Arc::new(MemoryNavigator::new("/login?next=/orders"));
        let middleware = AuthMiddleware::new(transport, auth, navigator.clone());

        middleware.execute(products()).await.unwrap();

        assert!(navigator.history().is_empty());
        assert_eq!(store.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_forbidden_leaves_session_alone() {
        let h = harness(ScriptedTransport::new());
        h.transport.push(Ok(error_response("Admins only", Some("FORBIDDEN"))));
        h.transport.push(Err(TransportError::Status { status: 403, message: "Forbidden".into() }));
        h.store.store(&valid("AT1", Some("RT1"))).await.unwrap();

        let response = h.middleware.execute(products()).await.unwrap();
        assert_eq!(response.errors[0].code(), Some("FORBIDDEN"));
        assert!(h.middleware.execute(products()).await.is_err());

        assert!(h.store.read().await.unwrap().is_some());
        assert!(h.navigator.history().is_empty());
    }

    #[tokio::test]
    async fn test_http_401_clears_and_redirects() {
        let h = harness(ScriptedTransport::new());
        h.transport.push(Err(unauthorized()));
        h.store.store(&valid("AT1", Some("RT1"))).await.unwrap();

        let err = h.middleware.execute(products()).await.unwrap_err();

        assert_eq!(err.status(), Some(401));
        assert_eq!(h.store.read().await.unwrap(), None);
        assert_eq!(h.navigator.history(), vec!["/login".to_string()]);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Err(TransportError::Connection("refused".into())));
        transport.push(Err(TransportError::Status { status: 502, message: "Bad gateway".into() }));
        transport.push_data(products_data());
        let auth = Arc::new(AuthService::new(transport.clone(), TokenStore::in_memory()));
        let navigator = Arc::new(MemoryNavigator::default());
        let middleware = AuthMiddleware::new(transport.clone(), auth, navigator)
            .with_retry(RetryPolicy::new(&RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                jitter: true,
            }));

        let response = middleware.execute(products()).await.unwrap();

        assert_eq!(response.field("products").unwrap()[0]["id"], "p1");
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_auth_failures_are_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Err(unauthorized()));
        transport.push_data(products_data());
        let auth = Arc::new(AuthService::new(transport.clone(), TokenStore::in_memory()));
        let navigator = Arc::new(MemoryNavigator::default());
        let middleware = AuthMiddleware::new(transport.clone(), auth, navigator)
            .with_retry(RetryPolicy::new(&RetryConfig {
                max_attempts: 5,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                jitter: false,
            }));

        assert!(middleware.execute(products()).await.is_err());
        assert_eq!(transport.call_count(), 1);
    }
}
