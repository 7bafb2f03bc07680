//! Client assembly
//!
//! One [`GraphQLClient`] is built per application root and handed down to
//! whatever needs the API; nothing here is process-global.

use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::middleware::AuthMiddleware;
use crate::navigation::{MemoryNavigator, Navigator};
use crate::retry::RetryPolicy;
use crate::service::AuthService;
use crate::session::Session;
use crate::storage::{FileStorage, KeyValueStorage, MemoryStorage, TokenStore};
use crate::transport::{GraphQLResponse, HttpTransport, Operation, Transport};
use crate::ClientError;

/// Authenticated GraphQL client
#[derive(Clone)]
pub struct GraphQLClient {
    middleware: Arc<AuthMiddleware>,
}

impl GraphQLClient {
    pub fn new(middleware: Arc<AuthMiddleware>) -> Self {
        Self { middleware }
    }

    pub fn auth(&self) -> &Arc<AuthService> {
        self.middleware.auth()
    }

    /// The middleware as a plain transport, for callers that decode responses themselves
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.middleware.clone()
    }

    /// New session state bound to this client's auth service
    pub fn session(&self) -> Session {
        Session::new(self.auth().clone())
    }

    /// Run an operation and return the raw response, GraphQL errors included
    pub async fn execute_raw(&self, operation: Operation) -> Result<GraphQLResponse, ClientError> {
        Ok(self.middleware.execute(operation).await?)
    }

    /// Run an operation and decode its `data`
    pub async fn execute<T: DeserializeOwned>(
        &self,
        operation: Operation,
    ) -> Result<T, ClientError> {
        let response = self.execute_raw(operation).await?;
        if response.has_errors() {
            return Err(ClientError::GraphQL(response.errors));
        }

        let data = response
            .data
            .filter(|data| !data.is_null())
            .ok_or(ClientError::MissingData)?;
        Ok(serde_json::from_value(data)?)
    }
}

/// Builder for GraphQLClient
pub struct ClientBuilder {
    config: ClientConfig,
    storage: Option<Arc<dyn KeyValueStorage>>,
    navigator: Option<Arc<dyn Navigator>>,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            storage: None,
            navigator: None,
            transport: None,
        }
    }

    /// Token storage; defaults to a file at `storage_path`, or memory when unset
    pub fn storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Navigator used for login redirects; defaults to a [`MemoryNavigator`]
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Underlying transport; defaults to [`HttpTransport`] on the configured endpoint
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub async fn build(self) -> Result<GraphQLClient, ClientError> {
        let config = self.config;
        config.validate()?;

        let storage: Arc<dyn KeyValueStorage> = match (self.storage, &config.storage_path) {
            (Some(storage), _) => storage,
            (None, Some(path)) => Arc::new(FileStorage::open(path).await?),
            (None, None) => Arc::new(MemoryStorage::new()),
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                let mut builder = HttpTransport::builder()
                    .endpoint(&config.endpoint)
                    .user_agent(&config.user_agent);
                if let Some(timeout) = config.timeout() {
                    builder = builder.timeout(timeout);
                }
                Arc::new(builder.build()?)
            }
        };

        let navigator: Arc<dyn Navigator> = match self.navigator {
            Some(navigator) => navigator,
            None => Arc::new(MemoryNavigator::default()),
        };

        let store = TokenStore::new(storage, config.storage_keys.clone());
        let auth = Arc::new(AuthService::from_config(transport.clone(), store, &config));
        let middleware = AuthMiddleware::new(transport, auth, navigator)
            .with_login_path(config.login_path.clone())
            .with_retry(RetryPolicy::new(&config.retry));

        tracing::debug!(
            endpoint = %config.endpoint,
            persistent = config.storage_path.is_some(),
            retry_attempts = config.retry.max_attempts,
            "graphql client ready"
        );

        Ok(GraphQLClient::new(Arc::new(middleware)))
    }
}
