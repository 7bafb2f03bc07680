//! GraphQL request/response model and the HTTP transport

use async_graphql::{Request, Variables};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::auth::extract_bearer;
use crate::TransportError;

const DEFAULT_USER_AGENT: &str = concat!("storefront-auth-client/", env!("CARGO_PKG_VERSION"));

/// A GraphQL operation plus the headers it is sent with
#[derive(Debug, Clone)]
pub struct Operation {
    pub query: String,
    pub operation_name: Option<String>,
    pub variables: Value,
    pub headers: HeaderMap,
}

impl Operation {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: Value::Null,
            headers: HeaderMap::new(),
        }
    }

    pub fn variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Bearer token currently attached, if any
    pub fn bearer(&self) -> Option<&str> {
        extract_bearer(&self.headers)
    }

    /// Request body as sent on the wire
    pub fn to_request(&self) -> Request {
        let variables = Variables::from_json(self.variables.clone());
        let mut request = Request::new(self.query.clone()).variables(variables);
        if let Some(name) = &self.operation_name {
            request = request.operation_name(name.clone());
        }
        request
    }
}

/// Response body of a GraphQL call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub errors: Vec<GraphQLErrorEntry>,
}

impl GraphQLResponse {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Top-level field of `data`
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data
            .as_ref()
            .and_then(|data| data.get(name))
            .filter(|value| !value.is_null())
    }

    /// Message of the first error, ignoring blank messages
    pub fn first_error_message(&self) -> Option<&str> {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .find(|m| !m.trim().is_empty())
    }
}

/// One entry of a GraphQL `errors` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLErrorEntry {
    pub message: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub path: Vec<Value>,
    #[serde(default)]
    pub extensions: Option<serde_json::Map<String, Value>>,
}

impl GraphQLErrorEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
            extensions: None,
        }
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.extensions
            .get_or_insert_with(serde_json::Map::new)
            .insert("code".to_string(), Value::String(code.to_string()));
        self
    }

    /// `extensions.code`
    pub fn code(&self) -> Option<&str> {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .and_then(Value::as_str)
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Sends GraphQL operations somewhere and returns the decoded response
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, operation: Operation) -> Result<GraphQLResponse, TransportError>;
}

/// GraphQL over HTTP POST
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create a new transport with default configuration
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        Self::builder().endpoint(endpoint).build()
    }

    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::default()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, operation: Operation) -> Result<GraphQLResponse, TransportError> {
        let body = operation.to_request();
        let response = self
            .client
            .post(&self.endpoint)
            .headers(operation.headers.clone())
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_reqwest)?;

        if !status.is_success() {
            // Prefer the GraphQL error message over the raw body
            let message = serde_json::from_str::<GraphQLResponse>(&text)
                .ok()
                .and_then(|body| body.first_error_message().map(str::to_string))
                .unwrap_or_else(|| {
                    if text.trim().is_empty() {
                        status.to_string()
                    } else {
                        text
                    }
                });
            tracing::debug!(
                status = status.as_u16(),
                operation = ?operation.operation_name,
                "graphql request rejected"
            );
            return Err(TransportError::from_status(status, message));
        }

        Ok(serde_json::from_str(&text)?)
    }
}

fn classify_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Request(err)
    }
}

/// Builder for HttpTransport
#[derive(Default)]
pub struct HttpTransportBuilder {
    endpoint: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl HttpTransportBuilder {
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<HttpTransport, TransportError> {
        let endpoint = self
            .endpoint
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| TransportError::Configuration("endpoint is required".into()))?;

        let mut client_builder = ClientBuilder::new();

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        let user_agent = self.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        client_builder = client_builder.user_agent(user_agent);

        let client = client_builder.build()?;

        Ok(HttpTransport { client, endpoint })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_requires_endpoint() {
        let result = HttpTransport::builder().build();
        assert!(matches!(result, Err(TransportError::Configuration(_))));
    }

    #[test]
    fn test_operation_serializes_as_graphql_request() {
        let operation = Operation::new("query CurrentUser { currentUser { success } }")
            .operation_name("CurrentUser")
            .variables(json!({ "id": "1" }));

        let body = serde_json::to_value(operation.to_request()).unwrap();
        assert_eq!(body["query"], "query CurrentUser { currentUser { success } }");
        assert_eq!(body["operationName"], "CurrentUser");
        assert_eq!(body["variables"]["id"], "1");
    }

    #[test]
    fn test_response_tolerates_null_errors() {
        let response: GraphQLResponse =
            serde_json::from_value(json!({ "data": { "currentUser": null }, "errors": null }))
                .unwrap();
        assert!(!response.has_errors());
        assert!(response.field("currentUser").is_none());
    }

    #[test]
    fn test_error_code_from_extensions() {
        let response: GraphQLResponse = serde_json::from_value(json!({
            "data": null,
            "errors": [{
                "message": "Not logged in",
                "path": ["orders"],
                "extensions": { "code": "UNAUTHENTICATED" }
            }]
        }))
        .unwrap();

        assert_eq!(response.errors[0].code(), Some("UNAUTHENTICATED"));
        assert_eq!(response.first_error_message(), Some("Not logged in"));
    }
}
