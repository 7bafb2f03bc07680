//! Scripted transport for unit tests

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::transport::{GraphQLErrorEntry, GraphQLResponse, Operation, Transport};
use crate::TransportError;

type Handler = Box<dyn Fn(&Operation) -> Result<GraphQLResponse, TransportError> + Send + Sync>;

/// Replies with queued responses in order, or with a handler once the queue is empty
pub(crate) struct ScriptedTransport {
    queue: Mutex<VecDeque<Result<GraphQLResponse, TransportError>>>,
    handler: Option<Handler>,
    latency: Option<Duration>,
    calls: Mutex<Vec<Operation>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            handler: None,
            latency: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn from_fn<F>(handler: F) -> Self
    where
        F: Fn(&Operation) -> Result<GraphQLResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push(&self, response: Result<GraphQLResponse, TransportError>) {
        self.queue.lock().unwrap().push_back(response);
    }

    pub fn push_data(&self, data: Value) {
        self.push(Ok(data_response(data)));
    }

    pub fn calls(&self) -> Vec<Operation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Operation names in call order
    pub fn operation_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|op| op.operation_name.unwrap_or_default())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, operation: Operation) -> Result<GraphQLResponse, TransportError> {
        self.calls.lock().unwrap().push(operation.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let queued = self.queue.lock().unwrap().pop_front();
        match (queued, &self.handler) {
            (Some(response), _) => response,
            (None, Some(handler)) => handler(&operation),
            (None, None) => Err(TransportError::Connection("no scripted response".into())),
        }
    }
}

pub(crate) fn data_response(data: Value) -> GraphQLResponse {
    GraphQLResponse {
        data: Some(data),
        errors: Vec::new(),
    }
}

pub(crate) fn error_response(message: &str, code: Option<&str>) -> GraphQLResponse {
    let entry = GraphQLErrorEntry::new(message);
    GraphQLResponse {
        data: None,
        errors: vec![match code {
            Some(code) => entry.with_code(code),
            None => entry,
        }],
    }
}

pub(crate) fn user_json(id: &str) -> Value {
    json!({
        "id": id,
        "email": "a@b.com",
        "role": "CUSTOMER",
        "isActive": true,
        "emailVerified": true,
        "profile": { "firstName": "Ada", "lastName": null, "phone": null, "avatar": null }
    })
}

pub(crate) fn login_success(id: &str, access: &str, refresh: Option<&str>) -> Value {
    json!({
        "login": {
            "success": true,
            "message": "Login successful",
            "code": null,
            "timestamp": "2024-01-01T00:00:00Z",
            "data": { "user": user_json(id), "accessToken": access, "refreshToken": refresh }
        }
    })
}

pub(crate) fn refresh_success(access: &str, refresh: Option<&str>) -> Value {
    json!({
        "refreshToken": {
            "success": true,
            "message": null,
            "data": { "accessToken": access, "refreshToken": refresh }
        }
    })
}

pub(crate) fn envelope_failure(field: &str, message: &str) -> Value {
    json!({ field: { "success": false, "message": message, "code": null, "data": null } })
}

pub(crate) fn current_user_success(id: &str) -> Value {
    json!({ "currentUser": { "success": true, "data": { "user": user_json(id) } } })
}
