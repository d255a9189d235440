//! Client side of the external execution service.
//!
//! Every model-backed node kind talks to the service through
//! [`ServiceClient`], so tests can swap the HTTP implementation for
//! [`crate::mock::MockServiceClient`].

use crate::config::ServiceConfig;
use async_trait::async_trait;
use layercore::NodeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<ServiceError> for NodeError {
    fn from(err: ServiceError) -> Self {
        NodeError::Service(err.to_string())
    }
}

/// Lifecycle states reported for a long-running task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Canceled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: TaskState,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl TaskStatus {
    pub fn new(status: TaskState) -> Self {
        Self {
            status,
            result: None,
            message: None,
        }
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Invoke `endpoint` and return the `result` of its reply
    async fn call(
        &self,
        endpoint: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ServiceError>;

    /// Current state of a task started by an earlier call
    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ServiceError>;
}

/// [`ServiceClient`] over plain HTTP with JSON bodies
pub struct HttpServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpServiceClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ServiceError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl ServiceClient for HttpServiceClient {
    async fn call(
        &self,
        endpoint: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ServiceError> {
        let url = self.url(endpoint);
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?;

        let mut body = read_body(response).await?;
        match body.get_mut("result") {
            Some(result) => Ok(result.take()),
            None => Err(ServiceError::InvalidResponse(format!(
                "reply from '{endpoint}' has no result"
            ))),
        }
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ServiceError> {
        let url = self.url(&format!("tasks/{task_id}"));
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?;

        let body = read_body(response).await?;
        serde_json::from_value(body).map_err(|e| ServiceError::InvalidResponse(e.to_string()))
    }
}

async fn read_body(response: reqwest::Response) -> Result<serde_json::Value, ServiceError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ServiceError::Request(format!("failed to read response: {e}")))?;

    if !status.is_success() {
        return Err(ServiceError::Status {
            status: status.as_u16(),
            message: failure_reason(&text),
        });
    }

    serde_json::from_str(&text).map_err(|e| ServiceError::InvalidResponse(e.to_string()))
}

/// Human readable reason from an error body: its `detail`, else its
/// `message`, else the raw text. Non-string reasons are rendered as JSON.
pub fn failure_reason(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };

    let reason = ["detail", "message"]
        .iter()
        .filter_map(|key| json.get(*key))
        .find(|value| match value {
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => !s.is_empty(),
            _ => true,
        });

    match reason {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => body.to_string(),
    }
}
