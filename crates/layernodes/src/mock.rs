//! Scripted stand-in for the external service.

use crate::service::{ServiceClient, ServiceError, TaskStatus};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One request the mock has seen
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub endpoint: String,
    pub payload: serde_json::Value,
}

/// [`ServiceClient`] that replays queued replies and records every request.
///
/// Replies are consumed in order per endpoint; an endpoint with an empty
/// queue answers with a request error.
#[derive(Default)]
pub struct MockServiceClient {
    replies: Mutex<HashMap<String, VecDeque<Result<serde_json::Value, ServiceError>>>>,
    statuses: Mutex<VecDeque<Result<TaskStatus, ServiceError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    polls: Mutex<Vec<String>>,
}

impl MockServiceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful `result` for `endpoint`
    pub fn respond(&self, endpoint: &str, result: serde_json::Value) -> &Self {
        lock(&self.replies)
            .entry(endpoint.to_string())
            .or_default()
            .push_back(Ok(result));
        self
    }

    /// Queue a failure for `endpoint`
    pub fn fail(&self, endpoint: &str, error: ServiceError) -> &Self {
        lock(&self.replies)
            .entry(endpoint.to_string())
            .or_default()
            .push_back(Err(error));
        self
    }

    /// Queue the answer to the next task status check
    pub fn push_status(&self, status: TaskStatus) -> &Self {
        lock(&self.statuses).push_back(Ok(status));
        self
    }

    pub fn push_status_error(&self, error: ServiceError) -> &Self {
        lock(&self.statuses).push_back(Err(error));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Payloads sent to `endpoint`, oldest first
    pub fn payloads(&self, endpoint: &str) -> Vec<serde_json::Value> {
        lock(&self.calls)
            .iter()
            .filter(|call| call.endpoint == endpoint)
            .map(|call| call.payload.clone())
            .collect()
    }

    /// Task ids that were polled, one entry per status check
    pub fn polls(&self) -> Vec<String> {
        lock(&self.polls).clone()
    }
}

#[async_trait]
impl ServiceClient for MockServiceClient {
    async fn call(
        &self,
        endpoint: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ServiceError> {
        lock(&self.calls).push(RecordedCall {
            endpoint: endpoint.to_string(),
            payload,
        });

        lock(&self.replies)
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(ServiceError::Request(format!(
                    "no scripted reply for '{endpoint}'"
                )))
            })
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ServiceError> {
        lock(&self.polls).push(task_id.to_string());

        lock(&self.statuses).pop_front().unwrap_or_else(|| {
            Err(ServiceError::Request(format!(
                "no scripted status for task '{task_id}'"
            )))
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
