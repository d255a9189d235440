use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where and how the external execution service is reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base address; endpoints are appended as `{base_url}/{endpoint}`
    pub base_url: String,
    pub request_timeout_ms: u64,
    /// Pause between two status checks of a long-running task
    pub poll_interval_ms: u64,
    /// Give up on a long-running task after this long
    pub poll_timeout_ms: u64,
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_string(),
            request_timeout_ms: 120_000,
            poll_interval_ms: 5_000,
            poll_timeout_ms: 600_000,
        }
    }
}
