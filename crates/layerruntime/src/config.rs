use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the run controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Execution records kept in history; the oldest is evicted first
    pub history_size: usize,
    /// How long terminal node statuses stay visible before the reset to idle
    pub reset_delay_ms: u64,
    /// Where debug mode suspends relative to each layer
    pub pause_point: PausePoint,
    /// Upper bound for a single node execution
    pub node_timeout_ms: Option<u64>,
    pub event_buffer_size: usize,
}

impl RuntimeConfig {
    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }

    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            history_size: 20,
            reset_delay_ms: 2000,
            pause_point: PausePoint::BeforeLayer,
            node_timeout_ms: None,
            event_buffer_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PausePoint {
    /// Suspend before every layer, including the first
    #[default]
    BeforeLayer,
    /// Run a layer, then suspend
    AfterLayer,
}
