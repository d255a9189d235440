use crate::executor::{NodeInputSnapshot, NodeOutcome};
use chrono::{DateTime, Utc};
use layercore::{ExecutionId, NodeId, NodeKind, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Error,
}

/// Immutable trace of one finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    pub status: RecordStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Every node that was dispatched, keyed by id
    pub nodes: BTreeMap<NodeId, NodeTrace>,
}

impl ExecutionRecord {
    pub fn node(&self, id: &str) -> Option<&NodeTrace> {
        self.nodes.get(id)
    }

    pub fn is_success(&self) -> bool {
        self.status == RecordStatus::Success
    }
}

/// Input and output of one node within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTrace {
    pub kind: NodeKind,
    pub input: NodeInputSnapshot,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl From<&NodeOutcome> for NodeTrace {
    fn from(outcome: &NodeOutcome) -> Self {
        let (output, error) = match &outcome.result {
            Ok(value) => (Some(value.clone()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            kind: outcome.kind.clone(),
            input: outcome.input.clone(),
            output,
            error,
            duration_ms: outcome.duration_ms,
        }
    }
}

/// Most recent execution records, newest first
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    records: VecDeque<ExecutionRecord>,
    capacity: usize,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a record, evicting the oldest ones beyond capacity
    pub fn push(&mut self, record: ExecutionRecord) {
        self.records.push_front(record);
        self.records.truncate(self.capacity);
    }

    pub fn latest(&self) -> Option<&ExecutionRecord> {
        self.records.front()
    }

    pub fn get(&self, execution_id: ExecutionId) -> Option<&ExecutionRecord> {
        self.records.iter().find(|r| r.execution_id == execution_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
