use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Results of the nodes that have succeeded so far in one run.
///
/// Grows monotonically as layers commit; a failed node never gets an entry,
/// so downstream nodes see it as missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionContext {
    results: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: &str) -> Option<&Value> {
        self.results.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.results.contains_key(node_id)
    }

    pub fn insert(&mut self, node_id: impl Into<String>, value: Value) {
        self.results.insert(node_id.into(), value);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.results.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for ExecutionContext {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            results: iter.into_iter().collect(),
        }
    }
}
