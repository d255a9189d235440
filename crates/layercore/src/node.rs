use crate::resolve::{has_unresolved_reference, resolve};
use crate::{
    Edge, EventEmitter, ExecutionContext, Node, NodeConfig, NodeError, NodeId, NodeKind,
    Value, WorkflowGraph,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Behaviour of one node kind
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Kind this handler is registered for
    fn kind(&self) -> NodeKind;

    /// Execute the node with given context
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError>;

    /// Optional: description shown when listing kinds
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node kind
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Everything a handler may look at while executing one node
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,
    pub kind: NodeKind,

    /// Static configuration for this node
    pub config: NodeConfig,

    /// Results committed by earlier layers; identical for every node of a layer
    pub results: Arc<ExecutionContext>,

    /// Edge set of the graph, for upstream lookups
    pub edges: Arc<[Edge]>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancelled when the run is stopped
    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn new(
        node: &Node,
        results: Arc<ExecutionContext>,
        edges: Arc<[Edge]>,
        events: EventEmitter,
    ) -> Self {
        Self {
            node_id: node.id.clone(),
            kind: node.kind.clone(),
            config: node.config().clone(),
            results,
            edges,
            events,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Substitute `{{id}}` markers in `text`
    pub fn resolve(&self, text: &str) -> String {
        resolve(text, &self.results)
    }

    /// Config field `key` with markers substituted; `""` when absent
    pub fn resolved(&self, key: &str) -> String {
        self.resolve(self.config.text(key))
    }

    /// Resolved config field that must not be blank
    pub fn require_text(&self, key: &str) -> Result<String, NodeError> {
        let text = self.resolved(key);
        if text.trim().is_empty() {
            return Err(NodeError::MissingInput(key.to_string()));
        }
        Ok(text)
    }

    /// Resolved manual input, if it is usable as-is: non-blank and with
    /// every marker resolved.
    pub fn manual_input(&self, key: &str) -> Option<String> {
        let text = self.resolved(key);
        if text.trim().is_empty() || has_unresolved_reference(&text) {
            None
        } else {
            Some(text)
        }
    }

    /// Manual-over-upstream precedence: the manual field wins when usable,
    /// otherwise the first upstream result `accept` takes; failing both,
    /// the resolved manual text is returned unchanged.
    pub fn primary_input<F>(&self, key: &str, accept: F) -> String
    where
        F: Fn(&Value) -> Option<String>,
    {
        if let Some(manual) = self.manual_input(key) {
            return manual;
        }
        self.upstream_results()
            .find_map(|(_, value)| accept(value))
            .unwrap_or_else(|| self.resolved(key))
    }

    pub fn upstream_ids(&self) -> Vec<&str> {
        WorkflowGraph::upstream_ids(&self.edges, &self.node_id)
    }

    /// Upstream results present in the context, in edge order. Upstream
    /// nodes that failed or have not run are skipped.
    pub fn upstream_results(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.upstream_ids()
            .into_iter()
            .filter_map(move |id| self.results.get(id).map(|value| (id, value)))
    }
}
