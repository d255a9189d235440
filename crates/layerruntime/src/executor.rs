use crate::registry::NodeRegistry;
use futures::FutureExt;
use layercore::{
    Edge, EventEmitter, ExecutionContext, Node, NodeConfig, NodeContext, NodeError, NodeId,
    NodeKind, Value,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Dispatches a single node to the handler registered for its kind.
///
/// Never fails past its own boundary: handler errors, panics and timeouts
/// all come back as a failed [`NodeOutcome`].
pub struct NodeExecutor {
    registry: Arc<NodeRegistry>,
    node_timeout: Option<Duration>,
}

impl NodeExecutor {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            node_timeout: None,
        }
    }

    pub fn with_timeout(mut self, node_timeout: Option<Duration>) -> Self {
        self.node_timeout = node_timeout;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Execute `node` against the committed `results` of earlier layers
    pub async fn execute(
        &self,
        node: &Node,
        results: Arc<ExecutionContext>,
        edges: Arc<[Edge]>,
        events: EventEmitter,
        cancellation: CancellationToken,
    ) -> NodeOutcome {
        let handler = self.registry.handler_for(&node.kind);
        let ctx = NodeContext::new(node, results, edges, events).with_cancellation(cancellation);
        let input = NodeInputSnapshot::capture(&ctx);

        tracing::debug!("Executing node {} ({})", node.id, node.kind);
        let start = Instant::now();

        let task = AssertUnwindSafe(handler.execute(ctx)).catch_unwind();
        let result = match self.node_timeout {
            Some(limit) => match timeout(limit, task).await {
                Ok(finished) => finished,
                Err(_) => Ok(Err(NodeError::Timeout {
                    ms: limit.as_millis() as u64,
                })),
            },
            None => task.await,
        };
        let result = result.unwrap_or_else(|panic| {
            Err(NodeError::ExecutionFailed(format!(
                "node panicked: {}",
                panic_message(panic.as_ref())
            )))
        });

        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!("Node {} completed in {}ms", node.id, duration_ms),
            Err(e) => tracing::error!("Node {} failed: {}", node.id, e),
        }

        NodeOutcome {
            node_id: node.id.clone(),
            kind: node.kind.clone(),
            input,
            result,
            duration_ms,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// What a node saw when it was dispatched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInputSnapshot {
    pub config: NodeConfig,
    /// Results of upstream nodes that were available in the context
    pub upstream: BTreeMap<NodeId, Value>,
}

impl NodeInputSnapshot {
    fn capture(ctx: &NodeContext) -> Self {
        Self {
            config: ctx.config.clone(),
            upstream: ctx
                .upstream_results()
                .map(|(id, value)| (id.to_string(), value.clone()))
                .collect(),
        }
    }
}

/// Tagged result of executing one node
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub node_id: NodeId,
    pub kind: NodeKind,
    pub input: NodeInputSnapshot,
    pub result: Result<Value, NodeError>,
    pub duration_ms: u64,
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}
