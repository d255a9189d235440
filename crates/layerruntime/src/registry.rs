use async_trait::async_trait;
use layercore::{NodeContext, NodeError, NodeHandler, NodeKind, NodeMetadata, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Lookup table from node kind to its handler
pub struct NodeRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
    fallback: Arc<dyn NodeHandler>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(PassthroughHandler),
        }
    }

    /// Register a handler under the kind it reports
    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        let tag = handler.kind().tag().to_string();
        tracing::info!("Registering node kind: {}", tag);
        self.handlers.insert(tag, handler);
    }

    /// Handler for `kind`; kinds nobody registered get the passthrough
    /// handler instead of an error.
    pub fn handler_for(&self, kind: &NodeKind) -> Arc<dyn NodeHandler> {
        match self.handlers.get(kind.tag()) {
            Some(handler) => handler.clone(),
            None => {
                tracing::debug!("No handler for kind '{}', using passthrough", kind);
                self.fallback.clone()
            }
        }
    }

    pub fn is_registered(&self, kind: &NodeKind) -> bool {
        self.handlers.contains_key(kind.tag())
    }

    /// Get all registered kind tags, sorted
    pub fn list_node_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Get metadata for a kind tag
    pub fn get_metadata(&self, tag: &str) -> Option<NodeMetadata> {
        self.handlers.get(tag).map(|h| h.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Default behaviour for kinds without special handling: the resolved
/// `prompt` field is the result.
pub struct PassthroughHandler;

#[async_trait]
impl NodeHandler for PassthroughHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Other("passthrough".to_string())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(Value::Text(ctx.resolved("prompt")))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Returns its resolved prompt text".to_string(),
            category: "general".to_string(),
        }
    }
}
