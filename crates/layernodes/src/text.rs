use async_trait::async_trait;
use layercore::{NodeContext, NodeError, NodeHandler, NodeKind, NodeMetadata, Value};

/// Hands its resolved `prompt` to downstream nodes
pub struct TextInputHandler;

#[async_trait]
impl NodeHandler for TextInputHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::TextInput
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(Value::Text(ctx.resolved("prompt")))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Static text, with {{id}} references resolved".to_string(),
            category: "input".to_string(),
        }
    }
}

/// Forwards the first upstream result unchanged so it can be inspected
pub struct DebugHandler;

#[async_trait]
impl NodeHandler for DebugHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Debug
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let value = match ctx.upstream_results().next() {
            Some((source, value)) => {
                tracing::info!("[DEBUG] {} <- {}: {}", ctx.node_id, source, value.render());
                value.clone()
            }
            None => Value::Text(ctx.resolved("prompt")),
        };

        ctx.events.info(value.render());
        Ok(value)
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Passes the first upstream result through for inspection".to_string(),
            category: "utility".to_string(),
        }
    }
}
