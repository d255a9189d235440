use crate::common::{accept_text, call_service, setting};
use crate::service::ServiceClient;
use async_trait::async_trait;
use layercore::{
    NodeContext, NodeError, NodeHandler, NodeKind, NodeMetadata, StructuredPrompt, Value,
};
use serde_json::json;
use std::sync::Arc;

const DEFAULT_CHAT_MODEL: &str = "qwen-plus";
const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Prompt for a generation call, by the manual-over-upstream rule
fn prompt_input(ctx: &NodeContext) -> Result<String, NodeError> {
    let prompt = ctx.primary_input("prompt", accept_text);
    if prompt.trim().is_empty() {
        return Err(NodeError::MissingInput("prompt".to_string()));
    }
    Ok(prompt)
}

/// Text generation through the `chat` endpoint
pub struct ChatHandler {
    client: Arc<dyn ServiceClient>,
}

impl ChatHandler {
    pub fn new(client: Arc<dyn ServiceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeHandler for ChatHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::TextGeneration
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let prompt = prompt_input(&ctx)?;
        let payload = json!({
            "model": setting(&ctx.config, "model", DEFAULT_CHAT_MODEL),
            "system_prompt": ctx.resolved("system_prompt"),
            "prompt": prompt,
            "temperature": ctx.config.number("temperature").unwrap_or(DEFAULT_TEMPERATURE),
        });

        let result = call_service(self.client.as_ref(), &ctx, "chat", payload).await?;
        Ok(Value::from_result(result))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Generate text with a chat model".to_string(),
            category: "generation".to_string(),
        }
    }
}

/// Turns an idea into a positive/negative prompt pair for image nodes
pub struct PromptGenHandler {
    client: Arc<dyn ServiceClient>,
}

impl PromptGenHandler {
    pub fn new(client: Arc<dyn ServiceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeHandler for PromptGenHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::PromptGeneration
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let prompt = prompt_input(&ctx)?;
        let payload = json!({
            "model": setting(&ctx.config, "model", DEFAULT_CHAT_MODEL),
            "system_prompt": ctx.resolved("system_prompt"),
            "prompt": prompt,
        });

        let result = call_service(self.client.as_ref(), &ctx, "prompt-gen", payload).await?;
        Ok(Value::StructuredPrompt(structured_prompt(result)?))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Write an image prompt and negative prompt".to_string(),
            category: "generation".to_string(),
        }
    }
}

/// Accepts `{prompt, negative_prompt}` as an object or as JSON text; any
/// other text is taken as a bare prompt.
fn structured_prompt(result: serde_json::Value) -> Result<StructuredPrompt, NodeError> {
    match result {
        serde_json::Value::String(text) => Ok(serde_json::from_str(&text).unwrap_or(
            StructuredPrompt {
                prompt: text,
                negative_prompt: String::new(),
            },
        )),
        object @ serde_json::Value::Object(_) => serde_json::from_value(object).map_err(|e| {
            NodeError::ExecutionFailed(format!("malformed prompt reply: {e}"))
        }),
        other => Err(NodeError::ExecutionFailed(format!(
            "unexpected prompt reply: {other}"
        ))),
    }
}
