use crate::common::{accept_url, call_service, setting};
use crate::service::ServiceClient;
use async_trait::async_trait;
use layercore::{
    is_http_url, NodeContext, NodeError, NodeHandler, NodeKind, NodeMetadata, Value,
};
use serde_json::json;
use std::sync::Arc;

const DEFAULT_VISION_MODEL: &str = "qwen-vl-plus";
const DEFAULT_QUESTION: &str = "Describe this image";

/// Answers a question about an image. Input is written `url | question`.
pub struct VisionHandler {
    client: Arc<dyn ServiceClient>,
}

impl VisionHandler {
    pub fn new(client: Arc<dyn ServiceClient>) -> Self {
        Self { client }
    }
}

/// Split `url | question`; only the first `|` separates.
fn split_request(input: &str) -> (&str, &str) {
    match input.split_once('|') {
        Some((url, question)) => (url.trim(), question.trim()),
        None => (input.trim(), ""),
    }
}

#[async_trait]
impl NodeHandler for VisionHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::VisionAnalysis
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let input = ctx.primary_input("prompt", accept_url);
        let (url, question) = split_request(&input);

        // "| question" with the image coming from upstream
        let image_url = if url.is_empty() {
            ctx.upstream_results()
                .find_map(|(_, value)| accept_url(value))
                .unwrap_or_default()
        } else {
            url.to_string()
        };

        if !is_http_url(&image_url) {
            return Err(NodeError::InvalidInput {
                field: "prompt".to_string(),
                reason: "expected 'image URL | question'".to_string(),
            });
        }
        let question = if question.is_empty() {
            DEFAULT_QUESTION
        } else {
            question
        };

        let payload = json!({
            "model": setting(&ctx.config, "model", DEFAULT_VISION_MODEL),
            "image_url": image_url,
            "prompt": question,
        });

        let result = call_service(self.client.as_ref(), &ctx, "vision", payload).await?;
        Ok(Value::from_result(result))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Ask a vision model about an image".to_string(),
            category: "image".to_string(),
        }
    }
}
