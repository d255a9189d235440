use crate::common::{accept_url, call_service, resource, setting};
use crate::service::ServiceClient;
use async_trait::async_trait;
use layercore::resolve::has_unresolved_reference;
use layercore::{
    is_http_url, NodeContext, NodeError, NodeHandler, NodeKind, NodeMetadata, Value,
};
use serde_json::json;
use std::sync::Arc;

const DEFAULT_IMAGE_MODEL: &str = "qwen-image-max";
const DEFAULT_IMAGE_SIZE: &str = "1104*1472";
const DEFAULT_EDIT_MODEL: &str = "qwen-image-edit-plus";

/// Text-to-image through the `image` endpoint
pub struct ImageHandler {
    client: Arc<dyn ServiceClient>,
}

impl ImageHandler {
    pub fn new(client: Arc<dyn ServiceClient>) -> Self {
        Self { client }
    }

    /// Prompt and negative prompt. A usable manual prompt wins; otherwise
    /// an upstream structured prompt supplies both halves, and plain
    /// upstream text only the prompt. A manual negative prompt always
    /// overrides.
    fn prompts(ctx: &NodeContext) -> (String, String) {
        let manual_negative = ctx.manual_input("negative_prompt");

        if let Some(prompt) = ctx.manual_input("prompt") {
            return (prompt, manual_negative.unwrap_or_default());
        }

        let upstream = ctx.upstream_results().find_map(|(_, value)| {
            match value.as_structured_prompt() {
                Some(structured) => Some((
                    structured.prompt.clone(),
                    structured.negative_prompt.clone(),
                )),
                None => value.as_str().map(|text| (text.to_string(), String::new())),
            }
        });

        match upstream {
            Some((prompt, negative)) => (prompt, manual_negative.unwrap_or(negative)),
            None => (
                ctx.resolved("prompt"),
                manual_negative.unwrap_or_default(),
            ),
        }
    }
}

#[async_trait]
impl NodeHandler for ImageHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::ImageGeneration
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let (prompt, negative_prompt) = Self::prompts(&ctx);
        if prompt.trim().is_empty() {
            return Err(NodeError::MissingInput("prompt".to_string()));
        }

        let payload = json!({
            "model": setting(&ctx.config, "model", DEFAULT_IMAGE_MODEL),
            "prompt": prompt,
            "negative_prompt": negative_prompt,
            "size": setting(&ctx.config, "size", DEFAULT_IMAGE_SIZE),
        });

        let result = call_service(self.client.as_ref(), &ctx, "image", payload).await?;
        Ok(resource(result))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Generate an image from a prompt".to_string(),
            category: "image".to_string(),
        }
    }
}

/// Instruction-driven editing of one or more images
pub struct ImageEditHandler {
    client: Arc<dyn ServiceClient>,
}

impl ImageEditHandler {
    pub fn new(client: Arc<dyn ServiceClient>) -> Self {
        Self { client }
    }

    /// Manual `images` (one URL per line) when any line resolves to a URL,
    /// otherwise every upstream URL result.
    fn images(ctx: &NodeContext) -> Vec<String> {
        let manual: Vec<String> = ctx
            .config
            .text("images")
            .lines()
            .map(|line| ctx.resolve(line.trim()))
            .filter(|url| is_http_url(url) && !has_unresolved_reference(url))
            .collect();

        if !manual.is_empty() {
            return manual;
        }

        ctx.upstream_results()
            .filter_map(|(_, value)| accept_url(value))
            .collect()
    }
}

#[async_trait]
impl NodeHandler for ImageEditHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::ImageEditing
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let images = Self::images(&ctx);
        if images.is_empty() {
            return Err(NodeError::InvalidInput {
                field: "images".to_string(),
                reason: "at least one image URL is required; connect an image node or list URLs"
                    .to_string(),
            });
        }
        let prompt = ctx.require_text("prompt")?;

        tracing::debug!("Node {} editing {} image(s)", ctx.node_id, images.len());
        let payload = json!({
            "model": setting(&ctx.config, "model", DEFAULT_EDIT_MODEL),
            "images": images,
            "prompt": prompt,
            "negative_prompt": ctx.resolved("negative_prompt"),
        });

        let result = call_service(self.client.as_ref(), &ctx, "image-edit", payload).await?;
        Ok(resource(result))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Edit images following an instruction".to_string(),
            category: "image".to_string(),
        }
    }
}
