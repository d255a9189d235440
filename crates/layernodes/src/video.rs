use crate::common::{accept_url, call_service, setting};
use crate::config::ServiceConfig;
use crate::service::{ServiceClient, TaskState};
use async_trait::async_trait;
use layercore::{
    is_http_url, NodeContext, NodeError, NodeHandler, NodeKind, NodeMetadata, Value,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Image-to-video. The service answers with a task id; the handler then
/// polls the task until it reaches a terminal state or the wait runs out.
pub struct VideoHandler {
    client: Arc<dyn ServiceClient>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl VideoHandler {
    pub fn new(client: Arc<dyn ServiceClient>, config: &ServiceConfig) -> Self {
        Self {
            client,
            poll_interval: config.poll_interval(),
            poll_timeout: config.poll_timeout(),
        }
    }

    fn payload(ctx: &NodeContext, image_url: String) -> serde_json::Value {
        let mut payload = json!({
            "image_url": image_url,
            "prompt": ctx.resolved("prompt"),
            "resolution": setting(&ctx.config, "resolution", "1080P"),
            "duration": ctx.config.number("duration").unwrap_or(5.0),
            "shot_type": setting(&ctx.config, "shot_type", "single"),
            "prompt_extend": ctx.config.flag("prompt_extend").unwrap_or(false),
        });

        let audio_url = ctx.resolved("audio_url");
        if !audio_url.trim().is_empty() {
            payload["audio_url"] = json!(audio_url.trim());
        }
        let model = ctx.config.text("model");
        if !model.trim().is_empty() {
            payload["model"] = json!(model);
        }
        payload
    }

    async fn wait_for(&self, ctx: &NodeContext, task_id: &str) -> Result<Value, NodeError> {
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = ctx.cancellation.cancelled() => {
                    tracing::info!("Stopped polling video task {}", task_id);
                    return Err(NodeError::Cancelled);
                }
            }

            attempt += 1;
            let status = self.client.task_status(task_id).await?;
            tracing::debug!("Video task {} poll #{}: {:?}", task_id, attempt, status.status);

            match status.status {
                TaskState::Succeeded => return video_url(status.result),
                TaskState::Failed => {
                    return Err(NodeError::TaskFailed(
                        status
                            .message
                            .unwrap_or_else(|| "video generation failed".to_string()),
                    ))
                }
                TaskState::Canceled => return Err(NodeError::TaskCanceled),
                TaskState::Pending | TaskState::Running | TaskState::Unknown => {}
            }

            let elapsed = started.elapsed();
            if elapsed >= self.poll_timeout {
                tracing::warn!("Video task {} still unfinished after {:?}", task_id, elapsed);
                return Err(NodeError::Timeout {
                    ms: self.poll_timeout.as_millis() as u64,
                });
            }

            let percent = (elapsed.as_secs_f64() / self.poll_timeout.as_secs_f64() * 100.0)
                .min(99.0);
            ctx.events.progress(
                percent,
                Some(format!("{:?} after {}s", status.status, elapsed.as_secs())),
            );
        }
    }
}

#[async_trait]
impl NodeHandler for VideoHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::VideoGeneration
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let image_url = ctx.primary_input("image_url", accept_url);
        if !is_http_url(image_url.trim()) {
            return Err(NodeError::InvalidInput {
                field: "image_url".to_string(),
                reason: "an http(s) image URL is required".to_string(),
            });
        }

        let payload = Self::payload(&ctx, image_url.trim().to_string());
        let submitted = call_service(self.client.as_ref(), &ctx, "video", payload).await?;
        let task_id = parse_task_id(&submitted)?;

        tracing::info!("Node {} submitted video task {}", ctx.node_id, task_id);
        ctx.events.info(format!("Video task {task_id} submitted"));

        self.wait_for(&ctx, &task_id).await
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Generate a video from an image, polling until done".to_string(),
            category: "video".to_string(),
        }
    }
}

/// Task id from a submit reply: either the bare id or `{ "task_id": .. }`
fn parse_task_id(reply: &serde_json::Value) -> Result<String, NodeError> {
    let id = match reply {
        serde_json::Value::String(id) => Some(id.as_str()),
        other => other.get("task_id").and_then(|id| id.as_str()),
    };

    id.filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| NodeError::Service(format!("video submit returned no task id: {reply}")))
}

fn video_url(result: Option<serde_json::Value>) -> Result<Value, NodeError> {
    let url = match &result {
        Some(serde_json::Value::String(url)) => Some(url.as_str()),
        Some(other) => other
            .get("video_url")
            .or_else(|| other.get("url"))
            .and_then(|url| url.as_str()),
        None => None,
    };

    url.filter(|url| is_http_url(url))
        .map(|url| Value::Url(url.to_string()))
        .ok_or_else(|| NodeError::TaskFailed("task succeeded without a video URL".to_string()))
}
