//! Built-in node kinds
//!
//! One handler per kind of the editor palette. Model-backed kinds reach the
//! external service through a shared [`ServiceClient`].

mod common;
mod config;
mod generation;
mod image;
pub mod mock;
mod script;
mod service;
mod text;
mod video;
mod vision;

pub use config::ServiceConfig;
pub use generation::{ChatHandler, PromptGenHandler};
pub use image::{ImageEditHandler, ImageHandler};
pub use script::{ScriptHandler, Transform};
pub use service::{
    failure_reason, HttpServiceClient, ServiceClient, ServiceError, TaskState, TaskStatus,
};
pub use text::{DebugHandler, TextInputHandler};
pub use video::VideoHandler;
pub use vision::VisionHandler;

use layerruntime::NodeRegistry;
use std::sync::Arc;

/// Register every built-in kind with a registry
pub fn register_all(
    registry: &mut NodeRegistry,
    client: Arc<dyn ServiceClient>,
    config: &ServiceConfig,
) {
    registry.register(Arc::new(TextInputHandler));
    registry.register(Arc::new(ChatHandler::new(client.clone())));
    registry.register(Arc::new(PromptGenHandler::new(client.clone())));
    registry.register(Arc::new(ImageHandler::new(client.clone())));
    registry.register(Arc::new(ImageEditHandler::new(client.clone())));
    registry.register(Arc::new(VisionHandler::new(client.clone())));
    registry.register(Arc::new(VideoHandler::new(client, config)));
    registry.register(Arc::new(ScriptHandler));
    registry.register(Arc::new(DebugHandler));
}

/// Registry with every built-in kind
pub fn default_registry(client: Arc<dyn ServiceClient>, config: &ServiceConfig) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry, client, config);
    registry
}
