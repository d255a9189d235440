//! Core abstractions for the layerflow execution core
//!
//! This crate provides the graph model, result values, the per-run
//! execution context, variable resolution and the node handler contract
//! that all other components depend on. It has no runtime dependencies.

mod context;
mod error;
pub mod events;
mod graph;
mod node;
pub mod resolve;
mod value;

pub use context::ExecutionContext;
pub use error::{FlowError, NodeError, WorkflowError};
pub use graph::{
    Edge, Node, NodeConfig, NodeId, NodeKind, NodeRunState, NodeStatus,
    Position, WorkflowGraph, ERROR_MARKER,
};
pub use node::{NodeContext, NodeHandler, NodeMetadata};
pub use value::{is_http_url, StructuredPrompt, Value};
pub use events::*;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
