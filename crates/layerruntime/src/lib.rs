//! Workflow execution runtime
//!
//! This crate provides the engine that runs workflow graphs: layered
//! topological ordering, the kind registry, the per-node executor and the
//! run controller with its pause/step/stop protocol and bounded history.

mod config;
mod executor;
mod history;
pub mod layering;
mod registry;
mod runner;

pub use config::{PausePoint, RuntimeConfig};
pub use executor::{NodeExecutor, NodeInputSnapshot, NodeOutcome};
pub use history::{ExecutionHistory, ExecutionRecord, NodeTrace, RecordStatus};
pub use layering::{execution_layers, Layer};
pub use registry::{NodeRegistry, PassthroughHandler};
pub use runner::{RunController, RunMode, RunProgress, RunStatus, StopHandle};
