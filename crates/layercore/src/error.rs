use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure local to a single node. The `Display` form is what ends up in
/// the node's user-visible error text.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input for '{field}': {reason}")]
    InvalidInput {
        field: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Task was canceled by the service")]
    TaskCanceled,

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// Structural and run-control failures. These never come from a single
/// node; they prevent a run (or a run operation) from happening at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow has no nodes")]
    EmptyGraph,

    #[error("Cyclic dependency detected ({processed} of {total} nodes could be ordered)")]
    CyclicDependency { processed: usize, total: usize },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("A run is already in progress")]
    RunInProgress,

    #[error("No paused run to continue")]
    NotPaused,

    #[error("No active run")]
    NoActiveRun,
}
