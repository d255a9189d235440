use crate::{FlowError, Value, WorkflowError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

pub type NodeId = String;

/// Prefix written into a failed node's result so it is never mistaken for
/// normal output.
pub const ERROR_MARKER: &str = "❌ Error: ";

/// Complete workflow definition: the nodes and edges drawn on the canvas
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `{ "nodes": [...], "edges": [...] }` document.
    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        let mut graph: WorkflowGraph = serde_json::from_str(json)?;

        let mut seen = HashSet::new();
        for node in &graph.nodes {
            if !seen.insert(node.id.clone()) {
                return Err(WorkflowError::DuplicateNodeId(node.id.clone()).into());
            }
        }

        tracing::debug!(
            "Imported workflow graph: {} nodes, {} edges",
            graph.nodes.len(),
            graph.edges.len()
        );
        Ok(graph)
    }

    pub fn to_json_pretty(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), FlowError> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), WorkflowError> {
        if self.node(&node.id).is_some() {
            return Err(WorkflowError::DuplicateNodeId(node.id));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let pos = self.nodes.iter().position(|n| n.id == id)?;
        self.edges.retain(|e| e.source != id && e.target != id);
        Some(self.nodes.remove(pos))
    }

    /// Add a directed edge. Endpoints are not checked; a dangling edge is a
    /// normal state while the graph is being edited.
    pub fn connect(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) {
        self.edges.push(Edge::new(source, target));
    }

    pub fn disconnect(&mut self, source: &str, target: &str) {
        self.edges.retain(|e| !(e.source == source && e.target == target));
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Edges whose target is `id`.
    pub fn upstream_of(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.target == id).collect()
    }

    /// Edges whose source is `id`.
    pub fn downstream_of(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == id).collect()
    }

    /// Source ids of the edges targeting `id`, in edge order.
    pub fn upstream_ids<'a>(edges: &'a [Edge], id: &str) -> Vec<&'a str> {
        edges
            .iter()
            .filter(|e| e.target == id)
            .map(|e| e.source.as_str())
            .collect()
    }

    /// Put every node back to `idle`, keeping its last result visible.
    pub fn reset_run_states(&mut self) {
        for node in &mut self.nodes {
            node.reset_status();
        }
    }
}

/// A unit of work on the canvas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub position: Position,
    #[serde(rename = "data", default)]
    config: NodeConfig,
    #[serde(skip)]
    state: NodeRunState,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            position: Position::default(),
            config: NodeConfig::default(),
            state: NodeRunState::default(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.set(key, value);
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Position { x, y };
        self
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Editing configuration never changes run-state.
    pub fn config_mut(&mut self) -> &mut NodeConfig {
        &mut self.config
    }

    pub fn state(&self) -> &NodeRunState {
        &self.state
    }

    /// Runner transition: the node has been dispatched. Output from an
    /// earlier execution, including an error marker, is discarded.
    pub fn begin_run(&mut self) {
        self.state.status = NodeStatus::Running;
        self.state.result = None;
        self.state.error = None;
    }

    /// Runner transition: the node produced `value`.
    pub fn complete(&mut self, value: Value) {
        self.state.status = NodeStatus::Completed;
        self.state.result = Some(value);
        self.state.error = None;
    }

    /// Runner transition: the node failed. The result is overwritten with
    /// the error marker so stale output never survives a failure.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.state.status = NodeStatus::Error;
        self.state.result = Some(Value::Text(format!("{ERROR_MARKER}{message}")));
        self.state.error = Some(message);
    }

    pub fn reset_status(&mut self) {
        self.state.status = NodeStatus::Idle;
    }
}

/// Transient execution state of a node; never serialized
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeRunState {
    pub status: NodeStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl NodeRunState {
    /// The last result, unless the node's last execution failed. The error
    /// text outlives the status reset, so it decides.
    pub fn usable_result(&self) -> Option<&Value> {
        match self.error {
            Some(_) => None,
            None => self.result.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

/// Node kinds known to the execution core. Tags follow the editor's
/// palette; descriptive aliases are accepted on import.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    TextInput,
    TextGeneration,
    PromptGeneration,
    ImageGeneration,
    ImageEditing,
    VisionAnalysis,
    VideoGeneration,
    Script,
    Debug,
    Other(String),
}

impl NodeKind {
    pub const ALL: [NodeKind; 9] = [
        NodeKind::TextInput,
        NodeKind::TextGeneration,
        NodeKind::PromptGeneration,
        NodeKind::ImageGeneration,
        NodeKind::ImageEditing,
        NodeKind::VisionAnalysis,
        NodeKind::VideoGeneration,
        NodeKind::Script,
        NodeKind::Debug,
    ];

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "prompt" | "text-input" => NodeKind::TextInput,
            "chat" | "text-generation" => NodeKind::TextGeneration,
            "chatForImage" | "prompt-generation" => NodeKind::PromptGeneration,
            "image" | "image-generation" => NodeKind::ImageGeneration,
            "imageEdit" | "image-editing" => NodeKind::ImageEditing,
            "vision" | "vision-analysis" => NodeKind::VisionAnalysis,
            "video" | "video-generation" => NodeKind::VideoGeneration,
            "filter" | "script" => NodeKind::Script,
            "debug" | "debug-passthrough" => NodeKind::Debug,
            other => NodeKind::Other(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            NodeKind::TextInput => "prompt",
            NodeKind::TextGeneration => "chat",
            NodeKind::PromptGeneration => "chatForImage",
            NodeKind::ImageGeneration => "image",
            NodeKind::ImageEditing => "imageEdit",
            NodeKind::VisionAnalysis => "vision",
            NodeKind::VideoGeneration => "video",
            NodeKind::Script => "filter",
            NodeKind::Debug => "debug",
            NodeKind::Other(tag) => tag,
        }
    }
}

impl From<String> for NodeKind {
    fn from(tag: String) -> Self {
        NodeKind::from_tag(&tag)
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        kind.tag().to_string()
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Free-form node configuration (prompt text, model name, parameters)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeConfig(serde_json::Map<String, serde_json::Value>);

impl NodeConfig {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.0.remove(key)
    }

    /// String field, or `""` when absent or not a string.
    pub fn text(&self, key: &str) -> &str {
        self.0.get(key).and_then(|v| v.as_str()).unwrap_or("")
    }

    /// Numeric field; numeric strings are accepted since the editor's
    /// inputs store text.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            serde_json::Value::Bool(b) => Some(*b),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_map(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }
}

/// Directed dependency from a producing node to a consuming node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: NodeId,
    pub target: NodeId,
}

impl Edge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}
