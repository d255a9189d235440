use crate::config::{PausePoint, RuntimeConfig};
use crate::executor::{NodeExecutor, NodeOutcome};
use crate::history::{ExecutionHistory, ExecutionRecord, NodeTrace, RecordStatus};
use crate::layering::{execution_layers, Layer};
use crate::registry::NodeRegistry;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use layercore::{
    Edge, EventBus, ExecutionContext, ExecutionEvent, ExecutionId, FlowError, Node, NodeId,
    WorkflowError, WorkflowGraph,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run every layer without stopping
    Auto,
    /// Suspend around each layer and wait for [`RunController::step`]
    Debug,
}

/// Observable state of the active run
#[derive(Debug, Clone, PartialEq)]
pub struct RunProgress {
    pub execution_id: ExecutionId,
    /// Nodes that finished executing, successfully or not
    pub completed_nodes: usize,
    pub total_nodes: usize,
    /// Index of the next layer to execute
    pub layer_index: usize,
    pub total_layers: usize,
    pub paused: bool,
    pub mode: RunMode,
    /// Members of the next layer; empty once all layers ran
    pub next_layer: Vec<NodeId>,
}

/// Where a run operation left the run
#[derive(Debug, Clone)]
pub enum RunStatus {
    Paused(RunProgress),
    Completed(ExecutionRecord),
    Failed(ExecutionRecord),
    Stopped,
}

impl RunStatus {
    pub fn record(&self) -> Option<&ExecutionRecord> {
        match self {
            RunStatus::Completed(record) | RunStatus::Failed(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, RunStatus::Paused(_))
    }
}

/// Requests a stop of whatever run the owning controller is driving.
///
/// Clones share state, so a handle taken before `start` can stop that run
/// from another task. The request is honoured at layer boundaries; results
/// of nodes still in flight are discarded.
#[derive(Clone, Default)]
pub struct StopHandle {
    token: Arc<Mutex<CancellationToken>>,
}

impl StopHandle {
    pub fn stop(&self) {
        tracing::info!("Stop requested");
        self.lock().cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.lock().is_cancelled()
    }

    /// Token for a new run; a stale stop request does not carry over
    fn rearm(&self) -> CancellationToken {
        let mut token = self.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    fn lock(&self) -> MutexGuard<'_, CancellationToken> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the run state of one workflow run at a time and exposes the
/// start / step / resume / stop protocol.
///
/// The graph stays owned by the caller; the controller only writes node
/// run-state and reads everything else.
pub struct RunController {
    executor: NodeExecutor,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
    history: ExecutionHistory,
    session: Option<RunSession>,
    stop: StopHandle,
    reset_due: Option<tokio::time::Instant>,
}

impl RunController {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    pub fn with_config(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let executor = NodeExecutor::new(registry).with_timeout(config.node_timeout());
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size.max(1)));

        Self {
            executor,
            event_bus,
            history: ExecutionHistory::new(config.history_size),
            config,
            session: None,
            stop: StopHandle::default(),
            reset_due: None,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        self.executor.registry()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    /// Subscribe to execution events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn progress(&self) -> Option<RunProgress> {
        self.session.as_ref().map(RunSession::progress)
    }

    /// Start a run over `graph`.
    ///
    /// # Errors
    /// Rejects an empty graph, a cyclic graph and a second concurrent run;
    /// in all three cases no node is touched and nothing is recorded.
    pub async fn start(
        &mut self,
        graph: &mut WorkflowGraph,
        mode: RunMode,
    ) -> Result<RunStatus, FlowError> {
        if self.session.is_some() {
            return Err(WorkflowError::RunInProgress.into());
        }
        if graph.is_empty() {
            return Err(WorkflowError::EmptyGraph.into());
        }

        let layers = execution_layers(graph)?;
        graph.reset_run_states();
        self.reset_due = None;
        let session = RunSession::new(layers, graph.nodes().len(), mode, self.stop.rearm());

        tracing::info!(
            "Starting run {}: {} nodes in {} layers ({:?} mode)",
            session.execution_id,
            session.total_nodes,
            session.layers.len(),
            mode
        );
        self.event_bus.emit(ExecutionEvent::RunStarted {
            execution_id: session.execution_id,
            total_nodes: session.total_nodes,
            total_layers: session.layers.len(),
            timestamp: Utc::now(),
        });
        self.session = Some(session);

        let budget = match (mode, self.config.pause_point) {
            (RunMode::Auto, _) => None,
            (RunMode::Debug, PausePoint::BeforeLayer) => Some(0),
            (RunMode::Debug, PausePoint::AfterLayer) => Some(1),
        };
        Ok(self.drive(graph, budget).await)
    }

    /// Execute exactly one layer of a paused run, then pause again or
    /// finish if it was the last one.
    pub async fn step(&mut self, graph: &mut WorkflowGraph) -> Result<RunStatus, FlowError> {
        self.ensure_paused()?;
        Ok(self.drive(graph, Some(1)).await)
    }

    /// Leave debug mode and run the remaining layers to the end.
    pub async fn resume(&mut self, graph: &mut WorkflowGraph) -> Result<RunStatus, FlowError> {
        self.ensure_paused()?;
        if let Some(session) = self.session.as_mut() {
            session.mode = RunMode::Auto;
        }
        Ok(self.drive(graph, None).await)
    }

    /// Abandon the active run: pending layers are dropped, every node goes
    /// back to idle and no history record is written.
    pub fn stop(&mut self, graph: &mut WorkflowGraph) -> Result<RunStatus, FlowError> {
        if self.session.is_none() {
            return Err(WorkflowError::NoActiveRun.into());
        }
        self.stop.stop();
        Ok(self.abort(graph))
    }

    /// When the terminal statuses of the last finished run have been on
    /// display for the configured delay. `None` while a run is active or
    /// once the statuses were cleared.
    pub fn reset_due(&self) -> Option<tokio::time::Instant> {
        self.reset_due
    }

    /// Return every node status to idle after a finished run. Results and
    /// error texts are kept.
    ///
    /// # Errors
    /// Rejected while a run is active or paused.
    pub fn clear_statuses(&mut self, graph: &mut WorkflowGraph) -> Result<(), FlowError> {
        if self.session.is_some() {
            return Err(WorkflowError::RunInProgress.into());
        }
        graph.reset_run_states();
        self.reset_due = None;
        Ok(())
    }

    /// Execute one node outside any run, against the results its siblings
    /// currently hold. Only that node's state changes.
    pub async fn run_node(
        &mut self,
        graph: &mut WorkflowGraph,
        node_id: &str,
    ) -> Result<NodeOutcome, FlowError> {
        if self.session.is_some() {
            return Err(WorkflowError::RunInProgress.into());
        }
        let node = graph
            .node(node_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))?;

        let context: ExecutionContext = graph
            .nodes()
            .iter()
            .filter(|n| n.id != node_id)
            .filter_map(|n| {
                n.state()
                    .usable_result()
                    .map(|value| (n.id.clone(), value.clone()))
            })
            .collect();

        let execution_id = ExecutionId::new_v4();
        tracing::info!("Running node {} in isolation ({})", node_id, execution_id);

        if let Some(target) = graph.node_mut(node_id) {
            target.begin_run();
        }
        emit_node_started(&self.event_bus, execution_id, &node);

        let edges: Arc<[Edge]> = graph.edges().into();
        let outcome = self
            .executor
            .execute(
                &node,
                Arc::new(context),
                edges,
                self.event_bus.create_emitter(execution_id, node.id.clone()),
                CancellationToken::new(),
            )
            .await;

        commit_outcome(&self.event_bus, execution_id, graph, &outcome);
        Ok(outcome)
    }

    fn ensure_paused(&self) -> Result<(), WorkflowError> {
        match &self.session {
            Some(session) if session.paused => Ok(()),
            Some(_) => Err(WorkflowError::RunInProgress),
            None => Err(WorkflowError::NotPaused),
        }
    }

    /// Run layers until the budget is spent (`None` means unlimited), the
    /// run fails, finishes or is stopped.
    async fn drive(&mut self, graph: &mut WorkflowGraph, mut budget: Option<usize>) -> RunStatus {
        loop {
            let Some(session) = self.session.as_mut() else {
                return RunStatus::Stopped;
            };
            session.paused = false;

            if session.cancellation.is_cancelled() {
                return self.abort(graph);
            }
            if session.next_layer >= session.layers.len() {
                return self.finish();
            }
            if budget == Some(0) {
                return self.pause();
            }

            let result = session
                .run_layer(graph, &self.executor, &self.event_bus)
                .await;
            match result {
                LayerResult::Stopped => return self.abort(graph),
                LayerResult::Committed { failures } if failures > 0 => {
                    return self.finish();
                }
                LayerResult::Committed { .. } => {}
            }

            if let Some(remaining) = budget.as_mut() {
                *remaining -= 1;
            }
        }
    }

    fn pause(&mut self) -> RunStatus {
        let Some(session) = self.session.as_mut() else {
            return RunStatus::Stopped;
        };
        session.paused = true;

        tracing::info!(
            "Run {} paused before layer {}/{}",
            session.execution_id,
            session.next_layer + 1,
            session.layers.len()
        );
        self.event_bus.emit(ExecutionEvent::RunPaused {
            execution_id: session.execution_id,
            next_layer: session.next_layer,
            total_layers: session.layers.len(),
            timestamp: Utc::now(),
        });
        RunStatus::Paused(session.progress())
    }

    fn abort(&mut self, graph: &mut WorkflowGraph) -> RunStatus {
        if let Some(session) = self.session.take() {
            tracing::warn!("Run {} stopped", session.execution_id);
            self.event_bus.emit(ExecutionEvent::RunStopped {
                execution_id: session.execution_id,
                timestamp: Utc::now(),
            });
        }
        graph.reset_run_states();
        RunStatus::Stopped
    }

    fn finish(&mut self) -> RunStatus {
        let Some(session) = self.session.take() else {
            return RunStatus::Stopped;
        };
        let record = session.into_record();

        match &record.error {
            None => tracing::info!(
                "Run {} completed in {}ms",
                record.execution_id,
                record.duration_ms
            ),
            Some(error) => tracing::error!("Run {} failed: {}", record.execution_id, error),
        }
        self.event_bus.emit(ExecutionEvent::RunCompleted {
            execution_id: record.execution_id,
            success: record.is_success(),
            duration_ms: record.duration_ms,
            timestamp: Utc::now(),
        });
        self.history.push(record.clone());

        // terminal statuses stay on the graph until the host clears them
        self.reset_due = Some(tokio::time::Instant::now() + self.config.reset_delay());

        match record.status {
            RecordStatus::Success => RunStatus::Completed(record),
            RecordStatus::Error => RunStatus::Failed(record),
        }
    }
}

enum LayerResult {
    Committed { failures: usize },
    Stopped,
}

/// Run state created at start and dropped at the end of a run
struct RunSession {
    execution_id: ExecutionId,
    started_at: DateTime<Utc>,
    clock: Instant,
    layers: Vec<Layer>,
    next_layer: usize,
    context: ExecutionContext,
    traces: BTreeMap<NodeId, NodeTrace>,
    failed_nodes: Vec<NodeId>,
    completed_nodes: usize,
    total_nodes: usize,
    mode: RunMode,
    paused: bool,
    cancellation: CancellationToken,
}

impl RunSession {
    fn new(
        layers: Vec<Layer>,
        total_nodes: usize,
        mode: RunMode,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            execution_id: ExecutionId::new_v4(),
            started_at: Utc::now(),
            clock: Instant::now(),
            layers,
            next_layer: 0,
            context: ExecutionContext::new(),
            traces: BTreeMap::new(),
            failed_nodes: Vec::new(),
            completed_nodes: 0,
            total_nodes,
            mode,
            paused: false,
            cancellation,
        }
    }

    fn progress(&self) -> RunProgress {
        RunProgress {
            execution_id: self.execution_id,
            completed_nodes: self.completed_nodes,
            total_nodes: self.total_nodes,
            layer_index: self.next_layer,
            total_layers: self.layers.len(),
            paused: self.paused,
            mode: self.mode,
            next_layer: self.layers.get(self.next_layer).cloned().unwrap_or_default(),
        }
    }

    /// Execute the next layer as one fan-out/fan-in batch and commit it.
    ///
    /// Every member sees the same context snapshot; nothing a sibling
    /// produces is visible until the whole batch has committed.
    async fn run_layer(
        &mut self,
        graph: &mut WorkflowGraph,
        executor: &NodeExecutor,
        event_bus: &EventBus,
    ) -> LayerResult {
        let layer_index = self.next_layer;
        let layer = self.layers[layer_index].clone();

        tracing::info!(
            "Run {}: layer {}/{} {:?}",
            self.execution_id,
            layer_index + 1,
            self.layers.len(),
            layer
        );
        event_bus.emit(ExecutionEvent::LayerStarted {
            execution_id: self.execution_id,
            layer_index,
            node_ids: layer.clone(),
            timestamp: Utc::now(),
        });

        let nodes: Vec<Node> = layer
            .iter()
            .filter_map(|id| graph.node(id).cloned())
            .collect();
        for node in &nodes {
            if let Some(n) = graph.node_mut(&node.id) {
                n.begin_run();
            }
            emit_node_started(event_bus, self.execution_id, node);
        }

        let snapshot = Arc::new(self.context.clone());
        let edges: Arc<[Edge]> = graph.edges().into();
        let outcomes = join_all(nodes.iter().map(|node| {
            executor.execute(
                node,
                snapshot.clone(),
                edges.clone(),
                event_bus.create_emitter(self.execution_id, node.id.clone()),
                self.cancellation.child_token(),
            )
        }))
        .await;

        if self.cancellation.is_cancelled() {
            tracing::warn!(
                "Run {} stopped during layer {}; discarding {} results",
                self.execution_id,
                layer_index + 1,
                outcomes.len()
            );
            return LayerResult::Stopped;
        }

        let mut failures = 0;
        for outcome in &outcomes {
            self.traces
                .insert(outcome.node_id.clone(), NodeTrace::from(outcome));
            self.completed_nodes += 1;

            match &outcome.result {
                Ok(value) => {
                    self.context.insert(outcome.node_id.clone(), value.clone());
                }
                Err(_) => {
                    failures += 1;
                    self.failed_nodes.push(outcome.node_id.clone());
                }
            }
            commit_outcome(event_bus, self.execution_id, graph, outcome);
        }

        self.next_layer += 1;
        LayerResult::Committed { failures }
    }

    fn into_record(self) -> ExecutionRecord {
        let (status, error) = if self.failed_nodes.is_empty() {
            (RecordStatus::Success, None)
        } else {
            (
                RecordStatus::Error,
                Some(format!(
                    "{} node(s) failed: {}",
                    self.failed_nodes.len(),
                    self.failed_nodes.join(", ")
                )),
            )
        };

        ExecutionRecord {
            execution_id: self.execution_id,
            status,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_ms: self.clock.elapsed().as_millis() as u64,
            error,
            nodes: self.traces,
        }
    }
}

fn emit_node_started(event_bus: &EventBus, execution_id: ExecutionId, node: &Node) {
    event_bus.emit(ExecutionEvent::NodeStarted {
        execution_id,
        node_id: node.id.clone(),
        node_type: node.kind.tag().to_string(),
        timestamp: Utc::now(),
    });
}

/// Write an outcome into the node's run-state and announce it
fn commit_outcome(
    event_bus: &EventBus,
    execution_id: ExecutionId,
    graph: &mut WorkflowGraph,
    outcome: &NodeOutcome,
) {
    let node = graph.node_mut(&outcome.node_id);
    match &outcome.result {
        Ok(value) => {
            if let Some(node) = node {
                node.complete(value.clone());
            }
            event_bus.emit(ExecutionEvent::NodeCompleted {
                execution_id,
                node_id: outcome.node_id.clone(),
                result: value.clone(),
                duration_ms: outcome.duration_ms,
                timestamp: Utc::now(),
            });
        }
        Err(e) => {
            if let Some(node) = node {
                node.fail(e.to_string());
            }
            event_bus.emit(ExecutionEvent::NodeFailed {
                execution_id,
                node_id: outcome.node_id.clone(),
                error: e.to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}
