use async_trait::async_trait;
use layercore::{
    ExecutionEvent, Node, NodeContext, NodeError, NodeHandler, NodeKind, NodeStatus, Value,
    WorkflowError, WorkflowGraph, ERROR_MARKER, FlowError,
};
use layerruntime::{
    NodeRegistry, PausePoint, RunController, RunMode, RunStatus, RuntimeConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Returns its resolved `text` field
struct EchoHandler;

#[async_trait]
impl NodeHandler for EchoHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::TextInput
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(Value::Text(ctx.resolved("text")))
    }
}

/// Upper-cases its primary input; fails when `fail` is set
struct ShoutHandler;

#[async_trait]
impl NodeHandler for ShoutHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::TextGeneration
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        if ctx.config.flag("fail").unwrap_or(false) {
            return Err(NodeError::ExecutionFailed("asked to fail".to_string()));
        }
        let input = ctx.primary_input("prompt", |v| v.as_str().map(str::to_string));
        Ok(Value::Text(input.to_uppercase()))
    }
}

struct CountingHandler {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl NodeHandler for CountingHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::from_tag("count")
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<Value, NodeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Value::Text(n.to_string()))
    }
}

/// Sleeps for a long time unless the run is stopped
struct SlowHandler {
    honour_cancel: bool,
}

#[async_trait]
impl NodeHandler for SlowHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::from_tag(if self.honour_cancel { "slow" } else { "stubborn" })
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let sleep = tokio::time::sleep(Duration::from_secs(30));
        if self.honour_cancel {
            tokio::select! {
                _ = sleep => Ok(Value::Text("slept".to_string())),
                _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
            }
        } else {
            sleep.await;
            Ok(Value::Text("slept".to_string()))
        }
    }
}

struct PanicHandler;

#[async_trait]
impl NodeHandler for PanicHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::from_tag("boom")
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<Value, NodeError> {
        panic!("handler exploded");
    }
}

fn registry(calls: Arc<AtomicUsize>) -> Arc<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(EchoHandler));
    registry.register(Arc::new(ShoutHandler));
    registry.register(Arc::new(CountingHandler { calls }));
    registry.register(Arc::new(SlowHandler { honour_cancel: true }));
    registry.register(Arc::new(SlowHandler { honour_cancel: false }));
    registry.register(Arc::new(PanicHandler));
    Arc::new(registry)
}

fn quick_config() -> RuntimeConfig {
    RuntimeConfig {
        reset_delay_ms: 0,
        ..RuntimeConfig::default()
    }
}

fn controller(config: RuntimeConfig) -> (RunController, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (
        RunController::with_config(registry(calls.clone()), config),
        calls,
    )
}

fn text(id: &str, value: &str) -> Node {
    Node::new(id, NodeKind::TextInput).with_config("text", value)
}

fn shout(id: &str) -> Node {
    Node::new(id, NodeKind::TextGeneration)
}

fn counter(id: &str) -> Node {
    Node::new(id, NodeKind::from_tag("count"))
}

fn build(nodes: Vec<Node>, edges: &[(&str, &str)]) -> WorkflowGraph {
    let mut graph = WorkflowGraph::new();
    for node in nodes {
        graph.add_node(node).unwrap();
    }
    for (from, to) in edges {
        graph.connect(*from, *to);
    }
    graph
}

fn result_of<'a>(graph: &'a WorkflowGraph, id: &str) -> Option<&'a Value> {
    graph.node(id).and_then(|n| n.state().result.as_ref())
}

#[tokio::test]
async fn linear_chain_passes_results_downstream() {
    init_tracing();
    let (mut runner, _) = controller(quick_config());
    let mut graph = build(vec![text("a", "hello"), shout("b")], &[("a", "b")]);

    let status = runner.start(&mut graph, RunMode::Auto).await.unwrap();

    let RunStatus::Completed(record) = status else {
        panic!("expected completion, got {status:?}");
    };
    let b = record.node("b").unwrap();
    assert_eq!(b.input.upstream.get("a"), Some(&Value::from("hello")));
    assert_eq!(b.output, Some(Value::from("HELLO")));
    assert_eq!(result_of(&graph, "b"), Some(&Value::from("HELLO")));
    assert!(!runner.is_active());
}

#[tokio::test]
async fn markers_resolve_against_earlier_layers() {
    let (mut runner, _) = controller(quick_config());
    let mut graph = build(
        vec![
            text("name", "world"),
            text("greeting", "hello {{name}} and {{nobody}}"),
        ],
        &[("name", "greeting")],
    );

    runner.start(&mut graph, RunMode::Auto).await.unwrap();

    assert_eq!(
        result_of(&graph, "greeting"),
        Some(&Value::from("hello world and {{nobody}}"))
    );
}

#[tokio::test]
async fn failed_layer_stops_later_layers_but_not_siblings() {
    init_tracing();
    let (mut runner, calls) = controller(quick_config());
    // a -> b (fails) -> c, a -> d
    let mut graph = build(
        vec![
            text("a", "go"),
            shout("b").with_config("fail", true),
            counter("c"),
            counter("d"),
        ],
        &[("a", "b"), ("b", "c"), ("a", "d")],
    );

    let status = runner.start(&mut graph, RunMode::Auto).await.unwrap();

    let RunStatus::Failed(record) = status else {
        panic!("expected failure, got {status:?}");
    };
    assert!(record.error.as_deref().unwrap().contains('b'));
    assert!(record.node("c").is_none());
    assert_eq!(record.node("d").unwrap().output, Some(Value::from("1")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let b = graph.node("b").unwrap();
    assert_eq!(b.state().error.as_deref(), Some("Execution failed: asked to fail"));
    match result_of(&graph, "b") {
        Some(Value::Text(t)) => assert!(t.starts_with(ERROR_MARKER)),
        other => panic!("unexpected result {other:?}"),
    }
    assert!(result_of(&graph, "c").is_none());
    assert_eq!(runner.history().latest().unwrap().execution_id, record.execution_id);
}

#[tokio::test]
async fn debug_mode_runs_one_layer_per_step() {
    let (mut runner, calls) = controller(quick_config());
    let mut graph = build(
        vec![counter("a"), counter("b"), counter("c")],
        &[("a", "b"), ("b", "c")],
    );

    let status = runner.start(&mut graph, RunMode::Debug).await.unwrap();
    let RunStatus::Paused(progress) = status else {
        panic!("expected pause, got {status:?}");
    };
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(progress.layer_index, 0);
    assert_eq!(progress.total_layers, 3);
    assert_eq!(progress.next_layer, vec!["a"]);

    for expected in 1..=2 {
        let status = runner.step(&mut graph).await.unwrap();
        assert!(status.is_paused());
        assert_eq!(calls.load(Ordering::SeqCst), expected);
        let progress = runner.progress().unwrap();
        assert_eq!(progress.completed_nodes, expected);
        assert!(progress.paused);
    }
    assert_eq!(graph.node("b").unwrap().state().status, NodeStatus::Completed);

    let status = runner.step(&mut graph).await.unwrap();
    assert!(matches!(status, RunStatus::Completed(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(runner.progress().is_none());
}

#[tokio::test]
async fn after_layer_pause_point_runs_first_layer_immediately() {
    let config = RuntimeConfig {
        pause_point: PausePoint::AfterLayer,
        ..quick_config()
    };
    let (mut runner, calls) = controller(config);
    let mut graph = build(vec![counter("a"), counter("b")], &[("a", "b")]);

    let status = runner.start(&mut graph, RunMode::Debug).await.unwrap();

    assert!(status.is_paused());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(runner.progress().unwrap().next_layer, vec!["b"]);
}

#[tokio::test]
async fn resume_finishes_a_paused_run() {
    let (mut runner, calls) = controller(quick_config());
    let mut graph = build(
        vec![counter("a"), counter("b"), counter("c")],
        &[("a", "b"), ("b", "c")],
    );

    runner.start(&mut graph, RunMode::Debug).await.unwrap();
    runner.step(&mut graph).await.unwrap();
    let status = runner.resume(&mut graph).await.unwrap();

    assert!(matches!(status, RunStatus::Completed(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn stopping_a_paused_run_resets_everything() {
    let (mut runner, calls) = controller(quick_config());
    let mut graph = build(vec![counter("a"), counter("b")], &[("a", "b")]);

    runner.start(&mut graph, RunMode::Debug).await.unwrap();
    runner.step(&mut graph).await.unwrap();
    let status = runner.stop(&mut graph).unwrap();

    assert!(matches!(status, RunStatus::Stopped));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(runner.history().is_empty());
    assert!(!runner.is_active());
    assert!(graph
        .nodes()
        .iter()
        .all(|n| n.state().status == NodeStatus::Idle));

    let err = runner.step(&mut graph).await.unwrap_err();
    assert!(matches!(err, FlowError::Workflow(WorkflowError::NotPaused)));
    let err = runner.stop(&mut graph).unwrap_err();
    assert!(matches!(err, FlowError::Workflow(WorkflowError::NoActiveRun)));
}

#[tokio::test]
async fn stop_handle_discards_the_layer_in_flight() {
    let (mut runner, calls) = controller(quick_config());
    let mut graph = build(
        vec![Node::new("sleepy", NodeKind::from_tag("slow")), counter("after")],
        &[("sleepy", "after")],
    );

    let handle = runner.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop();
    });

    let status = runner.start(&mut graph, RunMode::Auto).await.unwrap();

    assert!(matches!(status, RunStatus::Stopped));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(result_of(&graph, "sleepy").is_none());
    assert!(runner.history().is_empty());

    // a stale stop request must not leak into the next run
    let mut graph = build(vec![counter("x")], &[]);
    let status = runner.start(&mut graph, RunMode::Auto).await.unwrap();
    assert!(matches!(status, RunStatus::Completed(_)));
}

#[tokio::test]
async fn empty_and_cyclic_graphs_are_rejected() {
    let (mut runner, calls) = controller(quick_config());

    let mut empty = WorkflowGraph::new();
    let err = runner.start(&mut empty, RunMode::Auto).await.unwrap_err();
    assert!(matches!(err, FlowError::Workflow(WorkflowError::EmptyGraph)));

    let mut cyclic = build(
        vec![counter("a"), counter("b"), counter("c")],
        &[("a", "b"), ("b", "a")],
    );
    let err = runner.start(&mut cyclic, RunMode::Auto).await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::Workflow(WorkflowError::CyclicDependency { processed: 1, total: 3 })
    ));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(runner.history().is_empty());
    assert!(cyclic.nodes().iter().all(|n| n.state().result.is_none()));
}

#[tokio::test]
async fn second_start_is_rejected_while_paused() {
    let (mut runner, _) = controller(quick_config());
    let mut graph = build(vec![counter("a")], &[]);

    runner.start(&mut graph, RunMode::Debug).await.unwrap();
    let err = runner.start(&mut graph, RunMode::Auto).await.unwrap_err();
    assert!(matches!(err, FlowError::Workflow(WorkflowError::RunInProgress)));

    let err = runner.run_node(&mut graph, "a").await.unwrap_err();
    assert!(matches!(err, FlowError::Workflow(WorkflowError::RunInProgress)));
}

#[tokio::test]
async fn history_keeps_the_newest_records() {
    let config = RuntimeConfig {
        history_size: 3,
        ..quick_config()
    };
    let (mut runner, _) = controller(config);
    let mut graph = build(vec![counter("a")], &[]);

    let mut ids = Vec::new();
    for _ in 0..4 {
        let status = runner.start(&mut graph, RunMode::Auto).await.unwrap();
        ids.push(status.record().unwrap().execution_id);
    }

    let kept: Vec<_> = runner.history().iter().map(|r| r.execution_id).collect();
    assert_eq!(kept, vec![ids[3], ids[2], ids[1]]);
    assert!(runner.history().get(ids[0]).is_none());
}

#[tokio::test]
async fn run_node_uses_current_sibling_results() {
    let (mut runner, _) = controller(quick_config());
    let mut graph = build(
        vec![text("a", "first"), shout("b").with_config("prompt", "manual {{a}}")],
        &[("a", "b")],
    );

    runner.start(&mut graph, RunMode::Auto).await.unwrap();
    assert_eq!(result_of(&graph, "b"), Some(&Value::from("MANUAL FIRST")));

    // editing a's config does not touch its last result
    graph.node_mut("a").unwrap().config_mut().set("text", "second");
    let outcome = runner.run_node(&mut graph, "b").await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.result, Ok(Value::from("MANUAL FIRST")));
    assert_eq!(graph.node("b").unwrap().state().status, NodeStatus::Completed);
    assert_eq!(graph.node("a").unwrap().state().status, NodeStatus::Completed);
    assert!(runner.history().len() == 1);
}

#[tokio::test]
async fn run_node_ignores_failed_upstream() {
    let (mut runner, _) = controller(quick_config());
    let mut graph = build(
        vec![
            shout("a").with_config("fail", true),
            shout("b").with_config("prompt", "fallback {{a}}"),
        ],
        &[("a", "b")],
    );

    runner.start(&mut graph, RunMode::Auto).await.unwrap();
    let outcome = runner.run_node(&mut graph, "b").await.unwrap();

    assert_eq!(outcome.result, Ok(Value::from("FALLBACK {{A}}")));
    assert!(outcome.input.upstream.is_empty());

    let err = runner.run_node(&mut graph, "ghost").await.unwrap_err();
    assert!(matches!(err, FlowError::Workflow(WorkflowError::NodeNotFound(_))));
}

#[tokio::test]
async fn unknown_kind_falls_back_to_passthrough() {
    let (mut runner, _) = controller(quick_config());
    let mut graph = build(
        vec![
            text("a", "hi"),
            Node::new("odd", NodeKind::from_tag("mystery")).with_config("prompt", "{{a}} there"),
        ],
        &[("a", "odd")],
    );

    runner.start(&mut graph, RunMode::Auto).await.unwrap();

    assert_eq!(result_of(&graph, "odd"), Some(&Value::from("hi there")));
}

#[tokio::test]
async fn panicking_handler_fails_only_its_node() {
    let (mut runner, _) = controller(quick_config());
    let mut graph = build(
        vec![Node::new("bad", NodeKind::from_tag("boom")), counter("fine")],
        &[],
    );

    let status = runner.start(&mut graph, RunMode::Auto).await.unwrap();

    let record = status.record().unwrap();
    assert!(!record.is_success());
    let bad = record.node("bad").unwrap();
    assert!(bad.error.as_deref().unwrap().contains("handler exploded"));
    assert!(record.node("fine").unwrap().output.is_some());
}

#[tokio::test(start_paused = true)]
async fn node_timeout_fails_the_node() {
    let config = RuntimeConfig {
        node_timeout_ms: Some(500),
        ..quick_config()
    };
    let (mut runner, _) = controller(config);
    let mut graph = build(vec![Node::new("stuck", NodeKind::from_tag("stubborn"))], &[]);

    let status = runner.start(&mut graph, RunMode::Auto).await.unwrap();

    assert!(matches!(status, RunStatus::Failed(_)));
    assert_eq!(
        graph.node("stuck").unwrap().state().error.as_deref(),
        Some("Timeout after 500ms")
    );
}

#[tokio::test(start_paused = true)]
async fn terminal_statuses_stay_until_cleared() {
    let (mut runner, _) = controller(RuntimeConfig::default());
    let mut graph = build(
        vec![text("a", "x"), shout("b").with_config("fail", true)],
        &[],
    );
    let started = tokio::time::Instant::now();

    runner.start(&mut graph, RunMode::Auto).await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(2000));
    assert_eq!(graph.node("a").unwrap().state().status, NodeStatus::Completed);
    assert_eq!(graph.node("b").unwrap().state().status, NodeStatus::Error);

    let due = runner.reset_due().unwrap();
    assert_eq!(due - started, Duration::from_millis(2000));
    tokio::time::sleep_until(due).await;
    runner.clear_statuses(&mut graph).unwrap();

    assert!(runner.reset_due().is_none());
    let a = graph.node("a").unwrap().state();
    assert_eq!(a.status, NodeStatus::Idle);
    assert_eq!(a.result, Some(Value::from("x")));
    let b = graph.node("b").unwrap().state();
    assert_eq!(b.status, NodeStatus::Idle);
    assert!(b.usable_result().is_none());
}

#[tokio::test]
async fn clearing_statuses_is_rejected_mid_run() {
    let (mut runner, _) = controller(quick_config());
    let mut graph = build(vec![counter("a"), counter("b")], &[("a", "b")]);

    runner.start(&mut graph, RunMode::Debug).await.unwrap();
    runner.step(&mut graph).await.unwrap();

    let err = runner.clear_statuses(&mut graph).unwrap_err();
    assert!(matches!(err, FlowError::Workflow(WorkflowError::RunInProgress)));
    assert_eq!(graph.node("a").unwrap().state().status, NodeStatus::Completed);
    assert!(runner.reset_due().is_none());
}

#[tokio::test]
async fn new_run_starts_from_idle_statuses() {
    let (mut runner, _) = controller(quick_config());
    let mut graph = build(vec![counter("a"), counter("b")], &[("a", "b")]);

    runner.start(&mut graph, RunMode::Auto).await.unwrap();
    assert_eq!(graph.node("b").unwrap().state().status, NodeStatus::Completed);

    runner.start(&mut graph, RunMode::Debug).await.unwrap();
    assert!(graph
        .nodes()
        .iter()
        .all(|n| n.state().status == NodeStatus::Idle));
}

#[tokio::test]
async fn stopped_rerun_does_not_revive_an_error_marker() {
    let (mut runner, _) = controller(quick_config());
    let mut graph = build(
        vec![
            shout("x").with_config("fail", true),
            shout("y").with_config("prompt", "fallback {{x}}"),
        ],
        &[("x", "y")],
    );

    let status = runner.start(&mut graph, RunMode::Auto).await.unwrap();
    assert!(matches!(status, RunStatus::Failed(_)));

    // second run: x hangs in its layer until stopped
    graph.node_mut("x").unwrap().kind = NodeKind::from_tag("slow");
    let handle = runner.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop();
    });
    let status = runner.start(&mut graph, RunMode::Auto).await.unwrap();
    assert!(matches!(status, RunStatus::Stopped));

    let x = graph.node("x").unwrap().state();
    assert_eq!(x.status, NodeStatus::Idle);
    assert!(x.result.is_none());
    assert!(x.usable_result().is_none());

    let outcome = runner.run_node(&mut graph, "y").await.unwrap();
    assert_eq!(outcome.result, Ok(Value::from("FALLBACK {{X}}")));
    assert!(outcome.input.upstream.is_empty());
}

#[test]
fn zero_event_buffer_is_clamped() {
    let config = RuntimeConfig {
        event_buffer_size: 0,
        ..quick_config()
    };
    let (runner, _) = controller(config);
    let _events = runner.subscribe();
}

#[tokio::test]
async fn events_follow_the_run_lifecycle() {
    let (mut runner, _) = controller(quick_config());
    let mut events = runner.subscribe();
    let mut graph = build(vec![text("a", "x"), shout("b")], &[("a", "b")]);

    runner.start(&mut graph, RunMode::Auto).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(match event {
            ExecutionEvent::RunStarted { total_layers, .. } => format!("run:{total_layers}"),
            ExecutionEvent::LayerStarted { layer_index, .. } => format!("layer:{layer_index}"),
            ExecutionEvent::NodeStarted { node_id, .. } => format!("start:{node_id}"),
            ExecutionEvent::NodeCompleted { node_id, .. } => format!("done:{node_id}"),
            ExecutionEvent::RunCompleted { success, .. } => format!("end:{success}"),
            other => format!("{other:?}"),
        });
    }

    assert_eq!(
        kinds,
        vec![
            "run:2", "layer:0", "start:a", "done:a", "layer:1", "start:b", "done:b", "end:true"
        ]
    );
}
