use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use layercore::{ExecutionEvent, Node, NodeEvent, NodeKind, WorkflowGraph};
use layernodes::{default_registry, HttpServiceClient, ServiceConfig};
use layerruntime::{
    execution_layers, ExecutionRecord, NodeRegistry, RunController, RunMode, RunProgress,
    RunStatus, RuntimeConfig,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "layerflow")]
#[command(about = "Run layered node workflows", long_about = None)]
struct Cli {
    /// JSON file with `runtime` and `service` settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the execution service
    #[arg(long, global = true, env = "LAYERFLOW_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Pause before every layer and wait for a key
        #[arg(long)]
        step: bool,

        /// Show debug logs
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check a workflow file for cycles and show its layers
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node kinds
    Nodes,

    /// Create an example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    runtime: RuntimeConfig,
    service: ServiceConfig,
}

impl CliConfig {
    fn load(path: Option<&Path>, api_url: Option<String>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => CliConfig::default(),
        };
        if let Some(url) = api_url {
            config.service.base_url = url;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref(), cli.api_url)?;

    match cli.command {
        Commands::Run { file, step, verbose } => {
            let default_level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new(default_level)),
                )
                .init();

            run_workflow(&file, step, config).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&file, &config)?;
        }

        Commands::Nodes => {
            list_nodes(&config)?;
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

fn build_registry(config: &ServiceConfig) -> Result<NodeRegistry> {
    let client = HttpServiceClient::new(config)?;
    Ok(default_registry(Arc::new(client), config))
}

async fn run_workflow(file: &Path, step: bool, config: CliConfig) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let mut graph = WorkflowGraph::load(file)
        .with_context(|| format!("loading workflow {}", file.display()))?;
    println!("   Nodes: {}", graph.nodes().len());
    println!("   Edges: {}", graph.edges().len());
    println!("   Service: {}", config.service.base_url);
    println!();

    let registry = build_registry(&config.service)?;
    let mut controller = RunController::with_config(Arc::new(registry), config.runtime);

    let mut events = controller.subscribe();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    let mode = if step { RunMode::Debug } else { RunMode::Auto };
    let mut status = controller.start(&mut graph, mode).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    while let RunStatus::Paused(progress) = &status {
        print_pause(progress);
        let command = stdin.next_line().await?.unwrap_or_else(|| "q".to_string());
        status = match command.trim() {
            "c" => controller.resume(&mut graph).await?,
            "q" => controller.stop(&mut graph)?,
            _ => controller.step(&mut graph).await?,
        };
    }

    // let the printer drain before the summary
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    match status {
        RunStatus::Completed(record) | RunStatus::Failed(record) => print_summary(&record),
        RunStatus::Stopped => println!("⏹️  Run stopped"),
        RunStatus::Paused(_) => {}
    }

    Ok(())
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted {
            total_nodes,
            total_layers,
            ..
        } => {
            println!("▶️  Run started: {} nodes in {} layers", total_nodes, total_layers);
        }
        ExecutionEvent::LayerStarted {
            layer_index,
            node_ids,
            ..
        } => {
            println!("  ⏩ Layer {}: {}", layer_index + 1, node_ids.join(", "));
        }
        ExecutionEvent::NodeStarted {
            node_id, node_type, ..
        } => {
            println!("  ⚡ Starting node: {} ({})", node_id, node_type);
        }
        ExecutionEvent::NodeCompleted {
            node_id,
            duration_ms,
            ..
        } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Info { message } => println!("     ℹ️  [{}] {}", node_id, message),
            NodeEvent::Warning { message } => println!("     ⚠️  [{}] {}", node_id, message),
            NodeEvent::Progress { percent, message } => match message {
                Some(msg) => println!("     📊 [{}] {:.0}% - {}", node_id, percent, msg),
                None => println!("     📊 [{}] {:.0}%", node_id, percent),
            },
        },
        ExecutionEvent::RunPaused { .. } => {}
        ExecutionEvent::RunCompleted {
            success,
            duration_ms,
            ..
        } => {
            if success {
                println!("✨ Run completed successfully in {}ms", duration_ms);
            } else {
                println!("💥 Run failed after {}ms", duration_ms);
            }
        }
        ExecutionEvent::RunStopped { .. } => {
            println!("⏹️  Stop requested");
        }
    }
}

fn print_pause(progress: &RunProgress) {
    println!();
    println!(
        "⏸️  Paused before layer {}/{} [{}] ({}/{} nodes done)",
        progress.layer_index + 1,
        progress.total_layers,
        progress.next_layer.join(", "),
        progress.completed_nodes,
        progress.total_nodes
    );
    println!("   Enter = step, c = continue, q = stop");
}

fn print_summary(record: &ExecutionRecord) {
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", record.execution_id);
    println!("   Status: {:?}", record.status);
    println!("   Duration: {}ms", record.duration_ms);
    if let Some(error) = &record.error {
        println!("   Error: {}", error);
    }

    println!();
    println!("📤 Results:");
    for (node_id, trace) in &record.nodes {
        match (&trace.output, &trace.error) {
            (Some(value), _) => println!("   {} ({}): {}", node_id, trace.kind, value.render()),
            (None, Some(error)) => println!("   {} ({}): ❌ {}", node_id, trace.kind, error),
            (None, None) => println!("   {} ({}): -", node_id, trace.kind),
        }
    }
}

fn validate_workflow(file: &Path, config: &CliConfig) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let graph = WorkflowGraph::load(file)?;
    let layers = execution_layers(&graph)?;
    let registry = build_registry(&config.service)?;

    println!("✅ Workflow is valid:");
    println!("   Nodes: {}", graph.nodes().len());
    println!("   Edges: {}", graph.edges().len());
    for (index, layer) in layers.iter().enumerate() {
        println!("   Layer {}: {}", index + 1, layer.join(", "));
    }

    for node in graph.nodes() {
        if !registry.is_registered(&node.kind) {
            println!(
                "   ⚠️  Node {} has unknown kind '{}' and will pass its prompt through",
                node.id, node.kind
            );
        }
    }
    for edge in graph.edges() {
        if graph.node(&edge.source).is_none() || graph.node(&edge.target).is_none() {
            println!(
                "   ⚠️  Edge {} -> {} points at a missing node and is ignored",
                edge.source, edge.target
            );
        }
    }

    Ok(())
}

fn list_nodes(config: &CliConfig) -> Result<()> {
    println!("📦 Available Node Kinds:");
    println!();

    let registry = build_registry(&config.service)?;
    for tag in registry.list_node_kinds() {
        match registry.get_metadata(&tag) {
            Some(metadata) => {
                println!("  • {} ({})", tag, metadata.category);
                println!("    {}", metadata.description);
            }
            None => println!("  • {}", tag),
        }
    }
    Ok(())
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut graph = WorkflowGraph::new();

    graph.add_node(
        Node::new("topic", NodeKind::TextInput)
            .with_config("prompt", "a lighthouse in a storm")
            .with_position(100.0, 100.0),
    )?;
    graph.add_node(
        Node::new("story", NodeKind::TextGeneration)
            .with_config("system_prompt", "You write two-sentence stories.")
            .with_config("prompt", "Write a story about {{topic}}")
            .with_position(350.0, 50.0),
    )?;
    graph.add_node(
        Node::new("art-prompt", NodeKind::PromptGeneration)
            .with_config("prompt", "{{topic}}")
            .with_position(350.0, 200.0),
    )?;
    graph.add_node(Node::new("picture", NodeKind::ImageGeneration).with_position(600.0, 200.0))?;
    graph.add_node(Node::new("inspect", NodeKind::Debug).with_position(600.0, 50.0))?;

    graph.connect("topic", "story");
    graph.connect("topic", "art-prompt");
    graph.connect("art-prompt", "picture");
    graph.connect("story", "inspect");

    graph.save(output)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  layerflow run --file {}", output.display());
    println!("  layerflow run --file {} --step", output.display());

    Ok(())
}
