//! Layered topological ordering of a workflow graph.
//!
//! Every layer holds nodes with no edge between them, and each node's
//! upstream dependencies sit in a strictly earlier layer. Layers are never
//! merged or reordered, so the result is deterministic for a given node and
//! edge sequence.

use layercore::{NodeId, WorkflowError, WorkflowGraph};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

/// Node ids that may execute concurrently
pub type Layer = Vec<NodeId>;

/// Compute the execution layers of `graph`.
///
/// Edges with a missing endpoint are ignored. A node without edges lands
/// in layer 0.
///
/// # Errors
/// [`WorkflowError::CyclicDependency`] when some nodes can never become
/// ready. No partial layering is returned in that case.
pub fn execution_layers(graph: &WorkflowGraph) -> Result<Vec<Layer>, WorkflowError> {
    let dag = build_graph(graph);

    let mut in_degree: Vec<usize> = dag
        .node_indices()
        .map(|idx| dag.neighbors_directed(idx, Direction::Incoming).count())
        .collect();

    let mut current: Vec<NodeIndex> = dag
        .node_indices()
        .filter(|idx| in_degree[idx.index()] == 0)
        .collect();

    let mut layers = Vec::new();
    let mut processed = 0;

    while !current.is_empty() {
        processed += current.len();

        let mut next = Vec::new();
        for &idx in &current {
            // petgraph yields the most recently added edge first
            let successors: Vec<NodeIndex> =
                dag.neighbors_directed(idx, Direction::Outgoing).collect();
            for succ in successors.into_iter().rev() {
                let degree = &mut in_degree[succ.index()];
                *degree -= 1;
                if *degree == 0 {
                    next.push(succ);
                }
            }
        }

        layers.push(current.iter().map(|&idx| dag[idx].to_string()).collect());
        current = next;
    }

    if processed != dag.node_count() {
        tracing::warn!(
            "Cycle detected: only {} of {} nodes could be ordered",
            processed,
            dag.node_count()
        );
        return Err(WorkflowError::CyclicDependency {
            processed,
            total: dag.node_count(),
        });
    }

    Ok(layers)
}

/// Build a dependency graph over the nodes, keeping only edges whose
/// endpoints both exist
fn build_graph(graph: &WorkflowGraph) -> DiGraph<&str, ()> {
    let mut dag = DiGraph::with_capacity(graph.nodes().len(), graph.edges().len());
    let mut node_to_index = HashMap::new();

    for node in graph.nodes() {
        let idx = dag.add_node(node.id.as_str());
        node_to_index.insert(node.id.as_str(), idx);
    }

    for edge in graph.edges() {
        match (
            node_to_index.get(edge.source.as_str()),
            node_to_index.get(edge.target.as_str()),
        ) {
            (Some(&from), Some(&to)) => {
                dag.add_edge(from, to, ());
            }
            _ => tracing::debug!(
                "Ignoring dangling edge {} -> {}",
                edge.source,
                edge.target
            ),
        }
    }

    dag
}
