//! Per-job stage graph.
//!
//! Optional stages are wired in at construction time from the run's
//! capabilities; the scheduler only ever walks the graph it is given.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use repolens_schema::StageKind;
use std::collections::BTreeMap;
use thiserror::Error;

/// Condition under which a stage may run once its upstream stages are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPolicy {
    /// Runs regardless of upstream outcomes and degrades on missing inputs.
    Always,
    /// Runs only if every upstream stage succeeded; otherwise it is skipped.
    RequireSuccess,
}

/// Optional stages enabled for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub narrative: bool,
    pub publish: bool,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("stage graph contains a cycle through {0}")]
    Cycle(StageKind),
}

/// Dependency edges (upstream, downstream) of the full stage set.
const EDGES: &[(StageKind, StageKind)] = &[
    (StageKind::Checkout, StageKind::CheckBattery),
    (StageKind::Checkout, StageKind::Metrics),
    (StageKind::Checkout, StageKind::Tests),
    (StageKind::CheckBattery, StageKind::Rubric),
    (StageKind::Metrics, StageKind::Rubric),
    (StageKind::Tests, StageKind::Rubric),
    (StageKind::Rubric, StageKind::Narrative),
    (StageKind::Metrics, StageKind::Publish),
];

fn policy_for(kind: StageKind) -> LaunchPolicy {
    match kind {
        StageKind::Narrative | StageKind::Publish => LaunchPolicy::RequireSuccess,
        _ => LaunchPolicy::Always,
    }
}

/// DAG of the stages one job runs.
#[derive(Debug, Clone)]
pub struct StageGraph {
    graph: DiGraph<StageKind, ()>,
    nodes: BTreeMap<StageKind, NodeIndex>,
    order: Vec<StageKind>,
}

impl StageGraph {
    /// Build the graph for the given capabilities.
    pub fn build(capabilities: Capabilities) -> Result<Self, GraphError> {
        let enabled = |kind: StageKind| match kind {
            StageKind::Narrative => capabilities.narrative,
            StageKind::Publish => capabilities.publish,
            _ => true,
        };

        let mut graph: DiGraph<StageKind, ()> = DiGraph::new();
        let mut nodes = BTreeMap::new();

        // Add nodes
        for kind in StageKind::ALL.into_iter().filter(|k| enabled(*k)) {
            nodes.insert(kind, graph.add_node(kind));
        }

        // Add edges (from upstream to downstream)
        for (from, to) in EDGES {
            if let (Some(&a), Some(&b)) = (nodes.get(from), nodes.get(to)) {
                graph.add_edge(a, b, ());
            }
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| GraphError::Cycle(graph[cycle.node_id()]))?
            .into_iter()
            .map(|idx| graph[idx])
            .collect();

        Ok(Self { graph, nodes, order })
    }

    /// Stages in a valid execution order.
    pub fn stages(&self) -> &[StageKind] {
        &self.order
    }

    pub fn contains(&self, kind: StageKind) -> bool {
        self.nodes.contains_key(&kind)
    }

    fn neighbors(&self, kind: StageKind, direction: Direction) -> Vec<StageKind> {
        let Some(&idx) = self.nodes.get(&kind) else {
            return Vec::new();
        };
        let mut kinds: Vec<StageKind> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n])
            .collect();
        kinds.sort();
        kinds
    }

    /// Stages that must be terminal before `kind` may start.
    pub fn upstream(&self, kind: StageKind) -> Vec<StageKind> {
        self.neighbors(kind, Direction::Incoming)
    }

    pub fn policy(&self, kind: StageKind) -> LaunchPolicy {
        policy_for(kind)
    }
}
