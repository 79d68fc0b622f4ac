//! Calibration graphs.
//!
//! A graph chains nodes into a DAG: every entry names a registered node,
//! carries its own parameters and lists the entries it runs after. Cycles
//! and unknown references are rejected when the graph is built; execution
//! walks the topological order and stops at the first failure, recording an
//! outcome per entry.

use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use alsvid_state::Machine;

use crate::error::{NodeError, NodeResult};
use crate::node_by_name;
use crate::params::NodeParams;
use crate::runner::NodeRunner;

/// One entry of a graph specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNodeSpec {
    /// Unique id within the graph.
    pub id: String,
    /// Registry name of the node to run.
    pub node: String,
    /// Parameters for this run.
    #[serde(default)]
    pub parameters: NodeParams,
    /// Ids this entry depends on.
    #[serde(default)]
    pub after: Vec<String>,
}

/// A serializable calibration-graph specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSpec {
    pub name: String,
    pub nodes: Vec<GraphNodeSpec>,
}

/// Outcome of one graph entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum GraphOutcome {
    Successful,
    Failed { reason: String },
    /// Not reached because an earlier entry failed.
    Skipped,
}

/// Per-entry outcomes of one graph execution, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphReport {
    pub name: String,
    pub outcomes: Vec<(String, GraphOutcome)>,
}

impl GraphReport {
    /// True when every entry ran successfully.
    pub fn is_successful(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, outcome)| *outcome == GraphOutcome::Successful)
    }
}

/// A validated calibration DAG ready to execute.
#[derive(Debug)]
pub struct CalibrationGraph {
    name: String,
    dag: DiGraph<GraphNodeSpec, ()>,
    order: Vec<NodeIndex>,
}

impl CalibrationGraph {
    /// Validate a specification into an executable graph.
    ///
    /// Node names must exist in the registry, dependency ids must resolve,
    /// and the dependency relation must be acyclic.
    pub fn from_spec(spec: GraphSpec) -> NodeResult<Self> {
        let mut dag = DiGraph::new();
        let mut index: FxHashMap<String, NodeIndex> = FxHashMap::default();
        for entry in spec.nodes {
            node_by_name(&entry.node)?;
            if index.contains_key(&entry.id) {
                return Err(NodeError::GraphEdge(format!(
                    "duplicate graph id: {}",
                    entry.id
                )));
            }
            let id = entry.id.clone();
            index.insert(id, dag.add_node(entry));
        }
        for node_index in dag.node_indices() {
            for dep in dag[node_index].after.clone() {
                let &dep_index = index
                    .get(&dep)
                    .ok_or_else(|| NodeError::GraphEdge(dep.clone()))?;
                dag.add_edge(dep_index, node_index, ());
            }
        }

        let order = petgraph::algo::toposort(&dag, None)
            .map_err(|cycle| NodeError::GraphCycle(dag[cycle.node_id()].id.clone()))?;
        Ok(Self {
            name: spec.name,
            dag,
            order,
        })
    }

    /// Graph name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.dag.node_count()
    }

    /// True when the graph has no entries.
    pub fn is_empty(&self) -> bool {
        self.dag.node_count() == 0
    }

    /// Entry ids in execution order.
    pub fn execution_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&index| self.dag[index].id.as_str())
            .collect()
    }

    /// Run every entry in topological order, stopping at the first failure.
    pub async fn run(&self, machine: &mut Machine, runner: &NodeRunner) -> NodeResult<GraphReport> {
        let mut outcomes = Vec::with_capacity(self.order.len());
        let mut aborted = false;
        for &index in &self.order {
            let entry = &self.dag[index];
            if aborted {
                outcomes.push((entry.id.clone(), GraphOutcome::Skipped));
                continue;
            }
            info!(graph = %self.name, id = %entry.id, node = %entry.node, "running graph entry");
            let node = node_by_name(&entry.node)?;
            let outcome = match runner.run(machine, node.as_ref(), &entry.parameters).await {
                Ok(report) if report.analysis.all_successful() => GraphOutcome::Successful,
                Ok(report) => {
                    let failed: Vec<&str> = report
                        .analysis
                        .fit_results
                        .iter()
                        .filter(|(_, r)| !r.outcome.is_successful())
                        .map(|(target, _)| target.as_str())
                        .collect();
                    GraphOutcome::Failed {
                        reason: format!("analysis failed for {}", failed.join(", ")),
                    }
                }
                Err(e) => GraphOutcome::Failed {
                    reason: e.to_string(),
                },
            };
            if let GraphOutcome::Failed { reason } = &outcome {
                warn!(graph = %self.name, id = %entry.id, reason, "graph entry failed, stopping");
                aborted = true;
            }
            outcomes.push((entry.id.clone(), outcome));
        }
        Ok(GraphReport {
            name: self.name.clone(),
            outcomes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, node: &str, after: &[&str]) -> GraphNodeSpec {
        GraphNodeSpec {
            id: id.to_string(),
            node: node.to_string(),
            parameters: NodeParams::default(),
            after: after.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_order_respects_dependencies() {
        let graph = CalibrationGraph::from_spec(GraphSpec {
            name: "daily".into(),
            nodes: vec![
                entry("rb", "single_qubit_rb", &["drag", "ramsey"]),
                entry("ramsey", "ramsey", &["tof"]),
                entry("drag", "drag_calibration", &["ramsey"]),
                entry("tof", "time_of_flight", &[]),
            ],
        })
        .unwrap();

        let order = graph.execution_order();
        assert_eq!(graph.len(), 4);
        let position = |id: &str| order.iter().position(|&o| o == id).unwrap();
        assert!(position("tof") < position("ramsey"));
        assert!(position("ramsey") < position("drag"));
        assert!(position("drag") < position("rb"));
    }

    #[test]
    fn test_rejects_cycle() {
        let err = CalibrationGraph::from_spec(GraphSpec {
            name: "loop".into(),
            nodes: vec![
                entry("a", "ramsey", &["b"]),
                entry("b", "t2_echo", &["a"]),
            ],
        })
        .unwrap_err();
        assert!(matches!(err, NodeError::GraphCycle(_)));
    }

    #[test]
    fn test_rejects_unknown_dependency() {
        let err = CalibrationGraph::from_spec(GraphSpec {
            name: "dangling".into(),
            nodes: vec![entry("a", "ramsey", &["missing"])],
        })
        .unwrap_err();
        assert!(matches!(err, NodeError::GraphEdge(_)));
    }

    #[test]
    fn test_rejects_unknown_node_name() {
        let err = CalibrationGraph::from_spec(GraphSpec {
            name: "typo".into(),
            nodes: vec![entry("a", "ramsy", &[])],
        })
        .unwrap_err();
        assert!(matches!(err, NodeError::UnknownNode(_)));
    }

    #[test]
    fn test_rejects_duplicate_id() {
        let err = CalibrationGraph::from_spec(GraphSpec {
            name: "dup".into(),
            nodes: vec![entry("a", "ramsey", &[]), entry("a", "t2_echo", &[])],
        })
        .unwrap_err();
        assert!(matches!(err, NodeError::GraphEdge(_)));
    }

    #[test]
    fn test_spec_json_roundtrip() {
        let spec = GraphSpec {
            name: "daily".into(),
            nodes: vec![entry("tof", "time_of_flight", &[])],
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: GraphSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "daily");
        assert_eq!(back.nodes[0].id, "tof");
        assert!(back.nodes[0].after.is_empty());
    }
}
