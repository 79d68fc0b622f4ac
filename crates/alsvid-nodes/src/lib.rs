//! Alsvid calibration nodes
//!
//! The experiment layer: every node implements [`CalibrationNode`] — build a
//! pulse program from the device state, analyze the assembled dataset, write
//! the results back — and [`NodeRunner`] owns the run itself (backend
//! selection, progress, assembly, state-update recording, persistence).
//! Nodes chain into [`CalibrationGraph`]s for unattended runs.

pub mod error;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod params;
pub mod runner;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{NodeError, NodeResult};
pub use graph::{CalibrationGraph, GraphNodeSpec, GraphOutcome, GraphReport, GraphSpec};
pub use node::{CalibrationNode, FitRecord, NodeAnalysis, Outcome};
pub use params::{NodeParams, ResetKind};
pub use runner::{NodeRunner, RunReport};
pub use store::{RunStore, RunSummary};

use nodes::{
    CzChevron, DragCalibration, QubitSpectroscopyVsCouplerFlux, Ramsey, SingleQubitRb, T2Echo,
    TimeOfFlight,
};

/// Every registered node, in the usual bring-up order.
pub fn registry() -> Vec<Box<dyn CalibrationNode>> {
    vec![
        Box::new(TimeOfFlight),
        Box::new(QubitSpectroscopyVsCouplerFlux),
        Box::new(Ramsey),
        Box::new(DragCalibration),
        Box::new(SingleQubitRb),
        Box::new(T2Echo),
        Box::new(CzChevron),
    ]
}

/// Look up one node by its registry name.
pub fn node_by_name(name: &str) -> NodeResult<Box<dyn CalibrationNode>> {
    registry()
        .into_iter()
        .find(|node| node.name() == name)
        .ok_or_else(|| NodeError::UnknownNode(name.to_string()))
}
