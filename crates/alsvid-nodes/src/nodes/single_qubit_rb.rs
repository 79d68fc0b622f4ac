//! Single-qubit randomized benchmarking with virtual-Z Cliffords.
//!
//! Seeded random Clifford sequences are generated host-side over the
//! XZ-native gate set; each sequence is played truncated at every depth of
//! the grid `1, d, 2d, ...` with the recovery gate closing the truncation.
//! The ground-state survival vs depth decays exponentially; the decay
//! parameter gives the error per Clifford, and the physical-pulse census of
//! the decompositions converts it to error per gate.

use std::collections::BTreeMap;

use serde::Deserialize;

use alsvid_fit::{Dataset, DecayExp, fit_along};
use alsvid_seq::{CliffordGroup, Instr, Program, StreamDecl};
use alsvid_state::{FluxTarget, Machine};

use crate::error::{NodeError, NodeResult};
use crate::node::{
    CalibrationNode, FitRecord, NodeAnalysis, align_qubit, flux_prelude, measure_state,
    reset_instr, state_pipeline,
};
use crate::params::NodeParams;

/// Randomized benchmarking over a depth grid.
pub struct SingleQubitRb;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RbExtras {
    num_random_sequences: usize,
    max_circuit_depth: u32,
    delta_clifford: u32,
    seed: u64,
}

impl Default for RbExtras {
    fn default() -> Self {
        Self {
            num_random_sequences: 50,
            max_circuit_depth: 200,
            delta_clifford: 20,
            seed: 345_324,
        }
    }
}

impl RbExtras {
    /// Depth grid `1, d, 2d, ..., max`.
    fn depths(&self) -> Vec<u32> {
        let mut out = vec![1];
        let mut depth = self.delta_clifford;
        while depth <= self.max_circuit_depth {
            out.push(depth);
            depth += self.delta_clifford;
        }
        out
    }
}

impl CalibrationNode for SingleQubitRb {
    fn name(&self) -> &'static str {
        "single_qubit_rb"
    }

    fn describe(&self) -> &'static str {
        "Randomized benchmarking: error per Clifford and per gate"
    }

    fn targets(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Vec<String>> {
        params.target_qubits(machine)
    }

    fn axes(
        &self,
        _machine: &Machine,
        params: &NodeParams,
    ) -> NodeResult<Vec<(String, Vec<f64>)>> {
        let extras: RbExtras = params.extras()?;
        Ok(vec![
            (
                "sequence".to_string(),
                (0..extras.num_random_sequences).map(|i| i as f64).collect(),
            ),
            (
                "depth".to_string(),
                extras.depths().iter().map(|&d| d as f64).collect(),
            ),
        ])
    }

    fn build(&self, machine: &Machine, params: &NodeParams) -> NodeResult<Program> {
        let extras: RbExtras = params.extras()?;
        params.require_divisible(
            "max_circuit_depth / delta_clifford",
            extras.max_circuit_depth,
            extras.delta_clifford,
        )?;
        if extras.num_random_sequences == 0 {
            return Err(NodeError::Parameter(
                "num_random_sequences must be positive".into(),
            ));
        }
        let depths = extras.depths();
        let group = CliffordGroup::new()?;
        let qubits = machine.select_qubits(params.qubits.as_deref())?;

        let mut program = Program::new("single_qubit_rb", params.num_averages);
        for (i, qubit) in qubits.iter().enumerate() {
            let stream = format!("state_{}", qubit.name);
            program.streams.push(StreamDecl::scalar(&stream));
            let xy = qubit.xy_element();

            let mut block = flux_prelude(machine, params.flux_point, FluxTarget::Qubit(&qubit.name))?;
            for m in 0..extras.num_random_sequences {
                // One sequence per (qubit, m); the recovery list closes
                // every truncation of the same gate word.
                let seq = group.rb_sequence(
                    extras.max_circuit_depth as usize,
                    extras.seed.wrapping_add((i * extras.num_random_sequences + m) as u64),
                );
                for &depth in &depths {
                    block.push(reset_instr(qubit, params.reset));
                    block.push(align_qubit(qubit));
                    for &gate in &seq.gates[..depth as usize] {
                        block.extend(CliffordGroup::emit(gate, &xy));
                    }
                    block.extend(CliffordGroup::emit(
                        seq.recovery[depth as usize - 1],
                        &xy,
                    ));
                    block.push(align_qubit(qubit));
                    block.push(measure_state(qubit, &stream));
                    block.push(Instr::ResetPhase {
                        element: xy.clone(),
                    });
                }
            }
            if !params.multiplexed {
                block.push(Instr::Align { elements: vec![] });
            }
            program.body.extend(block);

            program.pipelines.push(state_pipeline(
                &stream,
                &[depths.len(), extras.num_random_sequences],
                format!("state{}", i + 1),
            ));
        }
        Ok(program)
    }

    fn analyze(
        &self,
        ds: &Dataset,
        _machine: &Machine,
        _params: &NodeParams,
    ) -> NodeResult<NodeAnalysis> {
        // Ground-state probability vs depth, averaged over sequences.
        let mut survival = ds.mean("sequence")?;
        survival.map_var("state", |v| 1.0 - v)?;

        let fitted = fit_along(&survival, "state", "depth", &DecayExp)?;
        let decay = fitted.var("decay")?;

        let labels = match ds.coord("qubit")? {
            alsvid_fit::Coord::Labels(l) => l.clone(),
            _ => return Err(NodeError::Analysis("qubit axis has no labels".into())),
        };
        let gates_per_clifford = CliffordGroup::average_physical_gates();

        let mut analysis = NodeAnalysis::default();
        for (i, label) in labels.iter().enumerate() {
            let rate = decay[[i]];
            if !rate.is_finite() || rate > 0.0 {
                analysis.insert(label.clone(), FitRecord::failed("no exponential decay"));
                continue;
            }
            // Survival ~ p^m with p = exp(decay per Clifford).
            let p = rate.exp();
            let epc = (1.0 - p) / 2.0;
            let epg = epc / gates_per_clifford;

            let mut values = BTreeMap::new();
            values.insert("decay_p".to_string(), p);
            values.insert("error_per_clifford".to_string(), epc);
            values.insert("error_per_gate".to_string(), epg);
            values.insert("fidelity".to_string(), 1.0 - epg);
            analysis.insert(label.clone(), FitRecord::successful(values));
        }
        Ok(analysis)
    }

    // Benchmarking records fidelity; it never mutates the state.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_machine;
    use alsvid_fit::power_law;
    use ndarray::ArrayD;
    use std::collections::BTreeMap as Map;

    fn params() -> NodeParams {
        let mut p = NodeParams::default();
        p.set_extra("num_random_sequences", serde_json::json!(4));
        p.set_extra("max_circuit_depth", serde_json::json!(40));
        p.set_extra("delta_clifford", serde_json::json!(10));
        p
    }

    #[test]
    fn test_depth_grid() {
        let extras = RbExtras {
            num_random_sequences: 4,
            max_circuit_depth: 40,
            delta_clifford: 10,
            seed: 1,
        };
        assert_eq!(extras.depths(), vec![1, 10, 20, 30, 40]);
    }

    #[test]
    fn test_build_unrolled_program() {
        let machine = test_machine();
        let program = SingleQubitRb.build(&machine, &params()).unwrap();
        program.validate().unwrap();
        // Unrolled host-side: no sweep instructions, shape from buffers.
        assert!(program.sweep_axes().is_empty());
        assert_eq!(program.pipelines[0].shape(), vec![4, 5]);
    }

    #[test]
    fn test_build_is_deterministic() {
        let machine = test_machine();
        let a = SingleQubitRb.build(&machine, &params()).unwrap();
        let b = SingleQubitRb.build(&machine, &params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_indivisible_depth() {
        let machine = test_machine();
        let mut p = params();
        p.set_extra("delta_clifford", serde_json::json!(13));
        assert!(matches!(
            SingleQubitRb.build(&machine, &p),
            Err(NodeError::Parameter(_))
        ));
    }

    #[test]
    fn test_analyze_extracts_epc() {
        let machine = test_machine();
        let p = params();
        let axes = SingleQubitRb.axes(&machine, &p).unwrap();
        let depths = axes[1].1.clone();
        let n_seq = axes[0].1.len();

        // Excited-state probability 1 - survival, survival = a p^m + b.
        let p_true = 0.99;
        let mut results: Map<String, ArrayD<f64>> = Map::new();
        for i in 0..2 {
            let mut data = Vec::new();
            for _ in 0..n_seq {
                for &m in &depths {
                    data.push(1.0 - power_law(m, 0.5, 0.5, p_true));
                }
            }
            results.insert(
                format!("state{}", i + 1),
                ArrayD::from_shape_vec(vec![n_seq, depths.len()], data).unwrap(),
            );
        }
        let ds = Dataset::assemble(&results, &["q1".into(), "q2".into()], &axes).unwrap();

        let analysis = SingleQubitRb.analyze(&ds, &machine, &p).unwrap();
        let record = analysis.record("q1").unwrap();
        assert!(record.outcome.is_successful());
        let epc = record.value("error_per_clifford").unwrap();
        assert!((epc - (1.0 - p_true) / 2.0).abs() < 2e-3, "epc = {epc}");
        // apply() is a no-op: benchmarking never writes state.
        let mut machine = test_machine();
        let before = machine.clone();
        SingleQubitRb.apply(&mut machine, &analysis).unwrap();
        assert_eq!(machine, before);
    }
}
