//! Node parameters.
//!
//! Every node shares the common block (qubit selection, averaging, flux
//! point, reset style, simulation switches); node-specific extras ride in
//! the flattened remainder and are parsed by the node itself. Guards return
//! typed errors instead of asserting.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use alsvid_state::{FluxPoint, Machine};

use crate::error::{NodeError, NodeResult};

/// How qubits are returned to ground between shots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetKind {
    /// Wait out the thermalization time.
    Thermal,
    /// Measurement-feedback reset.
    Active,
}

impl Default for ResetKind {
    fn default() -> Self {
        ResetKind::Thermal
    }
}

/// Parameters common to every node, plus node-specific extras.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeParams {
    /// Explicit target names; `None` runs the active set.
    #[serde(default)]
    pub qubits: Option<Vec<String>>,
    /// Averaging iterations.
    #[serde(default = "default_num_averages")]
    pub num_averages: u32,
    /// Flux operating point for the run.
    #[serde(default = "default_flux_point")]
    pub flux_point: FluxPoint,
    /// Reset style between shots.
    #[serde(default)]
    pub reset: ResetKind,
    /// Render offline instead of submitting.
    #[serde(default)]
    pub simulate: bool,
    /// Simulated duration, ns.
    #[serde(default = "default_simulation_duration")]
    pub simulation_duration_ns: u32,
    /// Session-queue / cloud-execute timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout_s: u64,
    /// Measure all qubits concurrently instead of sequentially.
    #[serde(default = "default_multiplexed")]
    pub multiplexed: bool,
    /// Node-specific parameters.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_num_averages() -> u32 {
    100
}

fn default_flux_point() -> FluxPoint {
    FluxPoint::Joint
}

fn default_simulation_duration() -> u32 {
    2500
}

fn default_timeout() -> u64 {
    100
}

fn default_multiplexed() -> bool {
    true
}

impl Default for NodeParams {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).expect("defaults deserialize")
    }
}

impl NodeParams {
    /// Parse the node-specific extras into a typed struct.
    pub fn extras<T: DeserializeOwned>(&self) -> NodeResult<T> {
        serde_json::from_value(serde_json::Value::Object(self.extra.clone()))
            .map_err(|e| NodeError::Parameter(e.to_string()))
    }

    /// Set one extra parameter.
    pub fn set_extra(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extra.insert(key.into(), value);
    }

    /// Resolve the target qubit names: explicit list or the active set.
    pub fn target_qubits(&self, machine: &Machine) -> NodeResult<Vec<String>> {
        let qubits = machine.select_qubits(self.qubits.as_deref())?;
        if qubits.is_empty() {
            return Err(NodeError::Parameter(
                "no target qubits: selection and active set are both empty".into(),
            ));
        }
        Ok(qubits.iter().map(|q| q.name.clone()).collect())
    }

    /// Resolve the target pair names: explicit list or the active pairs.
    pub fn target_pairs(&self, machine: &Machine) -> NodeResult<Vec<String>> {
        let names: Vec<String> = match &self.qubits {
            Some(names) if !names.is_empty() => {
                for name in names {
                    machine.pair(name)?;
                }
                names.clone()
            }
            _ => machine.active_pairs().iter().map(|p| p.name.clone()).collect(),
        };
        if names.is_empty() {
            return Err(NodeError::Parameter(
                "no target pairs: selection and active set are both empty".into(),
            ));
        }
        Ok(names)
    }

    /// Guard: a duration grid must sit on the 4 ns controller clock.
    pub fn require_clock_aligned(&self, what: &str, values_ns: &[f64]) -> NodeResult<()> {
        for &v in values_ns {
            if v < 0.0 || (v as u64) % 4 != 0 || v.fract() != 0.0 {
                return Err(NodeError::Parameter(format!(
                    "{what} must be non-negative multiples of the 4 ns clock, got {v}"
                )));
            }
        }
        Ok(())
    }

    /// Guard: `num` must divide `den` exactly.
    pub fn require_divisible(&self, what: &str, den: u32, num: u32) -> NodeResult<()> {
        if num == 0 || den % num != 0 {
            return Err(NodeError::Parameter(format!(
                "{what}: {den} must be divisible by {num}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = NodeParams::default();
        assert_eq!(params.num_averages, 100);
        assert_eq!(params.flux_point, FluxPoint::Joint);
        assert_eq!(params.reset, ResetKind::Thermal);
        assert!(!params.simulate);
        assert!(params.multiplexed);
    }

    #[test]
    fn test_extras_roundtrip() {
        #[derive(serde::Deserialize)]
        struct Extras {
            #[serde(default = "two")]
            max_amp_factor: f64,
        }
        fn two() -> f64 {
            2.0
        }

        let mut params = NodeParams::default();
        assert_eq!(params.extras::<Extras>().unwrap().max_amp_factor, 2.0);
        params.set_extra("max_amp_factor", serde_json::json!(1.5));
        assert_eq!(params.extras::<Extras>().unwrap().max_amp_factor, 1.5);
    }

    #[test]
    fn test_clock_guard() {
        let params = NodeParams::default();
        assert!(params.require_clock_aligned("idle", &[16.0, 32.0]).is_ok());
        assert!(params.require_clock_aligned("idle", &[16.0, 30.0]).is_err());
        assert!(params.require_clock_aligned("idle", &[-4.0]).is_err());
    }

    #[test]
    fn test_divisible_guard() {
        let params = NodeParams::default();
        assert!(params.require_divisible("depth", 1000, 20).is_ok());
        assert!(params.require_divisible("depth", 1000, 24).is_err());
        assert!(params.require_divisible("depth", 1000, 0).is_err());
    }

    #[test]
    fn test_json_with_extras() {
        let params: NodeParams = serde_json::from_str(
            r#"{"qubits": ["q1"], "num_averages": 50, "seed": 7}"#,
        )
        .unwrap();
        assert_eq!(params.num_averages, 50);
        assert_eq!(params.extra["seed"], serde_json::json!(7));
    }
}
