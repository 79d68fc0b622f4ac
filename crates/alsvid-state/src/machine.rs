//! The machine root: every qubit, pair and network parameter in one record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::STATE_PATH_ENV;
use crate::error::{StateError, StateResult};
use crate::transmon::{Transmon, TransmonPair};

/// File name of the main state record inside the state directory.
const STATE_FILE: &str = "state.json";
/// File name of the wiring/network record inside the state directory.
const WIRING_FILE: &str = "wiring.json";

/// How to reach the quantum-orchestration service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    /// Host of the local orchestration endpoint.
    pub host: String,
    /// Optional port override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Cluster to open machines on.
    pub cluster_name: String,
    /// Route execution through the cloud proxy instead of the local endpoint.
    #[serde(default)]
    pub cloud: bool,
    /// Cloud backend identifier, required when `cloud` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_backend: Option<String>,
    /// Root folder for run records.
    pub data_folder: PathBuf,
}

/// The full device state.
///
/// Maps are ordered so the persisted JSON is stable across save cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub qubits: BTreeMap<String, Transmon>,
    #[serde(default)]
    pub qubit_pairs: BTreeMap<String, TransmonPair>,
    pub active_qubit_names: Vec<String>,
    #[serde(default)]
    pub active_pair_names: Vec<String>,
    pub network: Network,
    /// Opaque wiring blob, persisted verbatim in `wiring.json`.
    #[serde(default)]
    pub wiring: serde_json::Value,
}

impl Machine {
    /// Load the machine from a state directory.
    pub fn load(dir: impl AsRef<Path>) -> StateResult<Self> {
        let dir = dir.as_ref();
        let state: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join(STATE_FILE))?)?;
        let wiring: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join(WIRING_FILE))?)?;

        let mut merged = state;
        if let (Some(obj), Some(extra)) = (merged.as_object_mut(), wiring.as_object()) {
            for (key, value) in extra {
                obj.insert(key.clone(), value.clone());
            }
        }
        Ok(serde_json::from_value(merged)?)
    }

    /// Load from the directory named by the `ALSVID_STATE_PATH` variable.
    pub fn load_default() -> StateResult<Self> {
        let dir = std::env::var(STATE_PATH_ENV)
            .map_err(|_| StateError::MissingStatePath(STATE_PATH_ENV))?;
        Self::load(dir)
    }

    /// Persist the machine into a state directory.
    ///
    /// The wiring blob and the network block go to `wiring.json`; everything
    /// else goes to `state.json`.
    pub fn save(&self, dir: impl AsRef<Path>) -> StateResult<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let mut full = serde_json::to_value(self)?;
        let obj = full
            .as_object_mut()
            .expect("machine serializes to an object");
        let mut wiring = serde_json::Map::new();
        for key in ["wiring", "network"] {
            if let Some(value) = obj.remove(key) {
                wiring.insert(key.to_string(), value);
            }
        }

        std::fs::write(dir.join(STATE_FILE), serde_json::to_string_pretty(&full)?)?;
        std::fs::write(
            dir.join(WIRING_FILE),
            serde_json::to_string_pretty(&serde_json::Value::Object(wiring))?,
        )?;
        Ok(())
    }

    /// Persist to the directory named by the `ALSVID_STATE_PATH` variable.
    pub fn save_default(&self) -> StateResult<()> {
        let dir = std::env::var(STATE_PATH_ENV)
            .map_err(|_| StateError::MissingStatePath(STATE_PATH_ENV))?;
        self.save(dir)
    }

    /// Look up a qubit by name.
    pub fn qubit(&self, name: &str) -> StateResult<&Transmon> {
        self.qubits
            .get(name)
            .ok_or_else(|| StateError::UnknownQubit(name.to_string()))
    }

    /// Look up a qubit mutably.
    pub fn qubit_mut(&mut self, name: &str) -> StateResult<&mut Transmon> {
        self.qubits
            .get_mut(name)
            .ok_or_else(|| StateError::UnknownQubit(name.to_string()))
    }

    /// Look up a qubit pair by name.
    pub fn pair(&self, name: &str) -> StateResult<&TransmonPair> {
        self.qubit_pairs
            .get(name)
            .ok_or_else(|| StateError::UnknownPair(name.to_string()))
    }

    /// Look up a qubit pair mutably.
    pub fn pair_mut(&mut self, name: &str) -> StateResult<&mut TransmonPair> {
        self.qubit_pairs
            .get_mut(name)
            .ok_or_else(|| StateError::UnknownPair(name.to_string()))
    }

    /// The active qubits, in declaration order.
    pub fn active_qubits(&self) -> Vec<&Transmon> {
        self.active_qubit_names
            .iter()
            .filter_map(|name| self.qubits.get(name))
            .collect()
    }

    /// The active qubit pairs, in declaration order.
    pub fn active_pairs(&self) -> Vec<&TransmonPair> {
        self.active_pair_names
            .iter()
            .filter_map(|name| self.qubit_pairs.get(name))
            .collect()
    }

    /// Resolve a node's qubit selection: explicit names, or the active set.
    pub fn select_qubits(&self, names: Option<&[String]>) -> StateResult<Vec<&Transmon>> {
        match names {
            Some(names) if !names.is_empty() => names
                .iter()
                .map(|name| self.qubit(name))
                .collect::<StateResult<Vec<_>>>(),
            _ => Ok(self.active_qubits()),
        }
    }

    /// Longest thermalization time among the active qubits, ns.
    pub fn thermalization_time_ns(&self) -> u32 {
        self.active_qubits()
            .iter()
            .map(|q| q.thermalization_time_ns)
            .max()
            .unwrap_or(0)
    }

    /// Longest resonator depletion time among the active qubits, ns.
    pub fn depletion_time_ns(&self) -> u32 {
        self.active_qubits()
            .iter()
            .map(|q| q.resonator.depletion_time_ns)
            .max()
            .unwrap_or(0)
    }

    /// Compute the DC offsets that realize a flux point for a target.
    ///
    /// Mirrors the biasing precedence of the hardware state object: first
    /// park everyone (joint idle or minimum), decouple all couplers, then
    /// override the target's own element. The returned settings carry the
    /// target bias and the longest settle time of the touched elements.
    pub fn flux_settings(
        &self,
        flux_point: FluxPoint,
        target: FluxTarget<'_>,
    ) -> StateResult<FluxSettings> {
        match (flux_point, &target) {
            (FluxPoint::Independent, FluxTarget::Pair(_)) => {
                return Err(StateError::FluxTarget(
                    "independent flux point requires a single transmon target".into(),
                ));
            }
            (FluxPoint::Pairwise, FluxTarget::Qubit(_)) => {
                return Err(StateError::FluxTarget(
                    "pairwise flux point requires a transmon-pair target".into(),
                ));
            }
            _ => {}
        }

        let mut offsets: Vec<(String, f64)> = Vec::new();
        let mut settle_ns = 0u32;
        let active: Vec<&str> = self.active_qubit_names.iter().map(String::as_str).collect();

        for (name, qubit) in &self.qubits {
            let Some(z) = &qubit.z else {
                warn!(qubit = %name, "no flux element; leaving bias untouched");
                continue;
            };
            let bias = match flux_point {
                FluxPoint::Joint if active.contains(&name.as_str()) => z.joint_offset,
                FluxPoint::Joint => z.min_offset,
                FluxPoint::Independent | FluxPoint::Pairwise => z.min_offset,
                FluxPoint::Zero => 0.0,
            };
            offsets.push((qubit.z_element(), bias));
            settle_ns = settle_ns.max(z.settle_time_ns);
        }

        // Decouple every active pair's coupler before placing the target.
        for pair in self.active_pairs() {
            if let Some(coupler) = &pair.coupler {
                offsets.push((pair.coupler_element(), coupler.decouple_offset));
            }
        }

        let target_bias = match (flux_point, target) {
            (FluxPoint::Joint, FluxTarget::Qubit(name)) => {
                let qubit = self.qubit(name)?;
                let z = qubit
                    .z
                    .as_ref()
                    .ok_or_else(|| StateError::MissingFluxElement(name.to_string()))?;
                z.joint_offset
            }
            (FluxPoint::Joint, FluxTarget::Pair(name)) => self.pair(name)?.mutual_flux_bias,
            (FluxPoint::Independent, FluxTarget::Qubit(name)) => {
                let qubit = self.qubit(name)?;
                let z = qubit
                    .z
                    .as_ref()
                    .ok_or_else(|| StateError::MissingFluxElement(name.to_string()))?;
                offsets.push((qubit.z_element(), z.independent_offset));
                z.independent_offset
            }
            (FluxPoint::Pairwise, FluxTarget::Pair(name)) => {
                let pair = self.pair(name)?;
                let control = self.qubit(&pair.qubit_control)?;
                if control.z.is_some() {
                    offsets.push((control.z_element(), pair.mutual_flux_bias));
                }
                pair.mutual_flux_bias
            }
            (FluxPoint::Zero, _) => 0.0,
            (FluxPoint::Independent, FluxTarget::Pair(_))
            | (FluxPoint::Pairwise, FluxTarget::Qubit(_)) => unreachable!(),
        };

        Ok(FluxSettings {
            offsets,
            target_bias,
            settle_ns,
        })
    }
}

/// Named flux operating points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FluxPoint {
    /// Everyone at the joint sweet spot.
    Joint,
    /// Everyone parked at minimum, target at its independent sweet spot.
    Independent,
    /// Everyone parked at minimum, pair at its mutual operating point.
    Pairwise,
    /// All biases to zero volts.
    Zero,
}

impl std::fmt::Display for FluxPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FluxPoint::Joint => "joint",
            FluxPoint::Independent => "independent",
            FluxPoint::Pairwise => "pairwise",
            FluxPoint::Zero => "zero",
        };
        write!(f, "{s}")
    }
}

/// What a flux point is being set up for.
#[derive(Debug, Clone, Copy)]
pub enum FluxTarget<'a> {
    Qubit(&'a str),
    Pair(&'a str),
}

/// Resolved DC offsets for one flux configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxSettings {
    /// (element id, volts) assignments, in application order.
    pub offsets: Vec<(String, f64)>,
    /// Bias seen by the target element after application.
    pub target_bias: f64,
    /// Longest settle time among the touched elements, ns.
    pub settle_ns: u32,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::elements::{FluxElement, InputChannel, OutputChannel, ReadoutResonator, XyDrive};
    use crate::pulses::{DragPulse, PulseOp, ReadoutPulse};
    use std::collections::BTreeMap;

    pub(crate) fn test_qubit(name: &str, port: u8) -> Transmon {
        let mut xy_ops = BTreeMap::new();
        for (op, angle, axis) in [
            ("x180", 1.0, 0.0),
            ("x90", 0.5, 0.0),
            ("-x90", -0.5, 0.0),
            ("y180", 1.0, std::f64::consts::FRAC_PI_2),
            ("y90", 0.5, std::f64::consts::FRAC_PI_2),
        ] {
            xy_ops.insert(
                op.to_string(),
                PulseOp::Drag(DragPulse {
                    amplitude: 0.2 * angle,
                    length_ns: 40,
                    alpha: -1.0,
                    anharmonicity_hz: -200e6,
                    detuning_hz: 0.0,
                    axis_angle: axis,
                }),
            );
        }
        let mut rr_ops = BTreeMap::new();
        rr_ops.insert(
            "readout".to_string(),
            PulseOp::Readout(ReadoutPulse {
                amplitude: 0.05,
                length_ns: 1000,
                rotation_angle: 0.0,
                threshold: 2e-4,
            }),
        );
        Transmon {
            name: name.to_string(),
            xy: XyDrive {
                channel: OutputChannel {
                    controller: "con1".into(),
                    port,
                },
                intermediate_frequency_hz: -110e6,
                operations: xy_ops,
            },
            z: Some(FluxElement {
                channel: OutputChannel {
                    controller: "con1".into(),
                    port: port + 10,
                },
                joint_offset: 0.05,
                independent_offset: 0.08,
                min_offset: -0.3,
                arbitrary_offset: 0.0,
                settle_time_ns: 400,
                operations: BTreeMap::new(),
            }),
            resonator: ReadoutResonator {
                output: OutputChannel {
                    controller: "con1".into(),
                    port: 9,
                },
                input_i: InputChannel {
                    controller: "con1".into(),
                    port: 1,
                    offset: None,
                    gain_db: None,
                },
                input_q: InputChannel {
                    controller: "con1".into(),
                    port: 2,
                    offset: None,
                    gain_db: None,
                },
                intermediate_frequency_hz: 60e6,
                time_of_flight_ns: 24,
                depletion_time_ns: 4000,
                operations: rr_ops,
            },
            f_01_hz: 4.8e9,
            anharmonicity_hz: -200e6,
            freq_vs_flux_01_quad_term: -2.1e9,
            thermalization_time_ns: 200_000,
            t1_us: Some(35.0),
            t2ramsey_us: None,
            t2echo_us: None,
            grid_location: "0,0".into(),
        }
    }

    pub(crate) fn test_machine() -> Machine {
        let mut qubits = BTreeMap::new();
        qubits.insert("q1".to_string(), test_qubit("q1", 3));
        qubits.insert("q2".to_string(), test_qubit("q2", 4));
        Machine {
            qubits,
            qubit_pairs: BTreeMap::new(),
            active_qubit_names: vec!["q1".into(), "q2".into()],
            active_pair_names: vec![],
            network: Network {
                host: "127.0.0.1".into(),
                port: Some(9510),
                cluster_name: "cluster_1".into(),
                cloud: false,
                cloud_backend: None,
                data_folder: PathBuf::from("/tmp/alsvid-data"),
            },
            wiring: serde_json::json!({}),
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("alsvid-state-{}", std::process::id()));
        let machine = test_machine();
        machine.save(&dir).unwrap();

        // Network must live in wiring.json, not state.json.
        let state_text = std::fs::read_to_string(dir.join("state.json")).unwrap();
        assert!(!state_text.contains("cluster_1"));
        let wiring_text = std::fs::read_to_string(dir.join("wiring.json")).unwrap();
        assert!(wiring_text.contains("cluster_1"));

        let loaded = Machine::load(&dir).unwrap();
        assert_eq!(loaded, machine);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_select_qubits() {
        let machine = test_machine();
        let all = machine.select_qubits(None).unwrap();
        assert_eq!(all.len(), 2);
        let one = machine
            .select_qubits(Some(&["q2".to_string()]))
            .unwrap();
        assert_eq!(one[0].name, "q2");
        assert!(machine.select_qubits(Some(&["nope".to_string()])).is_err());
    }

    #[test]
    fn test_flux_settings_joint() {
        let machine = test_machine();
        let settings = machine
            .flux_settings(FluxPoint::Joint, FluxTarget::Qubit("q1"))
            .unwrap();
        assert!((settings.target_bias - 0.05).abs() < 1e-12);
        assert_eq!(settings.settle_ns, 400);
        assert!(
            settings
                .offsets
                .iter()
                .all(|(_, v)| (*v - 0.05).abs() < 1e-12)
        );
    }

    #[test]
    fn test_flux_settings_independent_overrides_target() {
        let machine = test_machine();
        let settings = machine
            .flux_settings(FluxPoint::Independent, FluxTarget::Qubit("q1"))
            .unwrap();
        assert!((settings.target_bias - 0.08).abs() < 1e-12);
        // Last assignment for the target element wins.
        let last = settings
            .offsets
            .iter()
            .rev()
            .find(|(el, _)| el == "q1.z")
            .unwrap();
        assert!((last.1 - 0.08).abs() < 1e-12);
    }

    #[test]
    fn test_flux_settings_rejects_bad_target() {
        let machine = test_machine();
        let err = machine
            .flux_settings(FluxPoint::Pairwise, FluxTarget::Qubit("q1"))
            .unwrap_err();
        assert!(matches!(err, StateError::FluxTarget(_)));
    }
}
