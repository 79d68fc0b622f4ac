//! Shared fixtures for the node tests.

use std::collections::BTreeMap;
use std::path::PathBuf;

use alsvid_state::{
    Coupler, DragPulse, FluxElement, InputChannel, Machine, Network, OutputChannel, PulseOp,
    ReadoutPulse, ReadoutResonator, SquarePulse, Transmon, TransmonPair, XyDrive,
};

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
    xy_ops.insert(
        "saturation".to_string(),
        PulseOp::Square(SquarePulse {
            amplitude: 0.25,
            length_ns: 10_000,
        }),
    );
    let mut z_ops = BTreeMap::new();
    z_ops.insert(
        "const".to_string(),
        PulseOp::Square(SquarePulse {
            amplitude: 0.1,
            length_ns: 100,
        }),
    );
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
            operations: z_ops,
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

/// Two active flux-tunable transmons, no pairs.
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

/// The two-qubit machine plus an active coupled pair `q1_q2`.
pub(crate) fn test_machine_with_pair() -> Machine {
    let mut machine = test_machine();
    let mut coupler_ops = BTreeMap::new();
    coupler_ops.insert(
        "const".to_string(),
        PulseOp::Square(SquarePulse {
            amplitude: 0.12,
            length_ns: 100,
        }),
    );
    machine.qubit_pairs.insert(
        "q1_q2".to_string(),
        TransmonPair {
            name: "q1_q2".into(),
            qubit_control: "q1".into(),
            qubit_target: "q2".into(),
            coupler: Some(Coupler {
                channel: OutputChannel {
                    controller: "con1".into(),
                    port: 7,
                },
                decouple_offset: -0.04,
                operations: coupler_ops,
            }),
            mutual_flux_bias: 0.02,
            cz: None,
        },
    );
    machine.active_pair_names = vec!["q1_q2".into()];
    machine
}
