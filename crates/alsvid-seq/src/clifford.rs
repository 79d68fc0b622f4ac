//! The single-qubit Clifford group in the XZ-native gate set.
//!
//! Hardware plays only three physical drive pulses (`x90`, `x180`, `-x90`);
//! everything else is virtual Z frame rotations. The 24 Cliffords are stored
//! as fixed decompositions over that set, their unitaries are built at
//! startup, and a 24x24 composition (Cayley) table plus per-element inverse
//! lookup drive randomized-benchmarking sequence generation: each truncation
//! of a random sequence carries the recovery gate returning the qubit to
//! ground.

use num_complex::Complex64;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::FRAC_PI_2;

use crate::error::{SeqError, SeqResult};
use crate::program::{Instr, Param};

/// Comparison tolerance for unitaries; the group closes exactly, so this
/// only absorbs floating-point roundoff.
const TOL: f64 = 1e-9;

/// One primitive of the XZ-native set.
///
/// `Z(k)` is a virtual frame rotation by `k * pi/2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XzGate {
    X90,
    X180,
    Xm90,
    Z(i8),
}

impl XzGate {
    /// Whether this primitive costs a physical drive pulse.
    pub fn is_physical(&self) -> bool {
        !matches!(self, XzGate::Z(_))
    }

    /// Operation name in the device state, for physical gates.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            XzGate::X90 => Some("x90"),
            XzGate::X180 => Some("x180"),
            XzGate::Xm90 => Some("-x90"),
            XzGate::Z(_) => None,
        }
    }
}

/// Fixed decompositions of the 24 Cliffords, applied left to right.
const DECOMPOSITIONS: [&[XzGate]; 24] = {
    use XzGate::*;
    [
        &[],                                   // 0: I
        &[X180],                               // 1: X180
        &[Z(-1), X180, Z(1)],                  // 2: Y180
        &[X90, Z(2), X90],                     // 3: Y180 X180
        &[X90, Z(-1), X90, Z(1)],              // 4: X90 Y90
        &[X90, Z(1), X90, Z(-1)],              // 5: X90 -Y90
        &[Xm90, Z(-1), X90, Z(1)],             // 6: -X90 Y90
        &[Xm90, Z(1), X90, Z(-1)],             // 7: -X90 -Y90
        &[Z(-1), X90, Z(1), X90],              // 8: Y90 X90
        &[Z(-1), X90, Z(1), Xm90],             // 9: Y90 -X90
        &[Z(1), X90, Z(-1), X90],              // 10: -Y90 X90
        &[Z(1), X90, Z(-1), Xm90],             // 11: -Y90 -X90
        &[X90],                                // 12: X90
        &[Xm90],                               // 13: -X90
        &[Z(-1), X90, Z(1)],                   // 14: Y90
        &[Z(1), X90, Z(-1)],                   // 15: -Y90
        &[Z(1)],                               // 16: Z90
        &[Z(-1)],                              // 17: -Z90
        &[X90, Z(-1), X90],                    // 18: X180 Y90
        &[X90, Z(1), X90],                     // 19: X180 -Y90
        &[Z(-1), X90, Z(1), X90, Z(1)],        // 20: Y180 X90
        &[Z(-1), X90, Z(1), Xm90, Z(-1)],      // 21: Y180 -X90
        &[X180, Z(1)],                         // 22: X180 Z90
        &[X180, Z(-1)],                        // 23: X180 -Z90
    ]
};

type Mat = [[Complex64; 2]; 2];

fn mat_mul(a: &Mat, b: &Mat) -> Mat {
    let mut out = [[Complex64::new(0.0, 0.0); 2]; 2];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = a[i][0] * b[0][j] + a[i][1] * b[1][j];
        }
    }
    out
}

fn rx(theta: f64) -> Mat {
    let (c, s) = ((theta / 2.0).cos(), (theta / 2.0).sin());
    [
        [Complex64::new(c, 0.0), Complex64::new(0.0, -s)],
        [Complex64::new(0.0, -s), Complex64::new(c, 0.0)],
    ]
}

fn rz(theta: f64) -> Mat {
    [
        [Complex64::from_polar(1.0, -theta / 2.0), Complex64::new(0.0, 0.0)],
        [Complex64::new(0.0, 0.0), Complex64::from_polar(1.0, theta / 2.0)],
    ]
}

fn gate_matrix(gate: XzGate) -> Mat {
    match gate {
        XzGate::X90 => rx(FRAC_PI_2),
        XzGate::X180 => rx(2.0 * FRAC_PI_2),
        XzGate::Xm90 => rx(-FRAC_PI_2),
        XzGate::Z(k) => rz(k as f64 * FRAC_PI_2),
    }
}

/// Equality up to a global phase.
fn eq_up_to_phase(a: &Mat, b: &Mat, tol: f64) -> bool {
    // Phase off the largest entry of `a`, then compare elementwise.
    let mut best = (0usize, 0usize);
    let mut best_norm = 0.0;
    for i in 0..2 {
        for j in 0..2 {
            let n = a[i][j].norm();
            if n > best_norm {
                best_norm = n;
                best = (i, j);
            }
        }
    }
    if best_norm < tol {
        return false;
    }
    let phase = b[best.0][best.1] / a[best.0][best.1];
    if (phase.norm() - 1.0).abs() > tol {
        return false;
    }
    for i in 0..2 {
        for j in 0..2 {
            if (a[i][j] * phase - b[i][j]).norm() > tol {
                return false;
            }
        }
    }
    true
}

/// A random benchmarking sequence with its truncation recovery gates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RbSequence {
    /// Random Clifford indices, in play order.
    pub gates: Vec<u8>,
    /// `recovery[d]` undoes the first `d + 1` gates.
    pub recovery: Vec<u8>,
}

/// The 24-element group with its composition table.
#[derive(Debug, Clone)]
pub struct CliffordGroup {
    unitaries: Vec<Mat>,
    table: [[u8; 24]; 24],
    inverse: [u8; 24],
}

impl CliffordGroup {
    /// Build the unitaries and the Cayley table.
    ///
    /// Fails only if the decomposition list does not close under
    /// composition, which would mean a transcription error in the table.
    pub fn new() -> SeqResult<Self> {
        let unitaries: Vec<Mat> = DECOMPOSITIONS
            .iter()
            .map(|gates| {
                let mut u = [[Complex64::new(0.0, 0.0); 2]; 2];
                u[0][0] = Complex64::new(1.0, 0.0);
                u[1][1] = Complex64::new(1.0, 0.0);
                for &g in gates.iter() {
                    u = mat_mul(&gate_matrix(g), &u);
                }
                u
            })
            .collect();

        let index_of = |m: &Mat| -> Option<u8> {
            unitaries
                .iter()
                .position(|u| eq_up_to_phase(u, m, TOL))
                .map(|i| i as u8)
        };

        let mut table = [[0u8; 24]; 24];
        for a in 0..24 {
            for b in 0..24 {
                let product = mat_mul(&unitaries[b], &unitaries[a]);
                table[a][b] = index_of(&product).ok_or_else(|| {
                    SeqError::Clifford(format!("composition {b} after {a} left the group"))
                })?;
            }
        }

        let mut inverse = [0u8; 24];
        for (a, row) in table.iter().enumerate() {
            let inv = row.iter().position(|&k| k == 0).ok_or_else(|| {
                SeqError::Clifford(format!("element {a} has no inverse"))
            })?;
            inverse[a] = inv as u8;
        }

        Ok(Self {
            unitaries,
            table,
            inverse,
        })
    }

    /// Index of applying `step` after an accumulated `state`.
    pub fn compose(&self, state: u8, step: u8) -> u8 {
        self.table[state as usize][step as usize]
    }

    /// Index of the gate undoing `state`.
    pub fn inverse(&self, state: u8) -> u8 {
        self.inverse[state as usize]
    }

    /// Unitary of one element.
    pub fn unitary(&self, index: u8) -> &Mat {
        &self.unitaries[index as usize]
    }

    /// XZ decomposition of one element.
    pub fn decomposition(index: u8) -> &'static [XzGate] {
        DECOMPOSITIONS[index as usize]
    }

    /// Average number of physical drive pulses per Clifford.
    ///
    /// With these decompositions the census is 34 pulses over 24 elements.
    pub fn average_physical_gates() -> f64 {
        let total: usize = DECOMPOSITIONS
            .iter()
            .map(|g| g.iter().filter(|x| x.is_physical()).count())
            .sum();
        total as f64 / DECOMPOSITIONS.len() as f64
    }

    /// Emit the instructions playing one Clifford on a drive element.
    pub fn emit(index: u8, element: &str) -> Vec<Instr> {
        DECOMPOSITIONS[index as usize]
            .iter()
            .map(|gate| match gate {
                XzGate::Z(k) => Instr::FrameRotation {
                    element: element.to_string(),
                    angle: Param::value(*k as f64 * FRAC_PI_2),
                },
                physical => Instr::Play {
                    element: element.to_string(),
                    operation: physical.operation().expect("physical gate").to_string(),
                    amp_scale: None,
                    duration_ns: None,
                },
            })
            .collect()
    }

    /// Generate a seeded random sequence of `depth` Cliffords.
    ///
    /// The recovery list carries, for every truncation length, the gate
    /// returning the accumulated state to identity, so one generated
    /// sequence serves the whole depth grid.
    pub fn rb_sequence(&self, depth: usize, seed: u64) -> RbSequence {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut gates = Vec::with_capacity(depth);
        let mut recovery = Vec::with_capacity(depth);
        let mut state = 0u8;
        for _ in 0..depth {
            let step = rng.gen_range(0..24u8);
            state = self.compose(state, step);
            gates.push(step);
            recovery.push(self.inverse(state));
        }
        RbSequence { gates, recovery }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn identity() -> Mat {
        let mut u = [[Complex64::new(0.0, 0.0); 2]; 2];
        u[0][0] = Complex64::new(1.0, 0.0);
        u[1][1] = Complex64::new(1.0, 0.0);
        u
    }

    #[test]
    fn test_group_closes() {
        // new() verifies closure internally; it must not fail.
        CliffordGroup::new().unwrap();
    }

    #[test]
    fn test_elements_are_distinct() {
        let group = CliffordGroup::new().unwrap();
        for a in 0..24u8 {
            for b in (a + 1)..24u8 {
                assert!(
                    !eq_up_to_phase(group.unitary(a), group.unitary(b), TOL),
                    "elements {a} and {b} coincide"
                );
            }
        }
    }

    #[test]
    fn test_inverse_property() {
        let group = CliffordGroup::new().unwrap();
        for a in 0..24u8 {
            let inv = group.inverse(a);
            assert_eq!(group.compose(a, inv), 0, "inverse of {a}");
            let product = mat_mul(group.unitary(inv), group.unitary(a));
            assert!(eq_up_to_phase(&product, &identity(), TOL));
        }
    }

    #[test]
    fn test_identity_row_and_column() {
        let group = CliffordGroup::new().unwrap();
        for a in 0..24u8 {
            assert_eq!(group.compose(0, a), a);
            assert_eq!(group.compose(a, 0), a);
        }
    }

    #[test]
    fn test_average_physical_gates() {
        // 3 Cliffords with no pulse, 8 with one, 13 with two.
        assert!((CliffordGroup::average_physical_gates() - 34.0 / 24.0).abs() < 1e-12);
    }

    #[test]
    fn test_rb_sequence_deterministic() {
        let group = CliffordGroup::new().unwrap();
        let a = group.rb_sequence(50, 345_324);
        let b = group.rb_sequence(50, 345_324);
        assert_eq!(a, b);
        let c = group.rb_sequence(50, 345_325);
        assert_ne!(a, c);
    }

    #[test]
    fn test_rb_recovery_closes_every_truncation() {
        let group = CliffordGroup::new().unwrap();
        let seq = group.rb_sequence(40, 7);
        let mut state = 0u8;
        for (d, &gate) in seq.gates.iter().enumerate() {
            state = group.compose(state, gate);
            assert_eq!(
                group.compose(state, seq.recovery[d]),
                0,
                "truncation at depth {}",
                d + 1
            );
        }
    }

    #[test]
    fn test_emit_uses_physical_operations() {
        let instrs = CliffordGroup::emit(2, "q1.xy");
        // Y180: frame rotation, x180, frame rotation back.
        assert_eq!(instrs.len(), 3);
        assert!(matches!(
            &instrs[1],
            Instr::Play { operation, .. } if operation == "x180"
        ));
        assert!(matches!(
            &instrs[0],
            Instr::FrameRotation { angle: Param::Const { value }, .. } if *value < 0.0
        ));
    }

    proptest! {
        #[test]
        fn prop_table_matches_unitaries(word in proptest::collection::vec(0u8..24, 1..20)) {
            let group = CliffordGroup::new().unwrap();
            let mut state = 0u8;
            let mut u = identity();
            for &g in &word {
                state = group.compose(state, g);
                u = mat_mul(group.unitary(g), &u);
            }
            prop_assert!(eq_up_to_phase(group.unitary(state), &u, 1e-6));
        }

        #[test]
        fn prop_recovery_restores_ground(depth in 1usize..100, seed in any::<u64>()) {
            let group = CliffordGroup::new().unwrap();
            let seq = group.rb_sequence(depth, seed);
            let mut state = 0u8;
            for &g in &seq.gates {
                state = group.compose(state, g);
            }
            prop_assert_eq!(group.compose(state, seq.recovery[depth - 1]), 0);
        }
    }
}
