//! Alsvid datasets and curve fitting
//!
//! Fetched result arrays assemble into named-dimension [`Dataset`]s; the
//! model library and the damped least-squares solver extract the physical
//! quantities nodes persist (decay times, frequencies, coupling strengths).
//! Everything here is plain numerics: no hardware, no I/O.

pub mod dataset;
pub mod error;
pub mod filters;
pub mod guess;
pub mod lm;
pub mod models;

pub use dataset::{Coord, Dataset};
pub use error::{FitError, FitResult};
pub use filters::{line_intersection, moving_average, polyfit, polyval, rising_edge_delay_ns};
pub use lm::{Fit, LmOptions, fit_along, fit_model, lm_fit};
pub use models::{
    DecayExp, EchoDecayExp, Lorentzian, Model, OscillationDecayExp, PowerLaw, RabiChevron,
    decay_exp, echo_decay_exp, lorentzian, oscillation_decay_exp, power_law, rabi_chevron,
};
