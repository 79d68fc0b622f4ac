//! The calibration experiments.

pub mod cz_chevron;
pub mod drag_calibration;
pub mod qubit_spectroscopy_vs_coupler_flux;
pub mod ramsey;
pub mod single_qubit_rb;
pub mod t2_echo;
pub mod time_of_flight;

pub use cz_chevron::CzChevron;
pub use drag_calibration::DragCalibration;
pub use qubit_spectroscopy_vs_coupler_flux::QubitSpectroscopyVsCouplerFlux;
pub use ramsey::Ramsey;
pub use single_qubit_rb::SingleQubitRb;
pub use t2_echo::T2Echo;
pub use time_of_flight::TimeOfFlight;
