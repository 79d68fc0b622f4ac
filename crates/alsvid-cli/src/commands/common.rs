//! Shared helpers for the CLI commands.

use anyhow::{Context, Result};

use alsvid_nodes::RunStore;
use alsvid_state::{Machine, STATE_PATH_ENV};

/// Load the device state from the configured state directory.
pub fn load_machine() -> Result<Machine> {
    Machine::load_default()
        .with_context(|| format!("failed to load the device state ({STATE_PATH_ENV})"))
}

/// Run store rooted at the machine's configured data folder.
pub fn open_store(machine: &Machine) -> RunStore {
    RunStore::new(&machine.network.data_folder)
}

/// Persist the updated device state back to the state directory.
pub fn save_machine(machine: &Machine) -> Result<()> {
    machine
        .save_default()
        .context("failed to persist the updated device state")
}
