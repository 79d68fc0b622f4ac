//! State command implementation.

use anyhow::{Context, Result};
use console::style;

use alsvid_state::STATE_PATH_ENV;

use super::common::load_machine;

/// Summarize the device state.
pub fn execute_show() -> Result<()> {
    let machine = load_machine()?;

    println!(
        "{} {} qubit(s), {} pair(s), endpoint {}:{} ({})\n",
        style("→").cyan().bold(),
        machine.qubits.len(),
        machine.qubit_pairs.len(),
        machine.network.host,
        machine.network.port.unwrap_or(80),
        if machine.network.cloud {
            format!(
                "cloud: {}",
                machine.network.cloud_backend.as_deref().unwrap_or("?")
            )
        } else {
            machine.network.cluster_name.clone()
        },
    );

    println!(
        "  {:<8}  {:>10}  {:>10}  {:>8}  {:>8}  {:>8}  {}",
        style("QUBIT").bold(),
        style("f01 GHz").bold(),
        style("IF MHz").bold(),
        style("T1 us").bold(),
        style("T2* us").bold(),
        style("T2E us").bold(),
        style("ACTIVE").bold(),
    );
    for (name, qubit) in &machine.qubits {
        let us = |v: Option<f64>| v.map_or("-".to_string(), |v| format!("{v:.1}"));
        let active = machine.active_qubit_names.iter().any(|n| n == name);
        println!(
            "  {:<8}  {:>10.6}  {:>10.3}  {:>8}  {:>8}  {:>8}  {}",
            style(name).cyan(),
            qubit.f_01_hz / 1e9,
            qubit.xy.intermediate_frequency_hz / 1e6,
            us(qubit.t1_us),
            us(qubit.t2ramsey_us),
            us(qubit.t2echo_us),
            if active { style("yes").green() } else { style("no").dim() },
        );
    }

    for (name, pair) in &machine.qubit_pairs {
        let cz = pair.cz.as_ref().map_or("uncalibrated".to_string(), |cz| {
            format!(
                "CZ {:.0} ns @ {:.4} V, J2 {:.2} MHz",
                cz.length_ns,
                cz.flux_amplitude,
                cz.coupling_j2_hz / 1e6
            )
        });
        println!(
            "  {:<8}  {} -> {}  {}",
            style(name).cyan(),
            pair.qubit_control,
            pair.qubit_target,
            cz
        );
    }
    Ok(())
}

/// Print the configured state directory.
pub fn execute_path() -> Result<()> {
    let path = std::env::var(STATE_PATH_ENV)
        .with_context(|| format!("{STATE_PATH_ENV} is not set"))?;
    println!("{path}");
    Ok(())
}
