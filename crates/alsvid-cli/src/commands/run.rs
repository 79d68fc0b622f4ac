//! Run command implementation.
//!
//! Runs one node against the persisted device state and writes the updated
//! state back. Parameter overrides go through the JSON representation so
//! `--param` reaches both the common fields and the node-specific extras.

use anyhow::{Context, Result, anyhow};
use console::style;

use alsvid_nodes::{NodeParams, NodeRunner, node_by_name};

use super::common::{load_machine, open_store, save_machine};

/// Execute the run command.
pub async fn execute(
    node_name: &str,
    overrides: &[String],
    params_file: Option<&str>,
    qubits: Option<&str>,
    simulate: bool,
) -> Result<()> {
    let node = node_by_name(node_name)?;
    let mut machine = load_machine()?;

    let mut params = match params_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read parameter file {path}"))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid parameter file {path}"))?
        }
        None => NodeParams::default(),
    };
    params = apply_overrides(params, overrides)?;
    if let Some(qubits) = qubits {
        params.qubits = Some(qubits.split(',').map(|q| q.trim().to_string()).collect());
    }
    if simulate {
        params.simulate = true;
    }

    let runner = NodeRunner::new().with_store(open_store(&machine));
    let report = runner.run(&mut machine, node.as_ref(), &params).await?;

    if let Some(run_dir) = &report.run_dir {
        println!(
            "{} run #{} recorded at {}",
            style("→").cyan().bold(),
            report.run_id.unwrap_or(0),
            style(run_dir.display()).dim()
        );
    }
    for (target, record) in &report.analysis.fit_results {
        match &record.outcome {
            alsvid_nodes::Outcome::Successful => {
                let values: Vec<String> = record
                    .values
                    .iter()
                    .map(|(name, value)| format!("{name}={value:.6e}"))
                    .collect();
                println!(
                    "  {:<12}  {}  {}",
                    target,
                    style("successful").green(),
                    values.join("  ")
                );
            }
            alsvid_nodes::Outcome::Failed { reason } => {
                println!("  {:<12}  {}  {}", target, style("failed").red(), reason);
            }
        }
    }
    for update in &report.state_updates {
        println!(
            "  {} {} {} -> {}",
            style("Δ").yellow(),
            update.path,
            style(&update.old).dim(),
            update.new
        );
    }

    if !params.simulate {
        save_machine(&machine)?;
    }
    Ok(())
}

/// Fold `key=value` overrides into the parameters.
fn apply_overrides(params: NodeParams, overrides: &[String]) -> Result<NodeParams> {
    if overrides.is_empty() {
        return Ok(params);
    }
    let mut value = serde_json::to_value(&params)?;
    let object = value.as_object_mut().expect("parameters are an object");
    for entry in overrides {
        let (key, raw) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("expected key=value, got '{entry}'"))?;
        // Bare words are strings; anything JSON-parseable keeps its type.
        let parsed = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        object.insert(key.to_string(), parsed);
    }
    serde_json::from_value(value).context("invalid parameter override")
}
