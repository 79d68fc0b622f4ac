//! Graph command implementation.

use anyhow::{Context, Result, bail};
use console::style;

use alsvid_nodes::{CalibrationGraph, GraphOutcome, GraphSpec, NodeRunner};

use super::common::{load_machine, open_store, save_machine};

/// Execute a calibration-graph specification.
pub async fn execute_run(file: &str) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read graph file {file}"))?;
    let spec: GraphSpec =
        serde_json::from_str(&raw).with_context(|| format!("invalid graph file {file}"))?;
    let graph = CalibrationGraph::from_spec(spec)?;

    let mut machine = load_machine()?;
    println!(
        "{} graph '{}': {} entries, order {}",
        style("→").cyan().bold(),
        graph.name(),
        graph.len(),
        graph.execution_order().join(" -> ")
    );

    let runner = NodeRunner::new().with_store(open_store(&machine));
    let report = graph.run(&mut machine, &runner).await?;

    for (id, outcome) in &report.outcomes {
        match outcome {
            GraphOutcome::Successful => {
                println!("  {:<24}  {}", id, style("successful").green())
            }
            GraphOutcome::Failed { reason } => {
                println!("  {:<24}  {}  {}", id, style("failed").red(), reason)
            }
            GraphOutcome::Skipped => println!("  {:<24}  {}", id, style("skipped").dim()),
        }
    }

    save_machine(&machine)?;
    if !report.is_successful() {
        bail!("graph '{}' did not complete", report.name);
    }
    Ok(())
}
