//! Runs command implementation.

use anyhow::Result;
use console::style;

use super::common::{load_machine, open_store};

/// List the recorded runs.
pub fn execute_list() -> Result<()> {
    let machine = load_machine()?;
    let runs = open_store(&machine).list_runs()?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    println!("{} {} run(s):\n", style("→").cyan().bold(), runs.len());
    println!(
        "  {:<12}  {:<6}  {:<36}  {}",
        style("DATE").bold(),
        style("ID").bold(),
        style("NODE").bold(),
        style("PATH").bold(),
    );
    for run in runs {
        println!(
            "  {:<12}  {:<6}  {:<36}  {}",
            run.date,
            style(run.id).cyan(),
            run.node,
            style(run.path.display()).dim(),
        );
    }
    Ok(())
}
