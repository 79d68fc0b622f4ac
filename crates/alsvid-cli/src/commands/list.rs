//! List command implementation.

use anyhow::Result;
use console::style;

use alsvid_nodes::registry;

/// Print the registered nodes with their descriptions.
pub fn execute() -> Result<()> {
    let nodes = registry();
    println!(
        "{} {} registered node(s):\n",
        style("→").cyan().bold(),
        nodes.len()
    );
    for node in nodes {
        println!("  {:<36}  {}", style(node.name()).cyan(), node.describe());
    }
    Ok(())
}
