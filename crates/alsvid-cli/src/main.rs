//! Alsvid command-line interface
//!
//! The entry point for driving calibration runs from a terminal: list the
//! registered nodes, run one against the persisted device state, execute a
//! calibration graph, and inspect the state and the recorded runs.

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{graph, list, run, runs, state};

/// Alsvid - superconducting-qubit calibration runner
#[derive(Parser)]
#[command(name = "alsvid")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered calibration nodes
    List,

    /// Run one calibration node
    Run {
        /// Node name (see `alsvid list`)
        node: String,

        /// Parameter override as key=value; JSON values accepted
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        param: Vec<String>,

        /// Read the full parameter set from a JSON file
        #[arg(long, value_name = "FILE")]
        params: Option<String>,

        /// Comma-separated target qubits or pairs
        #[arg(short, long)]
        qubits: Option<String>,

        /// Render offline instead of submitting
        #[arg(long)]
        simulate: bool,
    },

    /// Inspect the persisted device state
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Execute a calibration graph
    Graph {
        #[command(subcommand)]
        action: GraphAction,
    },

    /// Inspect recorded runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Summarize the device state
    Show,

    /// Print the state directory path
    Path,
}

#[derive(Subcommand)]
enum GraphAction {
    /// Run a graph specification file (JSON)
    Run {
        /// Graph specification file
        file: String,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List recorded runs, newest day first
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    // Execute command
    let result = match cli.command {
        Commands::List => list::execute(),

        Commands::Run {
            node,
            param,
            params,
            qubits,
            simulate,
        } => run::execute(&node, &param, params.as_deref(), qubits.as_deref(), simulate).await,

        Commands::State { action } => match action {
            StateAction::Show => state::execute_show(),
            StateAction::Path => state::execute_path(),
        },

        Commands::Graph { action } => match action {
            GraphAction::Run { file } => graph::execute_run(&file).await,
        },

        Commands::Runs { action } => match action {
            RunsAction::List => runs::execute_list(),
        },
    };

    // Handle errors
    if let Err(e) = result {
        eprintln!("{} {e:#}", style("Error:").red().bold());
        std::process::exit(1);
    }

    Ok(())
}
