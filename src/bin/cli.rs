//! Binary entry point for the `lattice-load` bulk loader CLI.
#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lattice_graph::config::LoadOptions;
use lattice_graph::error::GraphError;
use lattice_graph::loader;

#[derive(Parser, Debug)]
#[command(
    name = "lattice-load",
    version,
    about = "Bulk loader for the lattice-graph storage engine",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a metadata.json dataset and populate a fresh graph directory.
    Load {
        /// Directory containing metadata.json and the node/rel CSV files.
        #[arg(long)]
        input: PathBuf,

        /// Directory the paged storage files are written into.
        #[arg(long)]
        output: PathBuf,

        /// Worker thread count for the parallel passes (defaults to the
        /// number of logical CPUs).
        #[arg(long)]
        threads: Option<usize>,
    },
}

/// Exit 0 on success, 1 on a parse error, 2 on an I/O error.
fn main() {
    tracing_subscriber::fmt::init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(exit_code_for(&err));
    }
}

fn exit_code_for(err: &GraphError) -> i32 {
    match err {
        GraphError::Parser(_) | GraphError::Conversion { .. } => 1,
        GraphError::Io(_) => 2,
        _ => 2,
    }
}

fn run() -> Result<(), GraphError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Load { input, output, threads } => {
            let options = LoadOptions::new(input, output).with_threads(threads);
            let report = loader::load(&options)?;
            println!(
                "loaded {} node table(s), {} rel table(s), {} node(s), {} relationship(s)",
                report.num_node_tables, report.num_rel_tables, report.num_nodes, report.num_rels
            );
        }
    }

    Ok(())
}
