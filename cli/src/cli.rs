use std::path::PathBuf;

/// Top-level CLI, mirroring the node's `RunCmd`-plus-`Subcommand` split: one
/// default action (run a scenario) plus explicit subcommands for anything
/// else.
#[derive(Debug, clap::Parser)]
#[command(name = "swaps-cli", version, about = "SWAPS trade-discovery demo CLI")]
pub struct Opt {
    #[command(subcommand)]
    pub subcommand: Option<Subcommand>,

    /// Scenario file to run when no subcommand is given.
    #[arg(long, short, global = true)]
    pub scenario: Option<PathBuf>,
}

/// Sub-commands supported by the CLI.
#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    /// Loads a scenario file, applies its mutations in order, and prints
    /// every `discover` snapshot it requests.
    Run {
        /// Path to a scenario JSON file.
        scenario: PathBuf,
    },

    /// Validates a scenario file without running it (parses it and checks
    /// the tenant configuration).
    Validate {
        scenario: PathBuf,
    },
}
