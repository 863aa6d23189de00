//! CLI command handling module
//!
//! Handles all CLI subcommands and argument parsing.

mod commands;
mod logging;
mod run;
mod version;

pub use commands::{ConfigSubcommand, handle_config_command};
pub use logging::init_logging;
pub use run::run;
pub use version::display_version;

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Multi-cluster chart installer and capacity reporter
#[derive(Parser, Debug)]
#[command(name = "shipyard")]
#[command(about = "Installs charts across a fleet of Kubernetes clusters", long_about = None)]
pub struct Args {
    /// Enable debug logging
    #[arg(long, short = 'd', global = true)]
    pub debug: bool,

    /// Write logs to a temporary file instead of stderr
    #[arg(long, global = true)]
    pub log_to_file: bool,

    /// Configuration file (defaults to $SHIPYARD_CONFIG_DIR/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Main commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the controllers
    Run(RunArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
    /// Display version information
    Version,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct RunArgs {
    /// Kubeconfig of the management cluster
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace holding cluster credential secrets
    #[arg(long, short = 'n')]
    pub namespace: Option<String>,

    /// Reconcile workers per controller
    #[arg(long, short = 'w')]
    pub workers: Option<usize>,
}
