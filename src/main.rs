//! Shipyard - installs chart releases across a fleet of Kubernetes clusters
//!
//! `shipyard run` watches cluster credentials and InstallationTargets on the
//! management cluster and keeps every release installed on its clusters.

use anyhow::Result;
use clap::Parser;

use shipyard::cli::{self, Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run(run_args) => {
            if let Some(path) = cli::init_logging(args.debug, args.log_to_file)? {
                eprintln!("Logging to {}", path.display());
            }
            cli::run(args.config.as_deref(), run_args).await
        }
        Command::Config { subcommand } => {
            cli::handle_config_command(subcommand, args.config.as_deref())
        }
        Command::Version => {
            cli::display_version();
            Ok(())
        }
    }
}
