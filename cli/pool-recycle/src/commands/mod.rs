//! CLI commands.

mod recycle;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::watch;

/// Rolling recycle of the nodes of a tsuru docker pool.
#[derive(Debug, Parser)]
#[command(name = "pool-recycle")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replace every node of a pool with a fresh one.
    Recycle(recycle::RecycleCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command. `cancel` turns true on interrupt.
    pub async fn run(self, cancel: watch::Receiver<bool>) -> Result<()> {
        match self.command {
            Commands::Recycle(cmd) => cmd.run(cancel).await,
            Commands::Version => {
                println!("pool-recycle {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn version_takes_no_arguments() {
        let cli = Cli::try_parse_from(["pool-recycle", "version"]).unwrap();
        assert!(matches!(cli.command, Commands::Version));
    }
}
