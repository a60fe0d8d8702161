//! Error handling and display for the CLI.

use colored::Colorize;
use pool_recycle_engine::{ClientError, RecycleError};
use thiserror::Error;

use crate::config::ConfigError;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Recycle(#[from] RecycleError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    let Some(cli_err) = err.downcast_ref::<CliError>() else {
        return;
    };

    if let Some(hint) = hint(cli_err) {
        eprintln!("\n{}", format!("Hint: {hint}").yellow());
    }
}

fn hint(err: &CliError) -> Option<&'static str> {
    match err {
        CliError::Config(ConfigError::MissingCredentials) => {
            Some("Run `tsuru login` and export TSURU_TARGET and TSURU_TOKEN.")
        }
        CliError::Config(ConfigError::InvalidTarget { .. }) => {
            Some("TSURU_TARGET must look like https://tsuru.example.com.")
        }
        CliError::Recycle(recycle) => recycle_hint(recycle),
        _ => None,
    }
}

fn recycle_hint(err: &RecycleError) -> Option<&'static str> {
    match err {
        RecycleError::NoTemplates { .. } => {
            Some("Bind a machine template to the pool with a `pool=<name>` parameter.")
        }
        RecycleError::Destroy { .. } => Some(
            "Workloads already moved; destroy the old machine with `tsuru machine-destroy`.",
        ),
        RecycleError::Compensated { restored: true, .. } => Some(
            "The old node was put back into the pool; check `tsuru node-list` before rerunning.",
        ),
        RecycleError::Compensated { restored: false, .. } => Some(
            "The old node is out of its pool; re-add it with `tsuru node-add` before rerunning.",
        ),
        RecycleError::Cancelled { .. } => {
            Some("The run was interrupted before the old node left its pool.")
        }
        RecycleError::HealthGate { .. } => {
            Some("Check the pool's node healing settings with `tsuru docker-healing-list`.")
        }
        RecycleError::Directory(source) => client_hint(source),
        _ => None,
    }
}

fn client_hint(err: &ClientError) -> Option<&'static str> {
    match err {
        ClientError::Http { status: 401, .. } => {
            Some("Your token may have expired. Run `tsuru login` again.")
        }
        ClientError::Http { status: 403, .. } => {
            Some("You may not have permission for this operation.")
        }
        ClientError::Transport(_) => Some("Check your network connection and TSURU_TARGET."),
        _ => None,
    }
}
