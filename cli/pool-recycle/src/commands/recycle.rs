//! The `recycle` command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use pool_recycle_engine::{RecycleOptions, Recycler};
use tokio::sync::watch;
use tracing::info;

use crate::client::ApiClient;
use crate::config::Config;
use crate::error::CliError;
use crate::output::{print_report, ConsoleSink};

#[derive(Debug, Args)]
pub struct RecycleCommand {
    /// Docker pool to recycle.
    #[arg(short, long)]
    pool: String,

    /// Destroy the machine of each old node after its containers moved.
    #[arg(short = 'r', long)]
    destroy_nodes: bool,

    /// Print every recycle action without performing it.
    #[arg(short, long)]
    dry_run: bool,

    /// Retries of each failing step before giving up.
    #[arg(long, default_value_t = 10)]
    max_retry: u32,

    /// Seconds between node removal and container move retries.
    #[arg(long, default_value_t = 60)]
    retry_interval: u64,

    /// Seconds between node creation retries.
    #[arg(long, default_value_t = 180)]
    creation_retry_interval: u64,

    /// Create every replacement node before touching the old ones.
    #[arg(long)]
    pre_provision: bool,

    /// Port of the docker endpoint nodes are registered at.
    #[arg(long, default_value_t = 4243)]
    docker_port: u16,

    /// Scheme of the docker endpoint nodes are registered at.
    #[arg(long, default_value = "http")]
    docker_scheme: String,

    /// Leave node healing enabled while the pool is recycled.
    #[arg(long)]
    keep_healing: bool,

    /// Seconds between polls of a pending node creation or removal.
    #[arg(long, default_value_t = 5)]
    event_poll_interval: u64,
}

impl RecycleCommand {
    pub async fn run(self, cancel: watch::Receiver<bool>) -> Result<()> {
        let opts = self.options()?;
        let config = Config::from_env().map_err(CliError::from)?;
        info!(api = %config.target, pool = %self.pool, "Configuration loaded");

        let client = ApiClient::new(&config, Duration::from_secs(self.event_poll_interval))?;
        let recycler =
            Recycler::new(Arc::new(client), Arc::new(ConsoleSink)).with_cancellation(cancel);

        let report = recycler
            .recycle(&self.pool, &opts)
            .await
            .map_err(CliError::from)?;

        print_report(&report);
        Ok(())
    }

    fn options(&self) -> Result<RecycleOptions, CliError> {
        let scheme = self.docker_scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(CliError::InvalidArgument(format!(
                "--docker-scheme must be http or https, got {:?}",
                self.docker_scheme
            )));
        }

        Ok(RecycleOptions {
            destroy_old_nodes: self.destroy_nodes,
            dry_run: self.dry_run,
            max_retry: self.max_retry,
            retry_interval: Duration::from_secs(self.retry_interval),
            creation_retry_interval: Duration::from_secs(self.creation_retry_interval),
            pre_provision: self.pre_provision,
            registration_port: self.docker_port,
            registration_scheme: scheme,
            suspend_healing: !self.keep_healing,
        })
    }
}
