//! pool-recycle - rolling replacement of the nodes of a tsuru docker pool.
//!
//! Every node of the pool is swapped for a freshly provisioned one, one node
//! at a time, while its containers move over. Progress goes to standard
//! output; diagnostics (`RUST_LOG`) go to standard error.

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod client;
mod commands;
mod config;
mod error;
mod output;
mod signal;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics stay on stderr so stdout carries only recycle progress.
    let json_logs = std::env::var("POOL_RECYCLE_LOG_FORMAT").is_ok_and(|format| format == "json");
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(json_logs.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json_logs).then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();

    let cli = Cli::parse();

    // The first interrupt cancels the run and the engine restores the node in
    // flight. A second one exits right away.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::relay_interrupts(tokio::signal::ctrl_c, cancel_tx).await {
            std::process::exit(signal::INTERRUPTED_EXIT_CODE);
        }
    });

    if let Err(e) = cli.run(cancel_rx).await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
