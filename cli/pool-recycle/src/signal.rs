//! Interrupt handling: the first Ctrl+C cancels the run, the second exits.

use std::future::Future;

use colored::Colorize;
use tokio::sync::watch;
use tracing::warn;

/// Exit status of a process stopped by SIGINT.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Forward interrupts produced by `interrupt` to `cancel`.
///
/// Returns true once a second interrupt arrives, false if the signal source
/// fails.
pub async fn relay_interrupts<F, Fut>(mut interrupt: F, cancel: watch::Sender<bool>) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = interrupt().await {
        warn!(error = %err, "Cannot listen for interrupts");
        return false;
    }

    warn!("Interrupt received, cancelling recycle");
    let _ = cancel.send(true);
    eprintln!(
        "{}",
        "Interrupted: putting the node in flight back. Press Ctrl+C again to exit immediately."
            .yellow()
    );

    match interrupt().await {
        Ok(()) => {
            warn!("Second interrupt received, exiting");
            true
        }
        Err(err) => {
            warn!(error = %err, "Cannot listen for interrupts");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn second_interrupt_exits() {
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let exit = relay_interrupts(|| async { Ok::<(), io::Error>(()) }, cancel_tx).await;

        assert!(exit);
        assert!(*cancel_rx.borrow());
    }

    #[tokio::test]
    async fn first_interrupt_only_cancels() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut received = 0;
        let relay = relay_interrupts(
            move || {
                received += 1;
                let first = received == 1;
                async move {
                    if first {
                        Ok(())
                    } else {
                        std::future::pending::<io::Result<()>>().await
                    }
                }
            },
            cancel_tx,
        );

        let finished = tokio::time::timeout(Duration::from_millis(50), relay).await;

        assert!(finished.is_err());
        assert!(*cancel_rx.borrow());
    }

    #[tokio::test]
    async fn broken_signal_source_leaves_run_alone() {
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let exit = relay_interrupts(
            || async { Err::<(), io::Error>(io::Error::other("no signal handler")) },
            cancel_tx,
        )
        .await;

        assert!(!exit);
        assert!(!*cancel_rx.borrow());
    }
}
