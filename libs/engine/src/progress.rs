//! Progress output and blocking waits.

use std::time::Duration;

use async_trait::async_trait;

/// Receives the human-readable progress of a run.
///
/// Informational lines belong on standard output, error lines on standard
/// error. Implementations must not buffer: migration progress is live.
pub trait ProgressSink: Send + Sync {
    fn info(&self, line: &str);

    fn error(&self, line: &str);
}

/// Waits between retries.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
