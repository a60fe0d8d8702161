//! Workload migration with bounded retries.
//!
//! Each attempt opens a fresh progress stream and echoes every message to the
//! progress sink as it arrives. An attempt that reports an error is retried;
//! an attempt that reports nothing at all is indeterminate and fails at once.

use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, info};

use crate::client::WorkloadMigrator;
use crate::error::{ClientError, MigrationFailure, RecycleError};
use crate::progress::{ProgressSink, Sleeper};
use crate::retry::{retry, RetryPolicy};
use crate::stream::{DecodeError, MessageDecoder};

/// Result of a successful migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationSummary {
    pub attempts: u32,
    /// Messages received on the successful attempt.
    pub messages: usize,
}

/// Failure of one attempt that is worth retrying.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("{errors} of {messages} progress messages reported errors")]
    Reported { messages: usize, errors: usize },

    #[error(transparent)]
    Client(ClientError),
}

/// Move all workloads from `source` to `destination`.
pub async fn move_workloads<M>(
    migrator: &M,
    sink: &dyn ProgressSink,
    sleeper: &dyn Sleeper,
    policy: RetryPolicy,
    source: &str,
    destination: &str,
) -> Result<MigrationSummary, RecycleError>
where
    M: WorkloadMigrator + ?Sized,
{
    let fail = |reason| RecycleError::Migration {
        source_node: source.to_string(),
        destination: destination.to_string(),
        reason,
    };

    let outcome = retry(policy, sleeper, "containers.move", |attempt| async move {
        debug!(source, destination, attempt = attempt + 1, "Opening migration stream");
        match run_attempt(migrator, sink, source, destination).await {
            Ok(0) => Ok(Err(MigrationFailure::EmptyStream)),
            Ok(messages) => Ok(Ok(MigrationSummary {
                attempts: attempt + 1,
                messages,
            })),
            Err(AttemptOutcome::Malformed(err)) => {
                Ok(Err(MigrationFailure::Malformed(err.to_string())))
            }
            Err(AttemptOutcome::Retry(err)) => Err(err),
        }
    })
    .await;

    match outcome {
        Ok(Ok(summary)) => {
            info!(
                source,
                destination,
                attempts = summary.attempts,
                messages = summary.messages,
                "Workloads moved"
            );
            Ok(summary)
        }
        Ok(Err(reason)) => Err(fail(reason)),
        Err(exhausted) => Err(fail(match exhausted.last {
            AttemptError::Reported { .. } => MigrationFailure::Exhausted {
                attempts: exhausted.attempts,
            },
            AttemptError::Client(err) => MigrationFailure::Client(err),
        })),
    }
}

enum AttemptOutcome {
    Retry(AttemptError),
    Malformed(DecodeError),
}

/// Consume one progress stream, returning the number of messages seen.
async fn run_attempt<M>(
    migrator: &M,
    sink: &dyn ProgressSink,
    source: &str,
    destination: &str,
) -> Result<usize, AttemptOutcome>
where
    M: WorkloadMigrator + ?Sized,
{
    let mut stream = migrator
        .move_workloads(source, destination)
        .await
        .map_err(|err| AttemptOutcome::Retry(AttemptError::Client(err)))?;

    let mut decoder = MessageDecoder::new();
    let mut messages = 0;
    let mut errors = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| AttemptOutcome::Retry(AttemptError::Client(err)))?;
        decoder.push(&chunk);
        for message in decoder.by_ref() {
            let message = message.map_err(AttemptOutcome::Malformed)?;
            messages += 1;
            if message.is_error() {
                errors += 1;
                sink.error(message.text());
            } else {
                sink.info(message.text());
            }
        }
    }
    decoder.finish().map_err(AttemptOutcome::Malformed)?;

    if errors > 0 {
        return Err(AttemptOutcome::Retry(AttemptError::Reported { messages, errors }));
    }
    Ok(messages)
}
