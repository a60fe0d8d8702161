//! Bounded retry loops.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::progress::Sleeper;

/// How often and how patiently an operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Fixed wait before each retry.
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries,
            interval,
        }
    }

    /// Total number of attempts the policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Retry bound reached while the operation kept failing.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

/// Run `op` until it succeeds or the policy's retries are spent.
///
/// `op` receives the zero-based retry counter. The sleeper is invoked exactly
/// once per retry and never after the final failure.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
    operation: &str,
    mut op: F,
) -> Result<T, Exhausted<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retries = 0;
    loop {
        match op(retries).await {
            Ok(value) => return Ok(value),
            Err(err) if retries < policy.max_retries => {
                warn!(
                    operation,
                    attempt = retries + 1,
                    max_attempts = policy.max_attempts(),
                    retry_in_secs = policy.interval.as_secs(),
                    error = %err,
                    "Operation failed, will retry"
                );
                sleeper.sleep(policy.interval).await;
                retries += 1;
            }
            Err(last) => {
                return Err(Exhausted {
                    attempts: retries + 1,
                    last,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct CountingSleeper {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for CountingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
        }
    }

    #[tokio::test]
    async fn succeeds_without_waiting() {
        let sleeper = CountingSleeper::default();
        let policy = RetryPolicy::new(3, Duration::from_secs(5));

        let result: Result<u32, Exhausted<String>> =
            retry(policy, &sleeper, "noop", |_| async { Ok(7) }).await;

        assert_eq!(result.unwrap(), 7);
        assert!(sleeper.waits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let sleeper = CountingSleeper::default();
        let policy = RetryPolicy::new(3, Duration::from_secs(5));

        let result = retry(policy, &sleeper, "flaky", |attempt| async move {
            if attempt < 2 {
                Err(format!("attempt {attempt} failed"))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(
            *sleeper.waits.lock().unwrap(),
            vec![Duration::from_secs(5); 2]
        );
    }

    #[tokio::test]
    async fn gives_up_after_bound() {
        let sleeper = CountingSleeper::default();
        let policy = RetryPolicy::new(2, Duration::from_secs(1));

        let result: Result<(), _> = retry(policy, &sleeper, "broken", |attempt| async move {
            Err(format!("failure {attempt}"))
        })
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last, "failure 2");
        assert_eq!(sleeper.waits.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let sleeper = CountingSleeper::default();
        let policy = RetryPolicy::new(0, Duration::from_secs(1));

        let result: Result<(), _> =
            retry(policy, &sleeper, "once", |_| async { Err("nope") }).await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert!(sleeper.waits.lock().unwrap().is_empty());
    }
}
