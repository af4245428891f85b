//! Bounded exponential backoff for flaky RPC work.
//!
//! A [`RetryPolicy`] never raises: when every attempt fails the caller gets
//! [`Outcome::RetriesExhausted`] carrying the last error, and decides for
//! itself whether that is worth more than a log line.

use std::future::Future;
use std::time::Duration;

use log::warn;

/// Result of a retried operation.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    /// The operation succeeded but found nothing.
    Empty,
    RetriesExhausted {
        attempts: u32,
        last_error: anyhow::Error,
    },
}

impl<T> Outcome<T> {
    /// Downgrade a successful value to [`Outcome::Empty`] when `is_empty`
    /// holds for it.
    pub fn empty_when(self, is_empty: impl FnOnce(&T) -> bool) -> Self {
        match self {
            Outcome::Success(value) if is_empty(&value) => Outcome::Empty,
            other => other,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Outcome::RetriesExhausted { .. })
    }

    /// Collapse `Empty` and `RetriesExhausted` into `None`.
    pub fn into_option(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }
}

impl<T: Default> Outcome<T> {
    pub fn unwrap_or_default(self) -> T {
        self.into_option().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub tries: u32,
    pub delay: Duration,
    pub backoff: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries: 3,
            delay: Duration::from_secs(2),
            backoff: 2,
        }
    }
}

impl RetryPolicy {
    pub fn new(tries: u32, delay: Duration, backoff: u32) -> Self {
        Self {
            tries,
            delay,
            backoff,
        }
    }

    /// Wait inserted after the failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.delay
            .saturating_mul(self.backoff.saturating_pow(exponent))
    }

    /// Run `op` until it succeeds or `tries` attempts have failed. Every error
    /// is treated as transient.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Outcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let tries = self.tries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Outcome::Success(value),
                Err(e) if attempt >= tries => {
                    warn!("{label}: giving up after {attempt} attempts: {e:#}");
                    return Outcome::RetriesExhausted {
                        attempts: attempt,
                        last_error: e,
                    };
                }
                Err(e) => {
                    let wait = self.delay_after(attempt);
                    warn!("{label}: attempt {attempt}/{tries} failed: {e:#}, retrying in {wait:?}");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::Cell;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_configured_tries() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 2);

        let outcome: Outcome<()> = policy
            .run("always fails", || {
                calls.set(calls.get() + 1);
                async { Err(anyhow!("connection reset")) }
            })
            .await;

        assert_eq!(calls.get(), 3);
        match outcome {
            Outcome::RetriesExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.to_string(), "connection reset");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_grow_geometrically() {
        let policy = RetryPolicy::new(4, Duration::from_secs(1), 2);
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));

        let started = Instant::now();
        let outcome: Outcome<u8> = policy
            .run("timing", || async { Err(anyhow!("boo")) })
            .await;

        assert!(outcome.is_exhausted());
        // 1s + 2s + 4s between four attempts, nothing after the last one.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(8), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_success() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::new(5, Duration::from_secs(2), 2);

        let outcome = policy
            .run("flaky", || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(anyhow!("timeout"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(outcome.into_option(), Some(3));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn empty_values_downgrade() {
        let outcome = Outcome::Success(Vec::<u8>::new()).empty_when(Vec::is_empty);
        assert!(matches!(outcome, Outcome::Empty));

        let outcome = Outcome::Success(vec![1u8]).empty_when(Vec::is_empty);
        assert_eq!(outcome.unwrap_or_default(), vec![1u8]);
    }
}
