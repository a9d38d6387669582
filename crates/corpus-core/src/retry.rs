//! Retry policy with exponential backoff and jitter.
//!
//! Shape grounded on `dashflow::core::retry::{RetryPolicy, with_retry}` as
//! used from `dashflow-registry::client` (`RetryPolicy::exponential(n)`,
//! `with_retry(&policy, || async move { .. }).await`); the policy's source
//! was not part of the retrieved pack, so the type below is reconstructed
//! from that call-site contract and generalized to this crate's
//! backoff/max-delay formula.

use crate::error::CorpusError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff policy: `delay = min(backoff_factor^attempt,
/// max_delay)`, with up to `max_retry_attempts + 1` total tries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// `max_retry_attempts` *additional* tries after the first — attempts
    /// are capped at `max_retry_attempts + 1` total.
    pub fn exponential(max_retry_attempts: u32) -> Self {
        Self {
            max_attempts: max_retry_attempts,
            ..Self::default()
        }
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let secs = self.backoff_factor.powi(attempt as i32).min(self.max_delay.as_secs_f64());
        let base = Duration::from_secs_f64(secs.max(0.0));
        if self.jitter {
            let jitter_ms = rand::thread_rng().gen_range(0..250);
            base + Duration::from_millis(jitter_ms)
        } else {
            base
        }
    }
}

/// Runs `op` until it succeeds or the policy's attempts are exhausted.
/// On exhaustion, returns `CorpusError::RetryExhaustedError` carrying the
/// last inner error.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, CorpusError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CorpusError>>,
{
    let total_tries = policy.max_attempts + 1;
    let mut last_err: Option<CorpusError> = None;
    for attempt in 0..total_tries {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                tracing::warn!(attempt, "operation failed, will {}", if attempt + 1 < total_tries { "retry" } else { "give up" });
                last_err = Some(e);
                if attempt + 1 < total_tries {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
            }
        }
    }
    Err(CorpusError::retry_exhausted(
        total_tries,
        last_err.expect("loop runs at least once"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn zero_attempts_means_exactly_one_try() {
        let policy = RetryPolicy::exponential(0);
        let calls = AtomicU32::new(0);
        let result: Result<(), CorpusError> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CorpusError::GraphConnectionError("boom".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn three_attempts_means_up_to_four_tries() {
        let policy = RetryPolicy::exponential(3).with_max_delay(Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let result: Result<(), CorpusError> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CorpusError::GraphConnectionError("boom".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn succeeds_without_exhausting() {
        let policy = RetryPolicy::exponential(3).with_max_delay(Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CorpusError::GraphConnectionError("boom".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }
}
