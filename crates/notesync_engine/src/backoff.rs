//! Exponential backoff with jitter.

use crate::config::RetryConfig;
use crate::error::SyncError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// What a retried call went through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made, the first one included.
    pub attempts: u32,
    /// The delay slept before the last attempt.
    pub last_delay: Duration,
}

/// Returns the delay before retry number `attempt`.
///
/// `min(base * 2^(attempt - 1), cap)`. With jitter a random share of up to
/// the same amount is added and the result re-capped. Attempt 0 is the
/// initial call and never waits.
pub fn compute_delay(base: Duration, attempt: u32, cap: Duration, jitter: bool) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 2u32.saturating_pow(attempt - 1);
    let delay = base.saturating_mul(factor).min(cap);
    if !jitter || delay.is_zero() {
        return delay;
    }
    let extra = delay.mul_f64(rand::thread_rng().gen::<f64>());
    delay.saturating_add(extra).min(cap)
}

/// Classifies an error as transient.
pub fn is_retryable(error: &SyncError) -> bool {
    error.is_retryable()
}

/// Runs fallible async operations under a [`RetryConfig`].
///
/// The scheduler keeps no counters of its own; each call to
/// [`Backoff::retry`] reports what happened in its [`RetryState`].
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    config: RetryConfig,
}

impl Backoff {
    /// Creates a scheduler.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns the delay before retry number `attempt` under this config.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        compute_delay(
            self.config.base_delay,
            attempt,
            self.config.max_delay,
            self.config.jitter,
        )
    }

    /// Calls `op` until it succeeds, fails with a final error, or the retry
    /// budget is spent.
    pub async fn retry<T, F, Fut>(&self, mut op: F) -> (Result<T, SyncError>, RetryState)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut state = RetryState::default();
        loop {
            state.attempts += 1;
            let error = match op().await {
                Ok(value) => return (Ok(value), state),
                Err(e) => e,
            };

            let retries_done = state.attempts - 1;
            if !is_retryable(&error) || retries_done >= self.config.max_retries {
                return (Err(error), state);
            }

            let delay = self.delay_for(state.attempts);
            warn!(
                attempt = state.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after transient failure"
            );
            state.last_delay = delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};
    use std::cell::Cell;

    const BASE: Duration = Duration::from_millis(1000);
    const CAP: Duration = Duration::from_millis(10_000);

    #[test]
    fn delay_doubles_up_to_cap() {
        let delays: Vec<u128> = (1..=5)
            .map(|n| compute_delay(BASE, n, CAP, false).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000]);
        assert_eq!(compute_delay(BASE, 0, CAP, true), Duration::ZERO);
        assert_eq!(compute_delay(BASE, 64, CAP, false), CAP);
    }

    proptest! {
        #[test]
        fn jitter_stays_within_bounds(attempt in 1u32..12) {
            let plain = compute_delay(BASE, attempt, CAP, false);
            let jittered = compute_delay(BASE, attempt, CAP, true);
            prop_assert!(jittered >= plain);
            prop_assert!(jittered <= (plain * 2).min(CAP));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_with_backoff() {
        let backoff = Backoff::new(RetryConfig::default());
        let calls = Cell::new(0);
        let started = tokio::time::Instant::now();

        let (result, state) = backoff
            .retry(|| {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(SyncError::Timeout)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(state.attempts, 3);
        assert_eq!(state.last_delay, Duration::from_millis(2000));
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_retries() {
        let backoff = Backoff::new(RetryConfig::default());
        let calls = Cell::new(0u32);

        let (result, state) = backoff
            .retry(|| {
                calls.set(calls.get() + 1);
                async { Err::<(), _>(SyncError::http(503, "unavailable")) }
            })
            .await;

        assert!(matches!(result, Err(SyncError::Http { status: 503, .. })));
        assert_eq!(calls.get(), 4);
        assert_eq!(state.attempts, 4);
        assert_eq!(state.last_delay, Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn final_errors_are_not_retried() {
        let backoff = Backoff::new(RetryConfig::no_delay());
        let calls = Cell::new(0u32);

        let (result, state) = backoff
            .retry(|| {
                calls.set(calls.get() + 1);
                async { Err::<(), _>(SyncError::http(400, "bad request")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
        assert_eq!(state, RetryState { attempts: 1, last_delay: Duration::ZERO });
    }
}
