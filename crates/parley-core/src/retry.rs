//! Exponential backoff for transient judge and target failures.
//!
//! Retrying is bounded twice: by attempt count and by total elapsed time.
//! Whichever runs out first ends the loop.

use crate::errors::ProviderError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_elapsed_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            max_elapsed_ms: 300_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            failures: 0,
            started: Instant::now(),
        }
    }

    /// Delay before retry number `retry` (0-indexed), before jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let ms = (self.initial_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Per-call retry state. Ask it for the next delay after every transient failure.
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
    started: Instant,
}

impl Backoff {
    /// Records a failed attempt. `None` means stop retrying.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.policy.max_attempts {
            return None;
        }
        let mut delay = self.policy.base_delay(self.failures - 1);
        if self.policy.jitter && !delay.is_zero() {
            // up to 25% extra
            let extra = delay.as_millis() as f64 * 0.25 * rand::thread_rng().gen::<f64>();
            delay += Duration::from_millis(extra as u64);
        }
        let budget = Duration::from_millis(self.policy.max_elapsed_ms);
        if self.started.elapsed() + delay > budget {
            return None;
        }
        Some(delay)
    }

    /// Decide what to do with a failed call: sleep for the returned delay
    /// and retry, or give up with the error to surface.
    pub fn retry_after(&mut self, err: ProviderError) -> Result<Duration, ProviderError> {
        if !err.is_transient() {
            return Err(err);
        }
        match self.next_delay() {
            Some(delay) => {
                tracing::warn!(
                    provider = err.provider(),
                    attempt = self.failures,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying: {}",
                    err
                );
                Ok(delay)
            }
            None => Err(ProviderError::RetriesExhausted {
                provider: err.provider().to_string(),
                attempts: self.failures,
                last: err.to_string(),
            }),
        }
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            max_elapsed_ms: 60_000,
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn delays_grow_and_clamp() {
        let p = fixed(10);
        assert_eq!(p.base_delay(0), Duration::from_millis(100));
        assert_eq!(p.base_delay(1), Duration::from_millis(200));
        assert_eq!(p.base_delay(3), Duration::from_millis(800));
        assert_eq!(p.base_delay(4), Duration::from_millis(1_000));
        assert_eq!(p.base_delay(30), Duration::from_millis(1_000));
    }

    #[test]
    fn attempts_bound_stops_retrying() {
        let mut b = fixed(3).backoff();
        assert!(b.next_delay().is_some());
        assert!(b.next_delay().is_some());
        assert!(b.next_delay().is_none());
        assert_eq!(b.attempts(), 3);
    }

    #[test]
    fn single_attempt_never_retries() {
        let mut b = RetryPolicy::no_retry().backoff();
        assert!(b.next_delay().is_none());
    }

    #[test]
    fn elapsed_budget_stops_retrying() {
        let p = RetryPolicy {
            max_elapsed_ms: 50,
            ..fixed(10)
        };
        let mut b = p.backoff();
        assert!(b.next_delay().is_none());
    }

    #[test]
    fn jitter_adds_at_most_a_quarter() {
        let p = RetryPolicy {
            jitter: true,
            ..fixed(10)
        };
        for _ in 0..50 {
            let d = p.backoff().next_delay().unwrap();
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(125));
        }
    }

    #[test]
    fn fatal_errors_are_returned_as_is() {
        let mut b = fixed(5).backoff();
        let err = b
            .retry_after(ProviderError::fatal("judge", "bad request"))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Fatal { .. }));
        assert_eq!(b.attempts(), 0);
    }

    #[test]
    fn exhausted_transients_become_retries_exhausted() {
        let mut b = fixed(2).backoff();
        assert!(b.retry_after(ProviderError::transient("judge", "429")).is_ok());
        match b.retry_after(ProviderError::transient("judge", "429")) {
            Err(ProviderError::RetriesExhausted { attempts, provider, .. }) => {
                assert_eq!(attempts, 2);
                assert_eq!(provider, "judge");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let p: RetryPolicy = serde_yaml::from_str("max_attempts: 3").unwrap();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.initial_delay_ms, 500);
        assert!(p.jitter);
    }
}
