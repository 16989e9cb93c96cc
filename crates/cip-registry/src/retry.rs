//! Exponential backoff for registry requests.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{RegistryError, Result};

/// Exponential backoff with jitter and a bounded number of attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied per retry.
    pub factor: u32,
    /// Fraction of the delay added or removed at random (0.1 = ±10%).
    pub jitter: f64,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            factor: 2,
            jitter: 0.1,
            max_delay: Duration::from_secs(60),
            max_attempts: 45,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// A fast policy for tests and local registries.
    #[must_use]
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            factor: 1,
            jitter: 0.0,
            max_delay: delay,
            max_attempts: attempts,
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use cip_registry::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.base_delay(1), Duration::from_secs(1));
    /// assert_eq!(policy.base_delay(3), Duration::from_secs(4));
    /// assert_eq!(policy.base_delay(20), Duration::from_secs(60));
    /// ```
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let multiplier = self.factor.saturating_pow(exponent);
        self.initial_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    /// Delay before retry number `retry`, with jitter applied.
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        base.mul_f64(factor).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// the attempts run out.
    ///
    /// A `Retry-After` hint from a 429 replaces the computed delay, capped
    /// at `max_delay`.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or
    /// [`RegistryError::RetriesExhausted`] wrapping the last retryable one.
    pub async fn run<T, F, Fut>(&self, url: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let backoff = match &e {
                        RegistryError::RateLimited {
                            retry_after: Some(after),
                            ..
                        } => (*after).min(self.max_delay),
                        _ => self.delay(attempt),
                    };
                    warn!(
                        url = %url,
                        error = %e,
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        "retrying request"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() && self.max_attempts > 1 => {
                    return Err(RegistryError::RetriesExhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_base_delay_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.base_delay(1), Duration::from_secs(1));
        assert_eq!(p.base_delay(2), Duration::from_secs(2));
        assert_eq!(p.base_delay(6), Duration::from_secs(32));
        assert_eq!(p.base_delay(7), Duration::from_secs(60));
        assert_eq!(p.base_delay(45), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_within_jitter_bounds() {
        let p = RetryPolicy::default();
        for _ in 0..100 {
            let d = p.delay(3);
            assert!(d >= Duration::from_millis(3599));
            assert!(d <= Duration::from_millis(4401));
        }
        assert!(p.delay(30) <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_run_retries_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));
        let result = policy
            .run("u", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RegistryError::Timeout { url: "u".into() })
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));
        let result: Result<()> = policy
            .run("u", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RegistryError::NotFound { url: "u".into() })
            })
            .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
        let result: Result<()> = policy
            .run("u", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RegistryError::Timeout { url: "u".into() })
            })
            .await;
        assert!(matches!(
            result,
            Err(RegistryError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
