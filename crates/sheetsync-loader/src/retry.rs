use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use sheetsync_core::config::RetryConfig;
use sheetsync_core::{Error, Result};

/// Pure exponential backoff for transient failures: no jitter, no cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, initial_delay: Duration::from_secs(1) }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self { max_attempts: config.max_attempts.max(1), initial_delay: config.initial_delay() }
    }
}

impl RetryPolicy {
    /// Delay before retry `k` (k >= 1): `initial_delay * 2^(k-1)`.
    pub fn delay_for(&self, k: u32) -> Duration {
        let exp = k.saturating_sub(1).min(31);
        self.initial_delay.saturating_mul(1u32 << exp)
    }

    /// Every delay the policy can sleep, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_attempts).map(|k| self.delay_for(k))
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// `max_attempts` is used up. Returns the value and the retries spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<(T, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok((value, attempt - 1)),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(id = label, attempt, max_attempts = self.max_attempts, ?delay, error = %err, "transient failure, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    error!(id = label, attempts = attempt, error = %err, "retries exhausted");
                    return Err(Error::RetriesExhausted { id: label.to_string(), attempts: attempt, source: Box::new(err) });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_the_initial_delay() {
        let policy = RetryPolicy { max_attempts: 5, initial_delay: Duration::from_millis(250) };
        let delays: Vec<u128> = policy.delays().map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000]);
    }

    #[test]
    fn single_attempt_policy_never_sleeps() {
        let policy = RetryPolicy { max_attempts: 1, initial_delay: Duration::from_secs(1) };
        assert_eq!(policy.delays().count(), 0);
    }

    #[test]
    fn huge_exponents_saturate() {
        let policy = RetryPolicy { max_attempts: 100, initial_delay: Duration::from_secs(u64::MAX / 2) };
        assert_eq!(policy.delay_for(64), Duration::MAX);
    }

    #[test]
    fn config_conversion_keeps_at_least_one_attempt() {
        let policy = RetryPolicy::from(&RetryConfig { max_attempts: 0, initial_delay_secs: 0.1 });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
    }
}
