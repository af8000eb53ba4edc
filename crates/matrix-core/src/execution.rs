//! Execution controls: entry timeout and capped, entry-scoped retries.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Limits applied to every matrix entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionControls {
    /// Wall-clock limit for a whole entry in seconds (0 = unlimited).
    pub entry_timeout_secs: u64,
    /// Wall-clock limit for a single setup or test step (0 = unlimited).
    pub step_timeout_secs: u64,
    /// Extra attempts for dependency-fetch steps (0 = run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts.
    pub backoff_base_ms: u64,
}

impl Default for ExecutionControls {
    fn default() -> Self {
        Self {
            entry_timeout_secs: 3_600,
            step_timeout_secs: 1_800,
            max_retries: 1,
            backoff_base_ms: 2_000,
        }
    }
}

impl ExecutionControls {
    pub fn entry_timeout(&self) -> Option<Duration> {
        (self.entry_timeout_secs > 0).then(|| Duration::from_secs(self.entry_timeout_secs))
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        (self.step_timeout_secs > 0).then(|| Duration::from_secs(self.step_timeout_secs))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base_ms: self.backoff_base_ms,
        }
    }
}

/// Capped exponential backoff.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl RetryPolicy {
    /// Never retry.
    pub fn once() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: 0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Run `op` until `succeeded` accepts its output or attempts run out.
///
/// Returns the last output together with the number of attempts made.
pub async fn retry_with_backoff<T, F, Fut, S>(
    policy: RetryPolicy,
    mut op: F,
    succeeded: S,
) -> (T, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = T>,
    S: Fn(&T) -> bool,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;
    loop {
        let out = op(attempt).await;
        if succeeded(&out) || attempt >= max_attempts {
            return (out, attempt);
        }
        let delay = policy.delay_after(attempt);
        warn!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, "Retrying step");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Await `fut` under an optional timeout; `None` means it timed out.
pub async fn with_optional_timeout<F>(limit: Option<Duration>, fut: F) -> Option<F::Output>
where
    F: Future,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_controls_default() {
        let c = ExecutionControls::default();
        assert_eq!(c.entry_timeout(), Some(Duration::from_secs(3_600)));
        assert_eq!(c.max_retries, 1);
    }

    #[test]
    fn test_zero_timeout_means_unlimited() {
        let c = ExecutionControls {
            entry_timeout_secs: 0,
            step_timeout_secs: 0,
            ..Default::default()
        };
        assert!(c.entry_timeout().is_none());
        assert!(c.step_timeout().is_none());
    }

    #[test]
    fn test_backoff_doubles() {
        let p = RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 100,
        };
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(400));
        assert_eq!(p.max_attempts(), 4);
    }

    #[tokio::test]
    async fn test_retry_stops_on_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base_ms: 1,
        };
        let (out, attempts) = retry_with_backoff(
            policy,
            |_| {
                let calls = calls.clone();
                async move { calls.fetch_add(1, Ordering::Relaxed) + 1 }
            },
            |n| *n >= 2,
        )
        .await;
        assert_eq!(out, 2);
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_is_capped() {
        let policy = RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 1,
        };
        let (out, attempts) = retry_with_backoff(policy, |a| async move { a }, |_| false).await;
        assert_eq!(attempts, 3);
        assert_eq!(out, 3);
    }

    #[tokio::test]
    async fn test_optional_timeout() {
        let done = with_optional_timeout(None, async { 7 }).await;
        assert_eq!(done, Some(7));

        let timed_out = with_optional_timeout(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
        })
        .await;
        assert!(timed_out.is_none());
    }
}
