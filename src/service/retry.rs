use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Bounded-attempt exponential backoff, shared by every call site that
/// retries a per-directory fetch. Delays double by default: 1s, 2s, 4s.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before re-running `attempt` (1-based; the first attempt runs
    /// immediately, so this is the sleep after attempt N fails).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * self.backoff_multiplier.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run `op` until it succeeds or the policy is exhausted, sleeping between
/// attempts. Returns the final error once all attempts fail.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    %label,
                    attempt,
                    max_attempts,
                    retry_in = ?delay,
                    %error,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                tracing::warn!(%label, attempts = max_attempts, %error, "all attempts exhausted");
                return Err(error);
            }
        }
    }
}
