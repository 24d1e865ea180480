use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay unit; attempt n waits `base_delay * 2^(n-1)`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before 1-based `attempt`. The first attempt runs immediately.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt < 2 {
            return None;
        }

        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor))
    }

    /// Every delay the policy can produce, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (2..=self.max_attempts).filter_map(|n| self.delay_before(n))
    }
}

/// Retry loop state: which attempt is running and what comes next.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    /// Start at attempt 1.
    pub fn new(policy: RetryPolicy) -> Self {
        Backoff { policy, attempt: 1 }
    }

    /// Current 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Advance after a failed attempt.
    ///
    /// Returns the delay before the next attempt, or `None` once the
    /// policy's attempts are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }

        self.attempt += 1;
        self.policy.delay_before(self.attempt)
    }
}

/// Run `op` until it succeeds or the policy gives up.
///
/// Every error is retried the same way; the last one is returned. `op`
/// receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut backoff = Backoff::new(policy);

    loop {
        let attempt = backoff.attempt();

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, backing off"
                    );
                    sleep(delay).await;
                }
                None => {
                    debug!(attempt = attempt, "Retry attempts exhausted");
                    return Err(e);
                }
            },
        }
    }
}
