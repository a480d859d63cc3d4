//! Exponential backoff for rate-limited device queries.
//!
//! Only errors that look like throttling are retried. Anything else is
//! returned to the caller on the first occurrence.

use super::{Device, TransportFault};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Case-insensitive phrases transports use when a request was throttled
const RATE_LIMIT_SIGNATURES: &[&str] = &[
    "exceeded requests limit",
    "rate limit",
    "too many requests",
    "request rate exceeded",
    "throttled",
];

/// Backoff settings. Built once from configuration and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Uniform jitter range added to every delay
    pub jitter: (Duration, Duration),
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: (Duration::ZERO, Duration::from_millis(500)),
        }
    }
}

impl RetryPolicy {
    /// Jitter bounds ordered low to high.
    pub fn jitter_bounds(&self) -> (Duration, Duration) {
        let (a, b) = self.jitter;
        if a <= b { (a, b) } else { (b, a) }
    }

    /// Largest delay [`calculate_delay`] can ever produce.
    pub fn max_backoff(&self) -> Duration {
        self.max_delay.saturating_add(self.jitter_bounds().1)
    }
}

/// Detects rate limiting from error text.
pub struct RateLimitDetector;

impl RateLimitDetector {
    /// Check if an error is related to rate limiting.
    ///
    /// Transport detail text is checked first, then the error's own message.
    pub fn is_rate_limited<E: TransportFault + ?Sized>(error: &E) -> bool {
        if error.details().is_some_and(Self::matches) {
            return true;
        }
        Self::matches(&error.to_string())
    }

    fn matches(text: &str) -> bool {
        let text = text.to_lowercase();
        RATE_LIMIT_SIGNATURES.iter().any(|sig| text.contains(sig))
    }
}

/// Delay before retry `attempt` (0-based):
/// `min(base_delay * 2^attempt, max_delay) + uniform(jitter)`.
pub fn calculate_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    let backoff = policy.base_delay.saturating_mul(factor).min(policy.max_delay);

    let (lo, hi) = policy.jitter_bounds();
    let jitter = rand::thread_rng().gen_range(lo..=hi);

    backoff.saturating_add(jitter)
}

/// Run `operation` against `device`, retrying rate-limited failures.
///
/// Retries are sequential. After `policy.max_retries` retries the last
/// rate-limit error is returned. Dropping the returned future abandons any
/// pending backoff.
pub async fn execute_with_retry<T, E, F, Fut>(
    device: &Device,
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: TransportFault,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(
                        device = %device.name,
                        retries = attempt,
                        "{} succeeded on device '{}' after {} retries",
                        operation_name,
                        device.name,
                        attempt
                    );
                }
                return Ok(value);
            }
            Err(error) if RateLimitDetector::is_rate_limited(&error) => {
                if attempt >= policy.max_retries {
                    tracing::error!(
                        device = %device.name,
                        attempts = attempt + 1,
                        "Rate limit persists on device '{}' after {} attempts, {} failed permanently",
                        device.name,
                        attempt + 1,
                        operation_name
                    );
                    return Err(error);
                }

                let delay = calculate_delay(attempt, policy);
                tracing::warn!(
                    device = %device.name,
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_secs = delay.as_secs_f64(),
                    "Rate limit detected on device '{}' (attempt {}/{}), retrying in {:.2}s",
                    device.name,
                    attempt + 1,
                    policy.max_retries + 1,
                    delay.as_secs_f64()
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                tracing::debug!(
                    "Non-retryable error in {} for device '{}': {}",
                    operation_name,
                    device.name,
                    error
                );
                return Err(error);
            }
        }
    }
}
