//! ============================================================================
//! Retry Logic - Exponential Backoff for Upstream Calls
//! ============================================================================
//! The API clients never retry on their own. The batch orchestrator wraps
//! each embedding call with this policy:
//! - Exponential backoff with jitter between attempts
//! - Longer pause when rate limited
//! - Permanent failures (4xx, data, configuration) returned immediately
//! ============================================================================

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::RagResult;

/// Configuration for upstream retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Base delay between retries (will be multiplied by 2^attempt)
    pub base_delay_ms: u64,
    /// Maximum delay between retries
    pub max_delay_ms: u64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
        }
    }
}

/// Calculate delay with exponential backoff and optional jitter
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    // Use saturating multiplication to avoid overflow
    let multiplier = 2u64.saturating_pow(attempt.min(63));
    let base_delay = config.base_delay_ms.saturating_mul(multiplier);
    let capped_delay = base_delay.min(config.max_delay_ms);

    let final_delay = if config.jitter {
        // Add random jitter (0-50% of delay), still bounded by the cap
        let jitter_factor = 1.0 + (rand_simple() * 0.5);
        ((capped_delay as f64 * jitter_factor) as u64).min(config.max_delay_ms)
    } else {
        capped_delay
    };

    Duration::from_millis(final_delay)
}

/// Simple pseudo-random number generator (0.0 to 1.0)
/// Uses time-based seed for simplicity
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
/// The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, label: &str, mut op: F) -> RagResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RagResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded on attempt {}", label, attempt + 1);
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() || attempt + 1 >= max_attempts => return Err(e),
            Err(e) => {
                let delay = if e.is_rate_limited() {
                    Duration::from_millis(config.max_delay_ms)
                } else {
                    calculate_delay(attempt, config)
                };
                warn!(
                    "{} attempt {} failed ({}), retrying in {:?}",
                    label,
                    attempt + 1,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
