//! Retry and Poll Policies
//!
//! Transient platform failures are retried with bounded exponential backoff.
//! Anything else propagates on the first attempt.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{MaplinkError, PlatformError, Result};

/// Bounded exponential backoff for remote calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    4_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Deployment status polling cadence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_max_poll_interval_ms")]
    pub max_interval_ms: u64,

    /// Overall deadline for one deploy call
    #[serde(default = "default_deploy_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_max_poll_interval_ms() -> u64 {
    30_000
}

fn default_deploy_timeout_secs() -> u64 {
    1_800
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_interval_ms: default_max_poll_interval_ms(),
            timeout_secs: default_deploy_timeout_secs(),
        }
    }
}

impl PollPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Next poll interval: grows by half, capped at `max_interval_ms`
    pub fn next_interval(&self, current: Duration) -> Duration {
        let grown = current + current / 2;
        grown.min(Duration::from_millis(self.max_interval_ms))
    }
}

/// Run `call` until it succeeds, fails permanently, or attempts run out
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    operation: &'static str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, PlatformError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Remote call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient platform error, retrying"
                );
                clock.sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(MaplinkError::remote(operation, attempt, e)),
        }
    }
}
