//! Bounded retry with exponential backoff, generic over any remote call.
//!
//! Both adapters go through [`with_retry`] so backoff behavior cannot drift
//! between them.

use crate::RemoteError;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt following `attempt` (0-indexed):
    /// `base * 2^attempt`, capped at `max_delay`, plus up to 250ms of jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let millis = (self.base_delay.as_millis() as u64)
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.max_delay.as_millis() as u64);
        let jitter = if self.jitter {
            let seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.subsec_nanos() as u64)
                .unwrap_or(0);
            seed % 250
        } else {
            0
        };
        Duration::from_millis(millis + jitter)
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{attempts} attempts exhausted: {last}")]
    Exhausted { attempts: u32, last: RemoteError },
    #[error(transparent)]
    Permanent(RemoteError),
}

impl RetryError {
    /// Human-readable failure reason, recorded against the file.
    pub fn reason(&self) -> String {
        match self {
            RetryError::Exhausted { attempts, last } => {
                format!("retries exhausted after {attempts} attempts: {last}")
            }
            RetryError::Permanent(err) => err.to_string(),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget is
/// spent. Transient failures wait `base * 2^attempt` between attempts,
/// unless the failure carries a server-supplied `retry_after` hint.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err @ RemoteError::Permanent { .. }) => {
                return Err(RetryError::Permanent(err));
            }
            Err(RemoteError::Transient {
                reason,
                retry_after,
            }) => {
                if attempt + 1 == attempts {
                    return Err(RetryError::Exhausted {
                        attempts,
                        last: RemoteError::Transient {
                            reason,
                            retry_after: None,
                        },
                    });
                }
                let wait = retry_after.unwrap_or_else(|| policy.backoff_delay(attempt));
                warn!(
                    what,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    wait_ms = wait.as_millis() as u64,
                    %reason,
                    "transient failure, backing off"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
    unreachable!("retry loop returns before exhausting the range")
}
