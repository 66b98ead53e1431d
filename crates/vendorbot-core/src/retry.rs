//! Bounded retry with exponential backoff for flaky remote calls.
//!
//! Only errors reporting themselves as transient are retried; business
//! failures surface on the first attempt.

use std::future::Future;
use std::time::Duration;

use tracing::warn;
use vendorbot_ci::CiError;

use crate::domain::{ProviderError, VendorbotError};

/// Errors that can tell whether a retry might succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout { .. } | ProviderError::Network { .. } => true,
            ProviderError::Http { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Spawn { .. }
            | ProviderError::CommandFailed { .. }
            | ProviderError::Protocol { .. } => false,
        }
    }
}

impl Transient for CiError {
    fn is_transient(&self) -> bool {
        CiError::is_transient(self)
    }
}

impl Transient for VendorbotError {
    fn is_transient(&self) -> bool {
        match self {
            VendorbotError::Provider(e) => e.is_transient(),
            VendorbotError::Ci(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Attempt budget and delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt` (1-based). The first attempt is immediate.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Run `op` until it succeeds, fails non-transiently, or the budget runs out.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + std::fmt::Display,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max && err.is_transient() => {
                attempt += 1;
                let delay = policy.backoff(attempt);
                warn!(call = what, attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient failure, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(5), Duration::from_secs(10));
        assert_eq!(policy.backoff(40), Duration::from_secs(10));
    }

    fn network() -> ProviderError {
        ProviderError::Network {
            service: "bugzilla".into(),
            message: "reset".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, ProviderError> = with_retry(&RetryPolicy::default(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(network())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ProviderError> = with_retry(&RetryPolicy::default(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(network()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ProviderError> = with_retry(&RetryPolicy::default(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProviderError::Http {
                    service: "phabricator".into(),
                    status: 403,
                    message: "forbidden".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ci_errors_delegate() {
        let err: VendorbotError = CiError::Timeout { secs: 5 }.into();
        assert!(err.is_transient());
        let err: VendorbotError = CiError::Decode("bad".into()).into();
        assert!(!err.is_transient());
    }
}
