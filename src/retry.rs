//! Exponential backoff for provider and store calls.
//!
//! - [`ProviderError::Transient`] → retry after `base × 2^(attempt-1)`
//!   (exponent capped at 5)
//! - [`ProviderError::Permanent`] → fail immediately
//!
//! With the default base of one second the delays are 1s, 2s, 4s, 8s, 16s,
//! 32s, 32s, ...

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{ProviderError, SyncError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// No retries, no waiting.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.backoff_base_ms),
        )
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(5);
        self.base_delay * (1u32 << exp)
    }
}

/// A failed operation together with how many times it was tried.
#[derive(Debug, Clone, PartialEq)]
pub struct Exhausted {
    pub error: ProviderError,
    pub attempts: u32,
}

impl std::fmt::Display for Exhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} attempt(s))", self.error, self.attempts)
    }
}

impl From<Exhausted> for SyncError {
    fn from(e: Exhausted) -> Self {
        let msg = e.to_string();
        match e.error {
            ProviderError::Transient(_) => SyncError::Transient(msg),
            ProviderError::Permanent(_) => SyncError::Permanent(msg),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, Exhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt <= policy.max_retries => {
                let delay = policy.delay(attempt);
                debug!(what, attempt, ?delay, error = %e, "retrying after transient error");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(Exhausted {
                    error: e,
                    attempts: attempt,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = RetryPolicy::new(10, Duration::from_secs(1));
        assert_eq!(p.delay(1), Duration::from_secs(1));
        assert_eq!(p.delay(2), Duration::from_secs(2));
        assert_eq!(p.delay(3), Duration::from_secs(4));
        assert_eq!(p.delay(6), Duration::from_secs(32));
        assert_eq!(p.delay(9), Duration::from_secs(32));
    }

    #[tokio::test]
    async fn test_transient_retried_until_success() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy::new(3, Duration::ZERO);
        let counter = &calls;
        let out = with_backoff(&p, "test", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(ProviderError::Transient("503".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(out, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_not_retried() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy::new(5, Duration::ZERO);
        let counter = &calls;
        let out: Result<(), _> = with_backoff(&p, "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Permanent("400".into()))
        })
        .await;
        let err = out.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy::new(2, Duration::ZERO);
        let counter = &calls;
        let out: Result<(), _> = with_backoff(&p, "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Transient("timeout".into()))
        })
        .await;
        assert_eq!(out.unwrap_err().attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
