//! Timeouts, bounded retries and request deadlines for external calls
//!
//! Every call to the embedding, search and completion services goes through
//! [`call_external`]: each attempt gets its own timeout, transient failures
//! (see [`AppError::is_retryable`]) are retried with exponential backoff up to
//! `max_retries` times, and the whole exchange is cut off at the request's
//! deadline.

use crate::config::RetryConfig;
use crate::errors::{AppError, Result};
use backoff::{future::retry_notify, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Retry and timeout settings for one external call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Timeout of a single attempt
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms.max(config.initial_backoff_ms)),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    /// A single attempt with the given timeout.
    pub fn no_retry(call_timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(0),
            max_backoff: Duration::from_millis(0),
            call_timeout,
        }
    }

    fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Deadline shared by every external call made for one request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestScope {
    deadline: Option<Instant>,
}

impl RequestScope {
    /// No deadline; only per-call timeouts apply.
    pub fn unbounded() -> Self {
        Self { deadline: None }
    }

    /// Deadline `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { deadline: Some(Instant::now() + timeout) }
    }

    /// Deadline at a fixed instant.
    pub fn until(deadline: Instant) -> Self {
        Self { deadline: Some(deadline) }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left before the deadline, if there is one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Run `fut`, failing with `DeadlineExceeded` once the deadline passes.
    pub async fn run<T, F>(&self, service: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .unwrap_or_else(|_| {
                    Err(AppError::DeadlineExceeded { service: service.to_string() })
                }),
            None => fut.await,
        }
    }
}

/// Call an external service under `policy` and `scope`.
///
/// `op` is invoked once per attempt and is never invoked after the deadline
/// has passed.
pub async fn call_external<T, F, Fut>(
    service: &str,
    policy: &RetryPolicy,
    scope: &RequestScope,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let scope = *scope;
    let max_attempts = policy.max_attempts();
    let call_timeout = policy.call_timeout;
    let mut attempt: u32 = 0;

    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_backoff)
        .with_max_interval(policy.max_backoff)
        .with_multiplier(2.0)
        .with_randomization_factor(0.1)
        .with_max_elapsed_time(None)
        .build();

    let operation = || {
        attempt += 1;
        let current = attempt;
        let call = if scope.is_expired() { None } else { Some(op()) };

        async move {
            let Some(call) = call else {
                return Err(backoff::Error::permanent(AppError::DeadlineExceeded {
                    service: service.to_string(),
                }));
            };

            let result = match tokio::time::timeout(call_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout {
                    service: service.to_string(),
                    timeout_ms: call_timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() && current < max_attempts => {
                    Err(backoff::Error::transient(e))
                }
                Err(e) => {
                    if current > 1 {
                        tracing::warn!(
                            service = service,
                            attempts = current,
                            error = %e,
                            "External call failed after retries"
                        );
                    }
                    Err(backoff::Error::permanent(e))
                }
            }
        }
    };

    let notify = |e: AppError, wait: Duration| {
        tracing::warn!(
            service = service,
            error = %e,
            retry_in_ms = wait.as_millis() as u64,
            "External call failed, retrying"
        );
        crate::metrics::record_retry(service);
    };

    scope.run(service, retry_notify(backoff, operation, notify)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            call_timeout: Duration::from_millis(200),
        }
    }

    fn unavailable() -> AppError {
        AppError::Upstream {
            service: "search".into(),
            status: 503,
            message: "busy".into(),
        }
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = call_external("search", &fast_policy(1), &RequestScope::unbounded(), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(unavailable())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_attempted_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> =
            call_external("embedding", &fast_policy(3), &RequestScope::unbounded(), || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::EmbeddingError { message: "malformed".into() })
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::EmbeddingError { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> =
            call_external("search", &fast_policy(1), &RequestScope::unbounded(), || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(unavailable())
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::Upstream { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_deadline_skips_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let scope = RequestScope::until(Instant::now() - Duration::from_millis(1));

        let result: Result<()> = call_external("completion", &fast_policy(1), &scope, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(AppError::DeadlineExceeded { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let policy = RetryPolicy::no_retry(Duration::from_millis(10));

        let result: Result<()> = call_external("search", &policy, &RequestScope::unbounded(), || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(AppError::Timeout { timeout_ms: 10, .. })));
    }

    #[tokio::test]
    async fn test_deadline_cuts_off_slow_call() {
        let policy = fast_policy(0);
        let scope = RequestScope::with_timeout(Duration::from_millis(20));

        let result: Result<()> = call_external("completion", &policy, &scope, || async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(AppError::DeadlineExceeded { .. })));
    }

    #[test]
    fn test_scope_remaining() {
        assert!(RequestScope::unbounded().remaining().is_none());
        assert!(!RequestScope::unbounded().is_expired());

        let scope = RequestScope::with_timeout(Duration::from_secs(60));
        assert!(scope.remaining().unwrap() > Duration::from_secs(50));
    }
}
