//! Retry and polling helpers for provider collaborators.
//!
//! The engine does not emulate provider throttling. It retries calls the
//! provider classified as retryable and leaves everything else to the caller.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{OrgFormError, ProviderError, Result};

/// Maximum attempts for retryable provider calls.
pub const MAX_RETRIES: u32 = 5;

/// Base delay between retries, in milliseconds.
const RETRY_DELAY_MS: u64 = 500;

/// Runs a provider call, retrying while it returns a retryable error.
///
/// # Errors
///
/// Returns the last error when attempts are exhausted, or the first
/// non-retryable error.
pub async fn with_retry<T, F, Fut>(max_attempts: u32, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = e
                    .retry_delay_secs()
                    .map_or_else(
                        || Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)),
                        Duration::from_secs,
                    );
                debug!("Retry attempt {attempt} of {max_attempts} in {delay:?}: {e}");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Polls until `check` reports completion.
///
/// `check` returns `Ok(Some(value))` when done and `Ok(None)` to keep
/// waiting. Throttled checks count as attempts.
///
/// # Errors
///
/// Returns a `Timeout` after `max_attempts`, or the first non-retryable
/// error returned by `check`.
pub async fn poll_until_complete<T, F, Fut>(
    resource: &str,
    max_attempts: u32,
    interval: Duration,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for attempt in 1..=max_attempts {
        match check().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => debug!("{resource} not complete (attempt {attempt} of {max_attempts})"),
            Err(e) if e.is_retryable() => debug!("{resource} poll throttled: {e}"),
            Err(e) => return Err(e),
        }

        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    Err(OrgFormError::Provider(ProviderError::Timeout {
        resource: resource.to_string(),
        attempts: max_attempts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_poll_completes() {
        let calls = &AtomicU32::new(0);
        let value = poll_until_complete("account create", 5, Duration::from_millis(1), move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok((n == 3).then_some(n))
        })
        .await
        .expect("poll");

        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_poll_times_out() {
        let result: Result<()> =
            poll_until_complete("account create", 3, Duration::from_millis(1), || async {
                Ok(None)
            })
            .await;

        assert!(matches!(
            result,
            Err(OrgFormError::Provider(ProviderError::Timeout { attempts: 3, .. }))
        ));
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = with_retry(5, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::not_found("policy p-1").into())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_throttling() {
        let calls = &AtomicU32::new(0);
        let value = with_retry(3, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProviderError::Throttled {
                    retry_after_secs: 0,
                }
                .into())
            } else {
                Ok("ok")
            }
        })
        .await
        .expect("retry");

        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
