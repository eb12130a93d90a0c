//! Bounded retry for transient backend errors.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::BackendError;

/// Retry policy for backend calls. Only transient errors are retried;
/// validation errors fail immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  pub attempts: u32,
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    RetryPolicy {
      attempts: 3,
      base_delay: Duration::from_millis(200),
    }
  }
}

impl RetryPolicy {
  /// A policy that never retries. Used by tests and read paths that prefer
  /// failing fast.
  pub fn none() -> Self {
    RetryPolicy {
      attempts: 1,
      base_delay: Duration::ZERO,
    }
  }
}

/// Run a backend call, retrying transient failures with exponential backoff.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut call: F) -> Result<T, BackendError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, BackendError>>,
{
  let mut attempt = 1;
  loop {
    match call().await {
      Ok(value) => return Ok(value),
      Err(err) if err.is_transient() && attempt < policy.attempts => {
        let delay = policy.base_delay * 2u32.saturating_pow(attempt - 1);
        warn!(
          call = what,
          attempt,
          delay_ms = delay.as_millis() as u64,
          error = %err,
          "transient backend error, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
      Err(err) => return Err(err),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn fast_policy() -> RetryPolicy {
    RetryPolicy {
      attempts: 3,
      base_delay: Duration::from_millis(1),
    }
  }

  #[tokio::test]
  async fn transient_errors_are_retried() {
    let calls = AtomicU32::new(0);
    let result = with_retry(&fast_policy(), "get_role", || {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      async move {
        if n < 2 {
          Err(BackendError::Unavailable("503".into()))
        } else {
          Ok(42)
        }
      }
    })
    .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn retries_are_bounded() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = with_retry(&fast_policy(), "get_role", || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err(BackendError::Unavailable("503".into())) }
    })
    .await;

    assert!(matches!(result, Err(BackendError::Unavailable(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn none_policy_never_retries() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = with_retry(&RetryPolicy::none(), "get_function", || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err(BackendError::Unavailable("503".into())) }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn validation_errors_fail_immediately() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = with_retry(&fast_policy(), "create_function", || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err(BackendError::Rejected("memory out of range".into())) }
    })
    .await;

    assert!(matches!(result, Err(BackendError::Rejected(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
