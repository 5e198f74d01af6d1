//! Per-call timeout and bounded exponential backoff for upstream calls.

use std::{fmt::Display, future::Future, time::Duration};

use thiserror::Error;
use tokio::sync::watch;

use crate::Error as PipelineError;

/// How an upstream call is retried.
///
/// Attempt `n` (1-based) that fails is followed by a pause of
/// `base_delay * 2^(n-1)`, capped at `max_delay`. Each attempt is bounded by
/// `call_timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub base_delay:   Duration,
  pub max_delay:    Duration,
  pub call_timeout: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay:   Duration::from_secs(1),
      max_delay:    Duration::from_secs(60),
      call_timeout: Duration::from_secs(30),
    }
  }
}

/// Why [`RetryPolicy::run`] gave up.
#[derive(Debug, Error)]
pub enum RetryError {
  #[error("upstream call failed after {attempts} attempt(s): {message}")]
  Transport { attempts: u32, message: String },

  #[error("upstream call timed out after {attempts} attempt(s) of {per_call:?}")]
  Timeout { attempts: u32, per_call: Duration },

  #[error("cancelled by shutdown")]
  Cancelled,
}

impl From<RetryError> for PipelineError {
  fn from(e: RetryError) -> Self {
    match e {
      RetryError::Transport { attempts, message } => Self::Transport { attempts, message },
      RetryError::Timeout { attempts, per_call } => Self::Timeout { attempts, per_call },
      RetryError::Cancelled => Self::Cancelled,
    }
  }
}

enum Failure {
  Call(String),
  TimedOut,
}

impl RetryPolicy {
  /// Pause after failed attempt number `attempt`.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    self.base_delay.saturating_mul(factor).min(self.max_delay)
  }

  /// Run `call` until it succeeds or attempts run out.
  ///
  /// The backoff pause is interrupted by `shutdown`, in which case
  /// [`RetryError::Cancelled`] is returned. A call already in flight is allowed
  /// to finish.
  pub async fn run<T, E, F, Fut>(
    &self,
    op: &str,
    shutdown: &watch::Receiver<bool>,
    mut call: F,
  ) -> Result<T, RetryError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
  {
    let mut shutdown = shutdown.clone();
    let max_attempts = self.max_attempts.max(1);
    let mut attempt = 0;

    loop {
      attempt += 1;
      let failure = match tokio::time::timeout(self.call_timeout, call()).await {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(e)) => Failure::Call(e.to_string()),
        Err(_) => Failure::TimedOut,
      };

      if attempt >= max_attempts {
        return Err(match failure {
          Failure::Call(message) => RetryError::Transport { attempts: attempt, message },
          Failure::TimedOut => RetryError::Timeout { attempts: attempt, per_call: self.call_timeout },
        });
      }

      let delay = self.backoff(attempt);
      match &failure {
        Failure::Call(message) => tracing::warn!(
          op,
          attempt,
          delay_ms = delay.as_millis() as u64,
          error = %message,
          "upstream call failed; retrying"
        ),
        Failure::TimedOut => tracing::warn!(
          op,
          attempt,
          delay_ms = delay.as_millis() as u64,
          "upstream call timed out; retrying"
        ),
      }

      if *shutdown.borrow() {
        return Err(RetryError::Cancelled);
      }
      tokio::select! {
        () = tokio::time::sleep(delay) => {}
        Ok(_) = shutdown.wait_for(|stop| *stop) => return Err(RetryError::Cancelled),
      }
    }
  }
}
