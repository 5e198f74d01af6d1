//! Error types for `shekel-pipeline`.

use std::time::Duration;

use thiserror::Error;

/// A job-level failure. Per-record and per-currency problems are reported in
/// the job summary instead; the one exception is a rates run in which every
/// upstream lookup failed on transport.
#[derive(Debug, Error)]
pub enum Error {
  #[error("upstream call failed after {attempts} attempt(s): {message}")]
  Transport { attempts: u32, message: String },

  #[error("upstream call timed out after {attempts} attempt(s) of {per_call:?}")]
  Timeout { attempts: u32, per_call: Duration },

  #[error("store error: {0}")]
  Persistence(String),

  #[error("cancelled by shutdown")]
  Cancelled,
}

impl Error {
  pub(crate) fn persistence(e: impl std::fmt::Display) -> Self { Self::Persistence(e.to_string()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
