//! Error type for `shekel-sources`.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("{url} returned {status}")]
  Status { url: String, status: StatusCode },

  #[error("unexpected response body: {0}")]
  Decode(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
