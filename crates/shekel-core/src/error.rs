//! Error types for `shekel-core`.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid currency code: {0:?}")]
  InvalidCurrencyCode(String),

  #[error("invalid UTC offset: {0:?}")]
  InvalidOffset(String),

  #[error("rate for {code} must be positive, got {rate}")]
  NonPositiveRate { code: String, rate: Decimal },

  #[error("configuration error: {0}")]
  Configuration(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
