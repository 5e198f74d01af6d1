//! Ports for the two upstream data sources.
//!
//! Implemented by `shekel-sources` over HTTP and by in-process fakes in
//! tests. Implementations perform exactly one upstream call per method call;
//! timeouts and retries are applied by the pipeline.

use std::future::Future;

use rust_decimal::Decimal;

use crate::{CurrencyCode, country::RawCountry};

/// The full country catalog in one read-only call.
pub trait CountrySource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Short name used in log fields.
  fn name(&self) -> &str;

  /// Fetch every record the source has. No pagination; zero records is a
  /// valid answer.
  fn fetch_all_countries(
    &self,
  ) -> impl Future<Output = Result<Vec<RawCountry>, Self::Error>> + Send + '_;
}

/// Single currency-pair rates.
pub trait RateSource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn name(&self) -> &str;

  /// How many units of `quote` one unit of `base` buys today.
  ///
  /// `Ok(None)` means the source does not know one of the currencies; that
  /// is a normal answer, not an error.
  fn fetch_rate(
    &self,
    base: CurrencyCode,
    quote: CurrencyCode,
  ) -> impl Future<Output = Result<Option<Decimal>, Self::Error>> + Send + '_;
}
