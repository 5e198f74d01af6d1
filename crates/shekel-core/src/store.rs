//! The `CatalogStore` trait and upsert result types.
//!
//! The trait is implemented by storage backends (e.g. `shekel-store-sqlite`).
//! The pipeline depends on this abstraction, not on any concrete backend.

use std::{
  collections::{BTreeMap, BTreeSet},
  future::Future,
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
  CurrencyCode,
  country::{Country, StoredCountry},
  rate::{CurrencyRate, StoredRate},
};

// ─── Summaries ───────────────────────────────────────────────────────────────

/// A single row that could not be written. Sibling rows are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
  /// Natural key of the row, rendered for humans (e.g. `"israel"` or
  /// `"USD@2024-01-01"`).
  pub key:    String,
  pub reason: String,
}

/// Outcome of one upsert batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertSummary {
  pub inserted: usize,
  pub updated:  usize,
  pub failed:   Vec<RowFailure>,
}

impl UpsertSummary {
  pub fn written(&self) -> usize { self.inserted + self.updated }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the relational store holding countries and rates.
///
/// Writes are upserts keyed on natural keys: the country name key, and
/// `(currency_code, rate_date)` for rates. A batch runs in one transaction,
/// but a failing row is isolated and reported in [`UpsertSummary::failed`]
/// instead of aborting the batch. Only store-level failures (e.g. a lost
/// connection) surface as `Err`.
///
/// All methods return `Send` futures so the trait can be used from spawned
/// tokio tasks.
pub trait CatalogStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Insert new countries and refresh existing ones. `created_at` is kept on
  /// update; `updated_at` always advances.
  fn upsert_countries(
    &self,
    countries: Vec<Country>,
  ) -> impl Future<Output = Result<UpsertSummary, Self::Error>> + Send + '_;

  /// Insert or overwrite rates. Writing the same `(code, date)` twice leaves
  /// one row carrying the second value.
  fn upsert_rates(
    &self,
    rates: Vec<CurrencyRate>,
  ) -> impl Future<Output = Result<UpsertSummary, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Every currency code referenced by at least one stored country. Empty if
  /// no countries have been loaded yet.
  fn list_distinct_currency_codes(
    &self,
  ) -> impl Future<Output = Result<BTreeSet<CurrencyCode>, Self::Error>> + Send + '_;

  /// Stored country display names grouped by the currencies they use.
  fn currency_usage(
    &self,
  ) -> impl Future<Output = Result<BTreeMap<CurrencyCode, BTreeSet<String>>, Self::Error>>
  + Send
  + '_;

  /// Look a country up by name; matching is case- and whitespace-insensitive.
  fn get_country<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<StoredCountry>, Self::Error>> + Send + 'a;

  fn count_countries(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// All rates stored for one date, ordered by currency code.
  fn rates_on(
    &self,
    date: NaiveDate,
  ) -> impl Future<Output = Result<Vec<StoredRate>, Self::Error>> + Send + '_;

  fn count_rates(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;
}
