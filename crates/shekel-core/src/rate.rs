//! Currency rates against the shekel.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{CurrencyCode, Error, Result};

/// The rate of one currency on one date.
///
/// `shekel_rate` is the number of ILS that one unit of `currency_code` buys.
/// The natural key is `(currency_code, rate_date)`; `country_names` is a
/// denormalized convenience and never part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyRate {
  pub currency_code: CurrencyCode,
  pub rate_date:     NaiveDate,
  pub shekel_rate:   Decimal,
  pub country_names: BTreeSet<String>,
}

impl CurrencyRate {
  /// Build a rate with no associated countries, rejecting non-positive values.
  pub fn new(currency_code: CurrencyCode, rate_date: NaiveDate, shekel_rate: Decimal) -> Result<Self> {
    if shekel_rate <= Decimal::ZERO {
      return Err(Error::NonPositiveRate {
        code: currency_code.to_string(),
        rate: shekel_rate,
      });
    }
    Ok(Self {
      currency_code,
      rate_date,
      shekel_rate,
      country_names: BTreeSet::new(),
    })
  }
}

/// A rate as persisted, with store-assigned timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRate {
  pub rate:       CurrencyRate,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

// ─── Lookup failures ─────────────────────────────────────────────────────────

/// Why a single currency could not be resolved to a rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum LookupFailure {
  /// The rate source does not know the currency.
  NotFound,
  /// The source answered with zero or a negative number.
  InvalidRate { rate: Decimal },
  /// Every attempt failed at the transport level (including timeouts).
  Transport { attempts: u32, message: String },
  /// The run was asked to stop before this code was fetched.
  Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedLookup {
  pub code:    CurrencyCode,
  #[serde(flatten)]
  pub failure: LookupFailure,
}
