//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings and dates as `YYYY-MM-DD`.
//! Decimals keep their canonical string form so no precision is lost.
//! Collections are stored as compact JSON.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, de::DeserializeOwned};
use shekel_core::{
  CurrencyCode,
  country::{Country, StoredCountry, natural_key},
  rate::{CurrencyRate, StoredRate},
};

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_decimal(d: Decimal) -> String { d.normalize().to_string() }

pub fn decode_decimal(s: &str) -> Result<Decimal> { Ok(s.parse::<Decimal>()?) }

pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
  Ok(serde_json::to_string(value)?)
}

pub fn decode_json<T: DeserializeOwned>(s: &str) -> Result<T> { Ok(serde_json::from_str(s)?) }

/// Human-readable natural key of a rate, used in row failure reports.
pub fn rate_key(code: CurrencyCode, date: NaiveDate) -> String {
  format!("{code}@{}", encode_date(date))
}

// ─── Country rows ────────────────────────────────────────────────────────────

/// Column values of a `countries` row, encoded for binding or just read back.
pub struct CountryRow {
  pub name_key:      String,
  pub name:          String,
  pub capitals:      String,
  pub continent:     String,
  pub currencies:    String,
  pub is_un_member:  bool,
  pub population:    i64,
  pub timezone_info: String,
}

impl CountryRow {
  pub fn encode(country: &Country) -> Result<Self> {
    let population = i64::try_from(country.population)
      .map_err(|_| Error::OutOfRange(format!("population {}", country.population)))?;

    Ok(Self {
      name_key: natural_key(&country.name),
      name: country.name.clone(),
      capitals: encode_json(&country.capitals)?,
      continent: country.continent.clone(),
      currencies: encode_json(&country.currencies)?,
      is_un_member: country.is_un_member,
      population,
      timezone_info: encode_json(&country.timezone_info)?,
    })
  }

  pub fn decode(self, created_at: &str, updated_at: &str) -> Result<StoredCountry> {
    let population = u64::try_from(self.population)
      .map_err(|_| Error::OutOfRange(format!("population {}", self.population)))?;

    Ok(StoredCountry {
      country:    Country {
        name: self.name,
        capitals: decode_json(&self.capitals)?,
        continent: self.continent,
        currencies: decode_json::<BTreeSet<CurrencyCode>>(&self.currencies)?,
        is_un_member: self.is_un_member,
        population,
        timezone_info: decode_json::<BTreeMap<String, String>>(&self.timezone_info)?,
      },
      created_at: decode_dt(created_at)?,
      updated_at: decode_dt(updated_at)?,
    })
  }
}

// ─── Rate rows ───────────────────────────────────────────────────────────────

pub struct RateRow {
  pub currency_code: String,
  pub rate_date:     String,
  pub shekel_rate:   String,
  pub country_names: String,
}

impl RateRow {
  pub fn encode(rate: &CurrencyRate) -> Result<Self> {
    Ok(Self {
      currency_code: rate.currency_code.to_string(),
      rate_date:     encode_date(rate.rate_date),
      shekel_rate:   encode_decimal(rate.shekel_rate),
      country_names: encode_json(&rate.country_names)?,
    })
  }

  pub fn decode(self, created_at: &str, updated_at: &str) -> Result<StoredRate> {
    Ok(StoredRate {
      rate:       CurrencyRate {
        currency_code: CurrencyCode::parse(&self.currency_code)?,
        rate_date:     decode_date(&self.rate_date)?,
        shekel_rate:   decode_decimal(&self.shekel_rate)?,
        country_names: decode_json(&self.country_names)?,
      },
      created_at: decode_dt(created_at)?,
      updated_at: decode_dt(updated_at)?,
    })
  }
}
