//! Country records: the loose upstream shape and the canonical stored shape.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CurrencyCode;

// ─── Upstream payload ────────────────────────────────────────────────────────

/// One record from the country source, exactly as received.
///
/// Every field is optional and untyped: upstream payloads are heterogeneous,
/// and the transformer applies an explicit default-or-skip policy per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCountry {
  /// Either a plain string or an object with `common` / `official` members.
  #[serde(default)]
  pub name:       Option<Value>,
  #[serde(default)]
  pub capital:    Option<Value>,
  #[serde(default)]
  pub continents: Option<Value>,
  /// Either an object keyed by currency code or an array of codes.
  #[serde(default)]
  pub currencies: Option<Value>,
  #[serde(default, rename = "unMember")]
  pub un_member:  Option<Value>,
  #[serde(default)]
  pub population: Option<Value>,
  #[serde(default)]
  pub timezones:  Option<Value>,
}

// ─── Canonical record ────────────────────────────────────────────────────────

/// A normalized country, ready to be upserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
  /// Display name with whitespace collapsed. Never empty when produced by
  /// the transformer.
  pub name:          String,
  pub capitals:      Vec<String>,
  pub continent:     String,
  pub currencies:    BTreeSet<CurrencyCode>,
  pub is_un_member:  bool,
  pub population:    u64,
  /// `{offset label: local wall-clock time}` captured at fetch time.
  pub timezone_info: BTreeMap<String, String>,
}

impl Country {
  /// The natural key this record is upserted under.
  pub fn key(&self) -> String { natural_key(&self.name) }
}

/// A country as persisted, with store-assigned timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCountry {
  pub country:    Country,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Collapse whitespace runs to single spaces and trim the ends.
pub fn normalize_name(name: &str) -> String {
  name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case- and whitespace-normalized form of a country name.
pub fn natural_key(name: &str) -> String { normalize_name(name).to_lowercase() }

// ─── Skips ───────────────────────────────────────────────────────────────────

/// Why a raw record produced no [`Country`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
  MissingName,
  /// Another record earlier in the same batch had the same natural key.
  DuplicateName { key: String },
}

/// A raw record the transformer refused, with its position in the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
  pub index:  usize,
  #[serde(flatten)]
  pub reason: SkipReason,
}
