//! Normalization of raw country payloads into [`Country`] records.
//!
//! Every upstream field is optional. Each one has a declared policy:
//!
//! | field        | when absent   | when malformed                          |
//! |--------------|---------------|-----------------------------------------|
//! | name         | record skipped| record skipped                          |
//! | capital      | empty list    | non-string entries dropped              |
//! | continents   | `"Unknown"`   | `"Unknown"`                             |
//! | currencies   | empty set     | invalid tokens dropped with a warning   |
//! | unMember     | `false`       | `false` with a warning                  |
//! | population   | `0`           | negatives clamp to 0, floats truncate, non-numbers become 0 with a warning |
//! | timezones    | empty map     | bad offsets dropped with a warning      |
//!
//! The transformer never touches the network or the store.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::{
  CurrencyCode, Error, Result,
  country::{Country, RawCountry, SkipReason, SkippedRecord, natural_key, normalize_name},
};

pub const UNKNOWN_CONTINENT: &str = "Unknown";

/// Largest population the store can represent.
const MAX_POPULATION: u64 = i64::MAX as u64;

/// Output of one [`CountryTransformer::transform`] call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CountryBatch {
  pub countries: Vec<Country>,
  pub skipped:   Vec<SkippedRecord>,
  /// Field-level problems in records that were still accepted.
  pub warnings:  Vec<String>,
}

/// Turns raw country records into canonical ones.
///
/// Holds the instant used for the timezone snapshot so every record in a
/// batch is stamped with the same wall clock.
#[derive(Debug, Clone, Copy)]
pub struct CountryTransformer {
  now: DateTime<Utc>,
}

impl CountryTransformer {
  pub fn new(now: DateTime<Utc>) -> Self { Self { now } }

  pub fn transform(&self, raw: Vec<RawCountry>) -> CountryBatch {
    let mut batch = CountryBatch::default();
    let mut seen = HashSet::new();

    for (index, record) in raw.into_iter().enumerate() {
      let Some(name) = extract_name(record.name.as_ref()) else {
        batch.skipped.push(SkippedRecord { index, reason: SkipReason::MissingName });
        continue;
      };

      let key = natural_key(&name);
      if !seen.insert(key.clone()) {
        batch.skipped.push(SkippedRecord {
          index,
          reason: SkipReason::DuplicateName { key },
        });
        continue;
      }

      let mut warnings = Vec::new();
      let country = Country {
        capitals:      extract_capitals(record.capital.as_ref()),
        continent:     extract_continent(record.continents.as_ref()),
        currencies:    extract_currencies(record.currencies.as_ref(), &mut warnings),
        is_un_member:  extract_un_member(record.un_member.as_ref(), &mut warnings),
        population:    extract_population(record.population.as_ref(), &mut warnings),
        timezone_info: self.timezone_snapshot(record.timezones.as_ref(), &mut warnings),
        name,
      };

      batch
        .warnings
        .extend(warnings.into_iter().map(|w| format!("{}: {w}", country.name)));
      batch.countries.push(country);
    }

    batch
  }

  /// Current wall-clock time at each declared offset, keyed by the canonical
  /// offset label.
  fn timezone_snapshot(
    &self,
    value: Option<&Value>,
    warnings: &mut Vec<String>,
  ) -> BTreeMap<String, String> {
    let mut snapshot = BTreeMap::new();
    for token in string_items(value) {
      match parse_utc_offset(token) {
        Ok((label, offset)) => {
          let local = self.now.with_timezone(&offset);
          snapshot.insert(label, local.format("%Y-%m-%d %H:%M:%S").to_string());
        }
        Err(e) => warnings.push(e.to_string()),
      }
    }
    snapshot
  }
}

// ─── Field extraction ────────────────────────────────────────────────────────

fn extract_name(value: Option<&Value>) -> Option<String> {
  let raw = match value? {
    Value::String(s) => s.as_str(),
    Value::Object(map) => map
      .get("common")
      .and_then(Value::as_str)
      .filter(|s| !s.trim().is_empty())
      .or_else(|| map.get("official").and_then(Value::as_str))?,
    _ => return None,
  };
  let name = normalize_name(raw);
  (!name.is_empty()).then_some(name)
}

fn extract_capitals(value: Option<&Value>) -> Vec<String> {
  string_items(value)
    .map(normalize_name)
    .filter(|s| !s.is_empty())
    .collect()
}

fn extract_continent(value: Option<&Value>) -> String {
  string_items(value)
    .map(normalize_name)
    .find(|s| !s.is_empty())
    .unwrap_or_else(|| UNKNOWN_CONTINENT.to_owned())
}

fn extract_currencies(value: Option<&Value>, warnings: &mut Vec<String>) -> BTreeSet<CurrencyCode> {
  let tokens: Vec<&str> = match value {
    Some(Value::Object(map)) => map.keys().map(String::as_str).collect(),
    other => string_items(other).collect(),
  };

  let mut codes = BTreeSet::new();
  for token in tokens {
    match CurrencyCode::normalize(token) {
      Ok(code) => {
        codes.insert(code);
      }
      Err(e) => warnings.push(format!("dropped {e}")),
    }
  }
  codes
}

fn extract_un_member(value: Option<&Value>, warnings: &mut Vec<String>) -> bool {
  match value {
    None | Some(Value::Null) => false,
    Some(Value::Bool(b)) => *b,
    Some(other) => {
      warnings.push(format!("unMember is not a boolean ({other}); using false"));
      false
    }
  }
}

fn extract_population(value: Option<&Value>, warnings: &mut Vec<String>) -> u64 {
  match value {
    None | Some(Value::Null) => 0,
    Some(Value::Number(n)) => {
      if let Some(u) = n.as_u64() {
        u.min(MAX_POPULATION)
      } else if n.is_i64() {
        warnings.push(format!("negative population {n} clamped to 0"));
        0
      } else {
        match n.as_f64() {
          Some(f) if f.is_finite() && f >= 0.0 => (f.trunc() as u64).min(MAX_POPULATION),
          _ => {
            warnings.push(format!("population {n} clamped to 0"));
            0
          }
        }
      }
    }
    Some(other) => {
      warnings.push(format!("population is not a number ({other}); using 0"));
      0
    }
  }
}

/// The string members of a field that may be a single string or an array.
fn string_items(value: Option<&Value>) -> impl Iterator<Item = &str> {
  let items: Vec<&str> = match value {
    Some(Value::String(s)) => vec![s.as_str()],
    Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
    _ => Vec::new(),
  };
  items.into_iter()
}

// ─── Offsets ─────────────────────────────────────────────────────────────────

/// Parse `"UTC"`, `"UTC+05:30"`, `"UTC-03"` and friends.
///
/// Returns the canonical label (`"UTC"` for zero, otherwise `UTC±HH:MM`) and
/// the offset itself.
pub fn parse_utc_offset(token: &str) -> Result<(String, FixedOffset)> {
  let invalid = || Error::InvalidOffset(token.to_owned());
  let trimmed = token.trim();
  let rest = trimmed.strip_prefix("UTC").ok_or_else(invalid)?;

  let (sign, body) = if rest.is_empty() {
    (1, "00:00")
  } else if let Some(body) = rest.strip_prefix('+') {
    (1, body)
  } else if let Some(body) = rest.strip_prefix('-').or_else(|| rest.strip_prefix('\u{2212}')) {
    (-1, body)
  } else {
    return Err(invalid());
  };

  let (hours, minutes) = body.split_once(':').unwrap_or((body, "00"));
  let digits = |s: &str| !s.is_empty() && s.len() <= 2 && s.bytes().all(|b| b.is_ascii_digit());
  if !digits(hours) || minutes.len() != 2 || !digits(minutes) {
    return Err(invalid());
  }

  let hours: i32 = hours.parse().map_err(|_| invalid())?;
  let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
  if hours > 18 || minutes >= 60 {
    return Err(invalid());
  }

  let seconds = sign * (hours * 3600 + minutes * 60);
  let offset = FixedOffset::east_opt(seconds).ok_or_else(invalid)?;
  let label = if seconds == 0 {
    "UTC".to_owned()
  } else {
    let sign = if sign > 0 { '+' } else { '-' };
    format!("UTC{sign}{hours:02}:{minutes:02}")
  };

  Ok((label, offset))
}
