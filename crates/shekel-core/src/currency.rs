//! ISO 4217 currency codes.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// A validated three-letter currency code matching `^[A-Z]{3}$`.
///
/// Stored inline, so the type is `Copy` and cheap to pass to spawned fetches.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode([u8; 3]);

/// The Israeli new shekel, the quote currency of every stored rate.
pub const ILS: CurrencyCode = CurrencyCode(*b"ILS");

/// The base currency used to check that a rate source answers.
pub const USD: CurrencyCode = CurrencyCode(*b"USD");

impl CurrencyCode {
  /// Parse a code exactly as given. Lowercase input is rejected; use
  /// [`CurrencyCode::normalize`] for upstream tokens.
  pub fn parse(s: &str) -> Result<Self, Error> {
    let bytes = s.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_uppercase) {
      return Err(Error::InvalidCurrencyCode(s.to_owned()));
    }
    Ok(Self([bytes[0], bytes[1], bytes[2]]))
  }

  /// Trim and uppercase an upstream token before validating it.
  pub fn normalize(s: &str) -> Result<Self, Error> {
    Self::parse(&s.trim().to_ascii_uppercase())
  }
}

impl fmt::Display for CurrencyCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for b in self.0 {
      write!(f, "{}", b as char)?;
    }
    Ok(())
  }
}

impl FromStr for CurrencyCode {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl TryFrom<String> for CurrencyCode {
  type Error = Error;

  fn try_from(s: String) -> Result<Self, Self::Error> { Self::parse(&s) }
}

impl From<CurrencyCode> for String {
  fn from(code: CurrencyCode) -> Self { code.to_string() }
}
