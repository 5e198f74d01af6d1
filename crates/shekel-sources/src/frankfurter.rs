//! Exchange-rate client for the Frankfurter API.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde_json::Value;
use shekel_core::{CurrencyCode, source::RateSource};

use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.frankfurter.app";

/// Async client for `GET /latest?from=BASE&to=QUOTE`.
///
/// Cheap to clone: the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct FrankfurterClient {
  client:   Client,
  base_url: String,
}

impl FrankfurterClient {
  pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client, base_url: base_url.into() })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base_url.trim_end_matches('/'), path)
  }
}

impl RateSource for FrankfurterClient {
  type Error = Error;

  fn name(&self) -> &str { "frankfurter" }

  async fn fetch_rate(&self, base: CurrencyCode, quote: CurrencyCode) -> Result<Option<Decimal>> {
    if base == quote {
      return Ok(Some(Decimal::ONE));
    }

    let url = self.url("/latest");
    tracing::debug!(%base, %quote, "fetching rate");
    let resp = self
      .client
      .get(&url)
      .query(&[("from", base.to_string()), ("to", quote.to_string())])
      .send()
      .await?;

    // Frankfurter answers 404 for currencies it does not track and 422 for
    // pairs it refuses; both mean "no rate", not a transport failure.
    match resp.status() {
      StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => return Ok(None),
      status if !status.is_success() => return Err(Error::Status { url, status }),
      _ => {}
    }

    let body = resp.text().await?;
    parse_rate(&body, quote)
  }
}

/// Extract `rates[quote]` from a `/latest` response body.
pub fn parse_rate(body: &str, quote: CurrencyCode) -> Result<Option<Decimal>> {
  let value: Value = serde_json::from_str(body).map_err(|e| Error::Decode(e.to_string()))?;
  let rates = value
    .get("rates")
    .and_then(Value::as_object)
    .ok_or_else(|| Error::Decode("response has no `rates` object".into()))?;

  match rates.get(&quote.to_string()) {
    None | Some(Value::Null) => Ok(None),
    Some(Value::Number(n)) => decimal_from_json(&n.to_string()).map(Some),
    Some(Value::String(s)) => decimal_from_json(s).map(Some),
    Some(other) => Err(Error::Decode(format!("rate is not a number: {other}"))),
  }
}

fn decimal_from_json(s: &str) -> Result<Decimal> {
  s.parse::<Decimal>()
    .or_else(|_| Decimal::from_scientific(s))
    .map_err(|e| Error::Decode(format!("rate {s:?}: {e}")))
}
