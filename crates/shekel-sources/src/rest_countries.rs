//! Country catalog client for the REST Countries API.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use shekel_core::{country::RawCountry, source::CountrySource};

use crate::{Error, Result};

/// Only the fields the transformer reads are requested.
pub const DEFAULT_URL: &str = "https://restcountries.com/v3.1/all?fields=name,capital,continents,currencies,unMember,population,timezones";

/// Async client for the full country catalog.
///
/// Cheap to clone: the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct RestCountriesClient {
  client: Client,
  url:    String,
}

impl RestCountriesClient {
  pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client, url: url.into() })
  }
}

impl CountrySource for RestCountriesClient {
  type Error = Error;

  fn name(&self) -> &str { "restcountries" }

  async fn fetch_all_countries(&self) -> Result<Vec<RawCountry>> {
    tracing::debug!(url = %self.url, "fetching country catalog");
    let resp = self.client.get(&self.url).send().await?;

    let status = resp.status();
    if !status.is_success() {
      return Err(Error::Status { url: self.url.clone(), status });
    }

    let body = resp.text().await?;
    parse_catalog(&body)
  }
}

/// Parse a catalog response body.
///
/// The body must be a JSON array. An element that is not a usable object
/// becomes an empty [`RawCountry`], which the transformer reports as skipped
/// instead of failing the whole catalog.
pub fn parse_catalog(body: &str) -> Result<Vec<RawCountry>> {
  let value: Value = serde_json::from_str(body).map_err(|e| Error::Decode(e.to_string()))?;
  let Value::Array(items) = value else {
    return Err(Error::Decode("country catalog is not a JSON array".into()));
  };

  Ok(
    items
      .into_iter()
      .map(|item| serde_json::from_value(item).unwrap_or_default())
      .collect(),
  )
}
