//! HTTP adapters for the two upstream sources.
//!
//! Each client performs exactly one request per trait call with a per-request
//! timeout. Retries and backoff live in `shekel-pipeline`.

pub mod error;
pub mod frankfurter;
pub mod rest_countries;

pub use error::{Error, Result};
pub use frankfurter::FrankfurterClient;
pub use rest_countries::RestCountriesClient;
