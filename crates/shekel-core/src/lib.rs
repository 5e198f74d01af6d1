//! Core types and trait definitions for the shekel country/rate catalog.
//!
//! This crate is deliberately free of HTTP and database dependencies. The
//! source adapters, the SQLite store and the pipeline all depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod country;
pub mod currency;
pub mod error;
pub mod rate;
pub mod source;
pub mod store;
pub mod transform;

pub use currency::{CurrencyCode, ILS, USD};
pub use error::{Error, Result};
