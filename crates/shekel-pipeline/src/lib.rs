//! The ETL jobs and the scheduler that drives them.
//!
//! [`Pipeline`] wires a [`CountrySource`](shekel_core::source::CountrySource),
//! a [`RateSource`](shekel_core::source::RateSource) and a
//! [`CatalogStore`](shekel_core::store::CatalogStore) together into the
//! countries job and the rates job. [`Orchestrator`] adds per-job mutual
//! exclusion and the timer loop. [`Pipeline::check_health`] reports whether
//! the store and both sources answer.

pub mod error;
pub mod health;
pub mod jobs;
pub mod rates;
pub mod retry;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use jobs::{InitialLoadSummary, JobKind, JobSummary, Pipeline, PipelineOptions};
pub use rates::{RateBatch, RateResolver};
pub use retry::{RetryError, RetryPolicy};
pub use scheduler::{
  Cadence, JobState, LoopStats, Orchestrator, RunOutcome, Schedule, SchedulerState,
};
