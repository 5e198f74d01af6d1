//! The countries job, the rates job and the initial load.

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use shekel_core::{
  ILS, USD,
  country::SkippedRecord,
  rate::{FailedLookup, LookupFailure},
  source::{CountrySource, RateSource},
  store::{CatalogStore, RowFailure},
  transform::CountryTransformer,
};
use tokio::{sync::watch, time::Instant};
use tracing::{info, warn};

use crate::{
  Error, RateBatch, RateResolver, Result, RetryPolicy,
  health::{HealthCheck, HealthReport},
};

// ─── Summaries ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
  Countries,
  Rates,
}

impl fmt::Display for JobKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Countries => "countries",
      Self::Rates => "rates",
    })
  }
}

/// What one job run did.
///
/// `fetched` counts raw country records for the countries job and distinct
/// currency codes for the rates job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
  pub job:            JobKind,
  pub started_at:     DateTime<Utc>,
  pub finished_at:    DateTime<Utc>,
  /// Date stamped on every rate written by a rates job.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub rate_date:      Option<NaiveDate>,
  pub fetched:        usize,
  pub inserted:       usize,
  pub updated:        usize,
  pub skipped:        Vec<SkippedRecord>,
  pub warnings:       Vec<String>,
  pub failed_rows:    Vec<RowFailure>,
  pub failed_lookups: Vec<FailedLookup>,
}

impl JobSummary {
  fn started(job: JobKind) -> Self {
    Self {
      job,
      started_at: Utc::now(),
      finished_at: Utc::now(),
      rate_date: None,
      fetched: 0,
      inserted: 0,
      updated: 0,
      skipped: Vec::new(),
      warnings: Vec::new(),
      failed_rows: Vec::new(),
      failed_lookups: Vec::new(),
    }
  }

  /// Rows that failed to write plus currencies that failed to resolve.
  pub fn failed(&self) -> usize { self.failed_rows.len() + self.failed_lookups.len() }

  fn finish(mut self) -> Self {
    self.finished_at = Utc::now();
    info!(
      job = %self.job,
      fetched = self.fetched,
      inserted = self.inserted,
      updated = self.updated,
      skipped = self.skipped.len(),
      failed = self.failed(),
      "job finished"
    );
    self
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct InitialLoadSummary {
  pub countries: JobSummary,
  pub rates:     JobSummary,
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
  pub retry:            RetryPolicy,
  /// Maximum in-flight rate lookups.
  pub rate_concurrency: usize,
}

impl Default for PipelineOptions {
  fn default() -> Self { Self { retry: RetryPolicy::default(), rate_concurrency: 4 } }
}

/// The two ETL jobs over one store.
///
/// Both jobs observe `shutdown`: a set signal interrupts retry backoff and
/// stops new rate lookups from starting.
pub struct Pipeline<S, C, R> {
  store:       Arc<S>,
  countries:   Arc<C>,
  rate_source: Arc<R>,
  rates:       RateResolver<R>,
  retry:       RetryPolicy,
  shutdown:    watch::Receiver<bool>,
}

impl<S, C, R> Pipeline<S, C, R>
where
  S: CatalogStore + 'static,
  C: CountrySource + 'static,
  R: RateSource + 'static,
{
  pub fn new(
    store: Arc<S>,
    countries: Arc<C>,
    rates: Arc<R>,
    options: PipelineOptions,
    shutdown: watch::Receiver<bool>,
  ) -> Self {
    Self {
      store,
      countries,
      rate_source: Arc::clone(&rates),
      rates: RateResolver::new(rates, options.retry, options.rate_concurrency),
      retry: options.retry,
      shutdown,
    }
  }

  /// Fetch the full country catalog, normalize it and upsert it.
  ///
  /// Fails only when the source cannot be reached after retries or the store
  /// is unavailable. Rejected records and rows that fail to write are
  /// reported in the summary.
  pub async fn run_countries_job(&self) -> Result<JobSummary> {
    let mut summary = JobSummary::started(JobKind::Countries);
    info!(job = "countries", source = self.countries.name(), "job started");

    let raw = self
      .retry
      .run("fetch countries", &self.shutdown, || {
        let source = Arc::clone(&self.countries);
        async move { source.fetch_all_countries().await }
      })
      .await?;
    summary.fetched = raw.len();

    let batch = CountryTransformer::new(Utc::now()).transform(raw);
    for skipped in &batch.skipped {
      warn!(job = "countries", index = skipped.index, reason = ?skipped.reason, "record skipped");
    }
    for warning in &batch.warnings {
      warn!(job = "countries", "{warning}");
    }

    let upsert = self
      .store
      .upsert_countries(batch.countries)
      .await
      .map_err(Error::persistence)?;
    for failure in &upsert.failed {
      warn!(job = "countries", key = %failure.key, reason = %failure.reason, "row not written");
    }

    summary.inserted = upsert.inserted;
    summary.updated = upsert.updated;
    summary.failed_rows = upsert.failed;
    summary.skipped = batch.skipped;
    summary.warnings = batch.warnings;
    Ok(summary.finish())
  }

  /// Resolve a rate for every currency used by a stored country and upsert
  /// the results under today's date.
  ///
  /// Currencies that fail to resolve are reported, never fatal, unless every
  /// upstream lookup failed on transport: that is an unreachable rate source
  /// and fails the job before anything is written. With no countries stored
  /// the job does nothing.
  pub async fn run_rates_job(&self) -> Result<JobSummary> {
    let mut summary = JobSummary::started(JobKind::Rates);
    let as_of = summary.started_at.date_naive();
    summary.rate_date = Some(as_of);
    info!(job = "rates", %as_of, "job started");

    let codes = self
      .store
      .list_distinct_currency_codes()
      .await
      .map_err(Error::persistence)?;
    summary.fetched = codes.len();
    if codes.is_empty() {
      info!(job = "rates", "no currencies stored; nothing to resolve");
      return Ok(summary.finish());
    }

    let usage = self.store.currency_usage().await.map_err(Error::persistence)?;
    let mut batch = self.rates.resolve_rates(&codes, as_of, &self.shutdown).await;
    if let Some(e) = outage(&batch) {
      warn!(job = "rates", failed = batch.failed.len(), error = %e, "rate source unreachable");
      return Err(e);
    }
    for rate in &mut batch.rates {
      if let Some(names) = usage.get(&rate.currency_code) {
        rate.country_names = names.clone();
      }
    }

    let upsert = self
      .store
      .upsert_rates(batch.rates)
      .await
      .map_err(Error::persistence)?;
    for failure in &upsert.failed {
      warn!(job = "rates", key = %failure.key, reason = %failure.reason, "row not written");
    }

    summary.inserted = upsert.inserted;
    summary.updated = upsert.updated;
    summary.failed_rows = upsert.failed;
    summary.failed_lookups = batch.failed;
    Ok(summary.finish())
  }

  /// Countries job to completion, then the rates job. A failed countries job
  /// aborts the load before any rate is fetched.
  pub async fn run_initial_load(&self) -> Result<InitialLoadSummary> {
    info!("initial load started");
    let countries = self.run_countries_job().await?;
    let rates = self.run_rates_job().await?;
    Ok(InitialLoadSummary { countries, rates })
  }

  /// Check the store and both sources once each, without retries. Upstream
  /// calls are bounded by the per-call timeout.
  ///
  /// The store and the two sources are critical. An empty catalog only
  /// degrades the report.
  pub async fn check_health(&self) -> HealthReport {
    let per_call = self.retry.call_timeout;
    let mut checks = Vec::with_capacity(4);

    let started = Instant::now();
    let stored = self.store.count_countries().await;
    checks.push(match &stored {
      Ok(_) => HealthCheck::passed("store", true, started.elapsed()),
      Err(e) => HealthCheck::failed("store", true, started.elapsed(), e.to_string()),
    });

    let started = Instant::now();
    let fetched = tokio::time::timeout(per_call, self.countries.fetch_all_countries()).await;
    checks.push(match fetched {
      Ok(Ok(_)) => HealthCheck::passed("country_source", true, started.elapsed()),
      Ok(Err(e)) => HealthCheck::failed("country_source", true, started.elapsed(), e.to_string()),
      Err(_) => {
        HealthCheck::failed("country_source", true, started.elapsed(), format!("timed out after {per_call:?}"))
      }
    });

    let started = Instant::now();
    let quoted = tokio::time::timeout(per_call, self.rate_source.fetch_rate(USD, ILS)).await;
    checks.push(match quoted {
      Ok(Ok(Some(_))) => HealthCheck::passed("rate_source", true, started.elapsed()),
      Ok(Ok(None)) => {
        HealthCheck::failed("rate_source", true, started.elapsed(), format!("no {USD}/{ILS} rate"))
      }
      Ok(Err(e)) => HealthCheck::failed("rate_source", true, started.elapsed(), e.to_string()),
      Err(_) => {
        HealthCheck::failed("rate_source", true, started.elapsed(), format!("timed out after {per_call:?}"))
      }
    });

    checks.push(match stored {
      Ok(n) if n > 0 => HealthCheck::passed("countries_loaded", false, Duration::ZERO),
      Ok(_) => HealthCheck::failed("countries_loaded", false, Duration::ZERO, "no countries stored"),
      Err(_) => HealthCheck::failed("countries_loaded", false, Duration::ZERO, "store unavailable"),
    });

    let report = HealthReport::from_checks(checks);
    for check in report.checks.iter().filter(|c| !c.healthy) {
      warn!(check = check.name, critical = check.critical, error = ?check.error, "health check failed");
    }
    info!(overall = %report.overall, "health checked");
    report
  }
}

/// The job-level error for a batch in which no upstream lookup succeeded and
/// every failure was a transport failure. `None` when at least one code
/// resolved upstream or any failure was specific to its code.
fn outage(batch: &RateBatch) -> Option<Error> {
  if batch.failed.is_empty() || batch.rates.iter().any(|rate| rate.currency_code != ILS) {
    return None;
  }
  let mut last = None;
  for lookup in &batch.failed {
    match &lookup.failure {
      LookupFailure::Transport { attempts, message } => last = Some((lookup.code, *attempts, message)),
      _ => return None,
    }
  }
  last.map(|(code, attempts, message)| Error::Transport {
    attempts,
    message: format!("{code}: {message}"),
  })
}
