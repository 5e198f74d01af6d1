//! Job and scheduler tests against an in-memory store and in-process fake
//! sources.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
  },
  time::Duration,
};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use shekel_core::{
  CurrencyCode,
  country::{RawCountry, SkipReason},
  rate::LookupFailure,
  source::{CountrySource, RateSource},
  store::CatalogStore,
};
use shekel_store_sqlite::SqliteStore;
use tokio::sync::{Notify, watch};

use crate::{
  Error, HealthStatus, JobKind, JobState, LoopStats, Orchestrator, Pipeline, PipelineOptions,
  RetryPolicy, RunOutcome, Schedule, SchedulerState, scheduler::Cadence,
};

// ─── Fakes ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct FakeError(String);

/// A country source serving a fixed JSON payload.
#[derive(Default)]
pub struct FakeCountries {
  payload:     Mutex<Vec<RawCountry>>,
  gate:        Option<Arc<Notify>>,
  unreachable: AtomicBool,
  calls:       AtomicU32,
}

impl FakeCountries {
  pub fn new(payload: Value) -> Self {
    let fake = Self::default();
    fake.set_payload(payload);
    fake
  }

  pub fn unreachable() -> Self {
    let fake = Self::default();
    fake.unreachable.store(true, Ordering::SeqCst);
    fake
  }

  /// Block every fetch until `gate` is notified.
  pub fn gated(mut self, gate: Arc<Notify>) -> Self {
    self.gate = Some(gate);
    self
  }

  pub fn set_payload(&self, payload: Value) {
    let records = match payload {
      Value::Array(items) => items
        .into_iter()
        .map(|item| serde_json::from_value(item).unwrap_or_default())
        .collect(),
      _ => panic!("fake payload must be an array"),
    };
    *self.payload.lock().unwrap() = records;
  }

  pub fn calls(&self) -> u32 { self.calls.load(Ordering::SeqCst) }
}

impl CountrySource for FakeCountries {
  type Error = FakeError;

  fn name(&self) -> &str { "fake-countries" }

  async fn fetch_all_countries(&self) -> Result<Vec<RawCountry>, FakeError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(gate) = &self.gate {
      gate.notified().await;
    }
    if self.unreachable.load(Ordering::SeqCst) {
      return Err(FakeError("connection refused".into()));
    }
    Ok(self.payload.lock().unwrap().clone())
  }
}

/// A rate source with a fixed table. Unknown codes are "not found".
#[derive(Default)]
pub struct FakeRates {
  table:     BTreeMap<CurrencyCode, Decimal>,
  failing:   BTreeSet<CurrencyCode>,
  latency:   Duration,
  gate:      Option<Arc<Notify>>,
  calls:     Mutex<BTreeMap<CurrencyCode, u32>>,
  in_flight: AtomicUsize,
  peak:      AtomicUsize,
}

impl FakeRates {
  pub fn with_rate(mut self, c: &str, rate: &str) -> Self {
    self.table.insert(code(c), rate.parse().unwrap());
    self
  }

  /// Every call for `c` fails at the transport level.
  pub fn failing(mut self, c: &str) -> Self {
    self.failing.insert(code(c));
    self
  }

  pub fn with_latency(mut self, millis: u64) -> Self {
    self.latency = Duration::from_millis(millis);
    self
  }

  /// Hold every fetch, after it is counted, until `gate` is notified.
  pub fn gated(mut self, gate: Arc<Notify>) -> Self {
    self.gate = Some(gate);
    self
  }

  pub fn calls(&self, c: &str) -> u32 {
    self.calls.lock().unwrap().get(&code(c)).copied().unwrap_or_default()
  }

  pub fn total_calls(&self) -> u32 { self.calls.lock().unwrap().values().sum() }

  pub fn peak_in_flight(&self) -> usize { self.peak.load(Ordering::SeqCst) }
}

impl RateSource for FakeRates {
  type Error = FakeError;

  fn name(&self) -> &str { "fake-rates" }

  async fn fetch_rate(&self, base: CurrencyCode, quote: CurrencyCode) -> Result<Option<Decimal>, FakeError> {
    assert_eq!(quote, shekel_core::ILS);
    *self.calls.lock().unwrap().entry(base).or_default() += 1;
    if let Some(gate) = &self.gate {
      gate.notified().await;
    }

    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);
    if !self.latency.is_zero() {
      tokio::time::sleep(self.latency).await;
    }
    self.in_flight.fetch_sub(1, Ordering::SeqCst);

    if self.failing.contains(&base) {
      return Err(FakeError(format!("{base}: 503 service unavailable")));
    }
    Ok(self.table.get(&base).copied())
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

pub fn code(s: &str) -> CurrencyCode { CurrencyCode::parse(s).unwrap() }

pub fn today() -> NaiveDate { Utc::now().date_naive() }

pub fn fast_retry() -> RetryPolicy {
  RetryPolicy {
    max_attempts: 3,
    base_delay:   Duration::from_millis(1),
    max_delay:    Duration::from_millis(4),
    call_timeout: Duration::from_secs(2),
  }
}

struct Harness {
  pipeline:  Pipeline<SqliteStore, FakeCountries, FakeRates>,
  store:     Arc<SqliteStore>,
  countries: Arc<FakeCountries>,
  rates:     Arc<FakeRates>,
  shutdown:  watch::Sender<bool>,
}

async fn harness(countries: FakeCountries, rates: FakeRates) -> Harness {
  harness_with(countries, rates, fast_retry()).await
}

async fn harness_with(countries: FakeCountries, rates: FakeRates, retry: RetryPolicy) -> Harness {
  let store = Arc::new(SqliteStore::open_in_memory().await.expect("in-memory store"));
  let countries = Arc::new(countries);
  let rates = Arc::new(rates);
  let (shutdown, rx) = watch::channel(false);
  let options = PipelineOptions { retry, rate_concurrency: 4 };

  Harness {
    pipeline: Pipeline::new(
      Arc::clone(&store),
      Arc::clone(&countries),
      Arc::clone(&rates),
      options,
      rx,
    ),
    store,
    countries,
    rates,
    shutdown,
  }
}

fn catalog() -> Value {
  json!([
    {"name": {"common": "France"}, "capital": ["Paris"], "continents": ["Europe"],
     "currencies": {"EUR": {"name": "Euro"}}, "unMember": true, "population": 67391582,
     "timezones": ["UTC-10:00", "UTC+01:00"]},
    {"name": {"common": "Germany"}, "capital": ["Berlin"], "continents": ["Europe"],
     "currencies": {"EUR": {"name": "Euro"}}, "unMember": true, "population": 83240525,
     "timezones": ["UTC+01:00"]},
    {"name": {"common": "United States"}, "capital": ["Washington, D.C."],
     "continents": ["North America"], "currencies": {"USD": {}}, "unMember": true,
     "population": 329484123, "timezones": ["UTC-05:00"]}
  ])
}

// ─── Countries job ───────────────────────────────────────────────────────────

#[tokio::test]
async fn countries_job_is_idempotent() {
  let h = harness(FakeCountries::new(catalog()), FakeRates::default()).await;

  let first = h.pipeline.run_countries_job().await.unwrap();
  assert_eq!((first.fetched, first.inserted, first.updated), (3, 3, 0));

  let second = h.pipeline.run_countries_job().await.unwrap();
  assert_eq!((second.inserted, second.updated), (0, 3));
  assert_eq!(h.store.count_countries().await.unwrap(), 3);
}

#[tokio::test]
async fn countries_job_reports_skipped_records() {
  let payload = json!([
    {"name": {"common": "Testland"}, "currencies": {"USD": {}}, "population": 0},
    {"capital": ["Nowhere"]},
    {"name": {"common": "testland"}}
  ]);
  let h = harness(FakeCountries::new(payload), FakeRates::default()).await;

  let summary = h.pipeline.run_countries_job().await.unwrap();

  assert_eq!(summary.inserted, 1);
  assert_eq!(summary.skipped.len(), 2);
  assert_eq!(summary.skipped[0].reason, SkipReason::MissingName);
  assert!(matches!(summary.skipped[1].reason, SkipReason::DuplicateName { .. }));

  let stored = h.store.get_country("Testland").await.unwrap().unwrap();
  assert_eq!(stored.country.population, 0);
  assert_eq!(stored.country.currencies, BTreeSet::from([code("USD")]));
}

#[tokio::test]
async fn empty_catalog_is_a_successful_run() {
  let h = harness(FakeCountries::new(json!([])), FakeRates::default()).await;
  let summary = h.pipeline.run_countries_job().await.unwrap();
  assert_eq!((summary.fetched, summary.inserted), (0, 0));
}

#[tokio::test]
async fn unreachable_country_source_is_a_hard_failure() {
  let h = harness(FakeCountries::unreachable(), FakeRates::default()).await;

  let err = h.pipeline.run_countries_job().await.unwrap_err();

  assert!(matches!(err, Error::Transport { attempts: 3, .. }));
  assert_eq!(h.countries.calls(), 3);
  assert_eq!(h.store.count_countries().await.unwrap(), 0);
}

#[tokio::test]
async fn vanished_countries_are_left_in_place() {
  let h = harness(FakeCountries::new(catalog()), FakeRates::default()).await;
  h.pipeline.run_countries_job().await.unwrap();

  h.countries.set_payload(json!([{"name": {"common": "France"}}]));
  let summary = h.pipeline.run_countries_job().await.unwrap();

  assert_eq!(summary.updated, 1);
  assert_eq!(h.store.count_countries().await.unwrap(), 3);
}

// ─── Rates job ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn rates_job_without_countries_fetches_nothing() {
  let h = harness(FakeCountries::default(), FakeRates::default().with_rate("USD", "3.7")).await;

  let summary = h.pipeline.run_rates_job().await.unwrap();

  assert_eq!((summary.fetched, summary.inserted), (0, 0));
  assert_eq!(h.rates.total_calls(), 0);
}

#[tokio::test]
async fn shared_currency_is_fetched_once_and_stored_once() {
  let rates = FakeRates::default().with_rate("EUR", "4.02").with_rate("USD", "3.71");
  let h = harness(FakeCountries::new(catalog()), rates).await;
  h.pipeline.run_countries_job().await.unwrap();

  let summary = h.pipeline.run_rates_job().await.unwrap();

  assert_eq!(summary.fetched, 2);
  assert_eq!(summary.inserted, 2);
  assert_eq!(h.rates.calls("EUR"), 1);

  let date = summary.rate_date.unwrap();
  let stored = h.store.rates_on(date).await.unwrap();
  assert_eq!(stored.len(), 2);
  let eur = &stored[0].rate;
  assert_eq!(eur.currency_code, code("EUR"));
  assert_eq!(eur.shekel_rate, "4.02".parse::<Decimal>().unwrap());
  assert_eq!(
    eur.country_names,
    BTreeSet::from(["France".to_string(), "Germany".to_string()])
  );
}

#[tokio::test]
async fn failed_lookup_does_not_block_other_rates() {
  let payload = json!([
    {"name": "Eurozone", "currencies": {"EUR": {}}},
    {"name": "Britain", "currencies": {"GBP": {}}},
    {"name": "America", "currencies": {"USD": {}}}
  ]);
  let rates = FakeRates::default()
    .with_rate("EUR", "4.0")
    .failing("GBP")
    .with_rate("USD", "3.7");
  let h = harness(FakeCountries::new(payload), rates).await;
  h.pipeline.run_countries_job().await.unwrap();

  let summary = h.pipeline.run_rates_job().await.unwrap();

  assert_eq!(summary.inserted, 2);
  assert_eq!(summary.failed_lookups.len(), 1);
  assert_eq!(summary.failed_lookups[0].code, code("GBP"));
  assert_eq!(h.store.count_rates().await.unwrap(), 2);
}

#[tokio::test]
async fn unreachable_rate_source_fails_the_rates_job() {
  let rates = FakeRates::default().failing("EUR").failing("USD");
  let h = harness(FakeCountries::new(catalog()), rates).await;
  h.pipeline.run_countries_job().await.unwrap();

  let err = h.pipeline.run_rates_job().await.unwrap_err();

  assert!(matches!(err, Error::Transport { attempts: 3, .. }), "{err:?}");
  assert_eq!((h.rates.calls("EUR"), h.rates.calls("USD")), (3, 3));
  assert_eq!(h.store.count_rates().await.unwrap(), 0);
}

#[tokio::test]
async fn rates_job_with_only_unknown_currencies_still_succeeds() {
  let payload = json!([{"name": "Zimbabwe", "currencies": {"ZWL": {}}}]);
  let h = harness(FakeCountries::new(payload), FakeRates::default()).await;
  h.pipeline.run_countries_job().await.unwrap();

  let summary = h.pipeline.run_rates_job().await.unwrap();

  assert_eq!(summary.inserted, 0);
  assert_eq!(summary.failed_lookups[0].failure, LookupFailure::NotFound);
}

#[tokio::test]
async fn rates_job_rerun_updates_same_day_rows() {
  let rates = FakeRates::default().with_rate("EUR", "4.0").with_rate("USD", "3.7");
  let h = harness(FakeCountries::new(catalog()), rates).await;
  h.pipeline.run_countries_job().await.unwrap();

  h.pipeline.run_rates_job().await.unwrap();
  let second = h.pipeline.run_rates_job().await.unwrap();

  assert_eq!((second.inserted, second.updated), (0, 2));
  assert_eq!(h.store.count_rates().await.unwrap(), 2);
}

#[tokio::test]
async fn unknown_currency_is_reported_not_fatal() {
  let payload = json!([{"name": "Zimbabwe", "currencies": {"ZWL": {}, "USD": {}}}]);
  let h = harness(FakeCountries::new(payload), FakeRates::default().with_rate("USD", "3.7")).await;
  h.pipeline.run_countries_job().await.unwrap();

  let summary = h.pipeline.run_rates_job().await.unwrap();

  assert_eq!(summary.inserted, 1);
  assert_eq!(summary.failed_lookups[0].failure, LookupFailure::NotFound);
}

// ─── Initial load ────────────────────────────────────────────────────────────

#[tokio::test]
async fn initial_load_runs_countries_then_rates() {
  let rates = FakeRates::default().with_rate("EUR", "4.0").with_rate("USD", "3.7");
  let h = harness(FakeCountries::new(catalog()), rates).await;

  let summary = h.pipeline.run_initial_load().await.unwrap();

  assert_eq!(summary.countries.inserted, 3);
  assert_eq!(summary.rates.inserted, 2);
}

#[tokio::test]
async fn initial_load_stops_when_countries_fail() {
  let h = harness(FakeCountries::unreachable(), FakeRates::default().with_rate("USD", "3.7")).await;

  assert!(h.pipeline.run_initial_load().await.is_err());
  assert_eq!(h.rates.total_calls(), 0);
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

#[tokio::test]
async fn busy_job_trigger_is_skipped() {
  let gate = Arc::new(Notify::new());
  let h = harness(FakeCountries::new(catalog()).gated(Arc::clone(&gate)), FakeRates::default()).await;
  let orch = Arc::new(Orchestrator::new(h.pipeline));

  let first = tokio::spawn({
    let orch = Arc::clone(&orch);
    async move { orch.trigger(JobKind::Countries).await }
  });
  while orch.state() != SchedulerState::CountriesRunning {
    tokio::task::yield_now().await;
  }

  assert!(matches!(orch.trigger(JobKind::Countries).await.unwrap(), RunOutcome::Busy));
  assert!(matches!(orch.initial_load().await.unwrap(), RunOutcome::Busy));

  // The other job is not blocked.
  assert!(matches!(orch.trigger(JobKind::Rates).await.unwrap(), RunOutcome::Completed(_)));

  gate.notify_one();
  assert!(matches!(first.await.unwrap().unwrap(), RunOutcome::Completed(_)));
  assert_eq!(orch.state(), SchedulerState::Idle);
  assert_eq!(h.countries.calls(), 1);
}

#[tokio::test]
async fn failed_run_releases_its_slot() {
  let h = harness(FakeCountries::unreachable(), FakeRates::default()).await;
  let orch = Orchestrator::new(h.pipeline);

  assert!(orch.trigger(JobKind::Countries).await.is_err());
  assert_eq!(orch.state(), SchedulerState::Idle);
  assert!(orch.trigger(JobKind::Countries).await.is_err());
  assert_eq!(h.countries.calls(), 6);
}

#[tokio::test]
async fn scheduler_loop_exits_on_shutdown() {
  let h = harness(FakeCountries::new(catalog()), FakeRates::default()).await;
  let rx = h.shutdown.subscribe();
  let orch = Arc::new(Orchestrator::new(h.pipeline));
  let schedule = Schedule {
    countries: Cadence::Interval { minutes: 60 },
    rates:     Cadence::Interval { minutes: 60 },
  };

  let handle = tokio::spawn(Arc::clone(&orch).run(schedule, rx));
  h.shutdown.send(true).unwrap();

  tokio::time::timeout(Duration::from_secs(5), handle)
    .await
    .expect("scheduler stops promptly")
    .unwrap();
  assert_eq!(h.countries.calls(), 0);
}

fn hourly_rates() -> Schedule {
  Schedule {
    countries: Cadence::Interval { minutes: 7 * 24 * 60 },
    rates:     Cadence::Interval { minutes: 60 },
  }
}

#[tokio::test(start_paused = true)]
async fn interval_firing_runs_the_rates_job() {
  let rates = FakeRates::default().with_rate("EUR", "4.0").with_rate("USD", "3.7");
  let h = harness(FakeCountries::new(catalog()), rates).await;
  h.pipeline.run_countries_job().await.unwrap();
  let orch = Arc::new(Orchestrator::new(h.pipeline));

  let (stop, stop_rx) = watch::channel(false);
  let handle = tokio::spawn(Arc::clone(&orch).run(hourly_rates(), stop_rx));
  tokio::time::sleep(Duration::from_secs(61 * 60)).await;
  stop.send(true).unwrap();
  let stats = handle.await.unwrap();

  assert_eq!(stats, LoopStats { completed: 1, busy: 0, failed: 0 });
  assert_eq!((h.rates.calls("EUR"), h.rates.calls("USD")), (1, 1));
  assert_eq!(h.countries.calls(), 1);
  assert_eq!(h.store.count_rates().await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn firing_while_rates_job_runs_is_skipped() {
  let gate = Arc::new(Notify::new());
  let payload = json!([{"name": "America", "currencies": {"USD": {}}}]);
  let rates = FakeRates::default().with_rate("USD", "3.7").gated(Arc::clone(&gate));
  let retry = RetryPolicy { call_timeout: Duration::from_secs(24 * 60 * 60), ..fast_retry() };
  let h = harness_with(FakeCountries::new(payload), rates, retry).await;
  h.pipeline.run_countries_job().await.unwrap();
  let orch = Arc::new(Orchestrator::new(h.pipeline));

  let manual = tokio::spawn({
    let orch = Arc::clone(&orch);
    async move { orch.trigger(JobKind::Rates).await }
  });
  // Parked on the gate inside the fetch.
  while h.rates.calls("USD") == 0 {
    tokio::task::yield_now().await;
  }
  assert_eq!(orch.job_state(JobKind::Rates), JobState::Running);
  assert!(matches!(orch.trigger(JobKind::Rates).await.unwrap(), RunOutcome::Busy));
  assert_eq!(orch.state(), SchedulerState::RatesRunning);

  let (stop, stop_rx) = watch::channel(false);
  let handle = tokio::spawn(Arc::clone(&orch).run(hourly_rates(), stop_rx));
  tokio::time::sleep(Duration::from_secs(61 * 60)).await;
  assert_eq!(h.rates.calls("USD"), 1);

  stop.send(true).unwrap();
  let stats = handle.await.unwrap();
  assert_eq!(stats, LoopStats { completed: 0, busy: 1, failed: 0 });

  gate.notify_one();
  assert!(matches!(manual.await.unwrap().unwrap(), RunOutcome::Completed(_)));
  assert_eq!(h.rates.calls("USD"), 1);
  assert_eq!(orch.state(), SchedulerState::Idle);
}

// ─── Health ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unreachable_sources_are_unhealthy() {
  let h = harness(FakeCountries::unreachable(), FakeRates::default().failing("USD")).await;

  let report = h.pipeline.check_health().await;

  assert_eq!(report.overall, HealthStatus::Unhealthy);
  let failed: Vec<_> = report.checks.iter().filter(|c| !c.healthy).map(|c| c.name).collect();
  assert_eq!(failed, ["country_source", "rate_source", "countries_loaded"]);
  // A health check makes one attempt per source.
  assert_eq!((h.countries.calls(), h.rates.calls("USD")), (1, 1));
}

#[tokio::test]
async fn empty_store_is_degraded() {
  let h = harness(FakeCountries::new(catalog()), FakeRates::default().with_rate("USD", "3.7")).await;

  let report = h.pipeline.check_health().await;

  assert_eq!(report.overall, HealthStatus::Degraded);
  assert!(!report.is_unhealthy());
}

#[tokio::test]
async fn loaded_store_with_reachable_sources_is_healthy() {
  let h = harness(FakeCountries::new(catalog()), FakeRates::default().with_rate("USD", "3.7")).await;
  let orch = Orchestrator::new(h.pipeline);
  orch.trigger(JobKind::Countries).await.unwrap();

  let report = orch.check_health().await;

  assert_eq!(report.overall, HealthStatus::Healthy);
  assert_eq!(report.checks.len(), 4);
}
