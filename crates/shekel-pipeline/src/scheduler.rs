//! Per-job mutual exclusion and the timer loop.
//!
//! Each job has one slot. A trigger, whether from a timer or a manual call,
//! claims the slot with a compare-and-swap and releases it when the run
//! ends, however it ends. A trigger that finds its slot taken is skipped,
//! not queued. The two jobs never block each other.

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use shekel_core::{
  source::{CountrySource, RateSource},
  store::CatalogStore,
};
use tokio::{
  sync::watch,
  task::{JoinError, JoinSet},
  time::Instant,
};
use tracing::{error, info};

use crate::{HealthReport, InitialLoadSummary, JobKind, JobSummary, Pipeline, Result};

// ─── Cadence ─────────────────────────────────────────────────────────────────

/// When a job fires. All times are UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cadence {
  /// Once a week on `weekday` at `at`.
  Weekly { weekday: Weekday, at: NaiveTime },
  /// Every `minutes`, counted from the previous firing.
  Interval { minutes: u32 },
}

impl Cadence {
  /// The first firing strictly after `now`.
  pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
    match *self {
      Self::Interval { minutes } => now + Duration::minutes(i64::from(minutes.max(1))),
      Self::Weekly { weekday, at } => {
        let days_ahead = (7 + weekday.num_days_from_monday() - now.weekday().num_days_from_monday()) % 7;
        let candidate = (now.date_naive() + Duration::days(i64::from(days_ahead)))
          .and_time(at)
          .and_utc();
        if candidate > now { candidate } else { candidate + Duration::days(7) }
      }
    }
  }
}

/// Cadences for both jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
  pub countries: Cadence,
  pub rates:     Cadence,
}

impl Default for Schedule {
  fn default() -> Self {
    Self {
      countries: Cadence::Weekly {
        weekday: Weekday::Sun,
        at:      NaiveTime::from_hms_opt(2, 0, 0).unwrap_or_default(),
      },
      rates: Cadence::Interval { minutes: 360 },
    }
  }
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
  Idle,
  Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
  Idle,
  CountriesRunning,
  RatesRunning,
  BothRunning,
}

/// Result of a trigger: the run happened, or the slot was already taken.
#[derive(Debug)]
pub enum RunOutcome<T = JobSummary> {
  Completed(T),
  Busy,
}

/// Held for the duration of one run; releases the slot on drop, including
/// during unwinding.
struct SlotGuard(Arc<AtomicBool>);

impl SlotGuard {
  fn claim(slot: &Arc<AtomicBool>) -> Option<Self> {
    slot
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(Arc::clone(slot)))
  }
}

impl Drop for SlotGuard {
  fn drop(&mut self) { self.0.store(false, Ordering::Release); }
}

/// Tally of the timer firings one [`Orchestrator::run`] saw through to the
/// end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
  pub completed: usize,
  pub busy:      usize,
  pub failed:    usize,
}

impl LoopStats {
  fn record(&mut self, joined: std::result::Result<Result<RunOutcome>, JoinError>) {
    match joined {
      Ok(Ok(RunOutcome::Completed(_))) => self.completed += 1,
      Ok(Ok(RunOutcome::Busy)) => self.busy += 1,
      Ok(Err(_)) => self.failed += 1,
      Err(e) => {
        error!(error = %e, "job task panicked");
        self.failed += 1;
      }
    }
  }
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

pub struct Orchestrator<S, C, R> {
  pipeline:  Pipeline<S, C, R>,
  countries: Arc<AtomicBool>,
  rates:     Arc<AtomicBool>,
}

impl<S, C, R> Orchestrator<S, C, R>
where
  S: CatalogStore + 'static,
  C: CountrySource + 'static,
  R: RateSource + 'static,
{
  pub fn new(pipeline: Pipeline<S, C, R>) -> Self {
    Self {
      pipeline,
      countries: Arc::new(AtomicBool::new(false)),
      rates: Arc::new(AtomicBool::new(false)),
    }
  }

  fn slot(&self, job: JobKind) -> &Arc<AtomicBool> {
    match job {
      JobKind::Countries => &self.countries,
      JobKind::Rates => &self.rates,
    }
  }

  pub fn job_state(&self, job: JobKind) -> JobState {
    if self.slot(job).load(Ordering::Acquire) { JobState::Running } else { JobState::Idle }
  }

  pub fn state(&self) -> SchedulerState {
    match (self.job_state(JobKind::Countries), self.job_state(JobKind::Rates)) {
      (JobState::Idle, JobState::Idle) => SchedulerState::Idle,
      (JobState::Running, JobState::Idle) => SchedulerState::CountriesRunning,
      (JobState::Idle, JobState::Running) => SchedulerState::RatesRunning,
      (JobState::Running, JobState::Running) => SchedulerState::BothRunning,
    }
  }

  /// Run `job` now unless it is already running.
  pub async fn trigger(&self, job: JobKind) -> Result<RunOutcome> {
    let Some(_guard) = SlotGuard::claim(self.slot(job)) else {
      info!(%job, "job already running; trigger skipped");
      return Ok(RunOutcome::Busy);
    };

    let summary = match job {
      JobKind::Countries => self.pipeline.run_countries_job().await?,
      JobKind::Rates => self.pipeline.run_rates_job().await?,
    };
    Ok(RunOutcome::Completed(summary))
  }

  /// The initial load, holding both slots for its whole duration. Busy if
  /// either job is already running.
  pub async fn initial_load(&self) -> Result<RunOutcome<InitialLoadSummary>> {
    let Some(_countries) = SlotGuard::claim(&self.countries) else {
      info!("countries job running; initial load skipped");
      return Ok(RunOutcome::Busy);
    };
    let Some(_rates) = SlotGuard::claim(&self.rates) else {
      info!("rates job running; initial load skipped");
      return Ok(RunOutcome::Busy);
    };

    Ok(RunOutcome::Completed(self.pipeline.run_initial_load().await?))
  }

  /// Health of the store and both sources. Claims no slot, so it runs
  /// alongside either job.
  pub async fn check_health(&self) -> HealthReport { self.pipeline.check_health().await }

  /// Fire both jobs on their cadences until `shutdown` is set, then wait for
  /// in-flight runs to finish.
  ///
  /// Every firing runs on its own task. A failed run is logged and the loop
  /// carries on.
  pub async fn run(self: Arc<Self>, schedule: Schedule, mut shutdown: watch::Receiver<bool>) -> LoopStats {
    let mut tasks = JoinSet::new();
    let mut stats = LoopStats::default();
    let mut next_countries = schedule.countries.next_after(Utc::now());
    let mut next_rates = schedule.rates.next_after(Utc::now());
    let mut countries_due = deadline(next_countries);
    let mut rates_due = deadline(next_rates);
    info!(%next_countries, %next_rates, "scheduler started");

    loop {
      if *shutdown.borrow_and_update() {
        break;
      }
      tokio::select! {
        () = tokio::time::sleep_until(countries_due) => {
          Self::fire(&self, &mut tasks, JobKind::Countries);
          next_countries = schedule.countries.next_after(Utc::now());
          countries_due = deadline(next_countries);
          info!(job = "countries", next = %next_countries, "next run scheduled");
        }
        () = tokio::time::sleep_until(rates_due) => {
          Self::fire(&self, &mut tasks, JobKind::Rates);
          next_rates = schedule.rates.next_after(Utc::now());
          rates_due = deadline(next_rates);
          info!(job = "rates", next = %next_rates, "next run scheduled");
        }
        Some(joined) = tasks.join_next(), if !tasks.is_empty() => stats.record(joined),
        changed = shutdown.changed() => {
          if changed.is_err() {
            break;
          }
        }
      }
    }

    info!(in_flight = tasks.len(), "scheduler stopping");
    while let Some(joined) = tasks.join_next().await {
      stats.record(joined);
    }
    info!(completed = stats.completed, busy = stats.busy, failed = stats.failed, "scheduler stopped");
    stats
  }

  fn fire(this: &Arc<Self>, tasks: &mut JoinSet<Result<RunOutcome>>, job: JobKind) {
    let this = Arc::clone(this);
    tasks.spawn(async move {
      let outcome = this.trigger(job).await;
      if let Err(e) = &outcome {
        error!(%job, error = %e, "job failed");
      }
      outcome
    });
  }
}

/// The runtime instant matching the wall-clock time `at`. Sleeping on it
/// follows the runtime clock, so a paused test clock drives the loop.
fn deadline(at: DateTime<Utc>) -> Instant {
  Instant::now() + (at - Utc::now()).to_std().unwrap_or_default()
}
