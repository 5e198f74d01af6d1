//! `shekel`: load the country catalog and shekel exchange rates into SQLite.
//!
//! # Usage
//!
//! ```
//! shekel setup                      # countries, then rates
//! shekel rates --json
//! shekel --config /etc/shekel.toml schedule --initial-load
//! shekel health                     # non-zero exit when unhealthy
//! ```

mod settings;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use settings::Settings;
use shekel_core::store::CatalogStore as _;
use shekel_pipeline::{
  HealthReport, InitialLoadSummary, JobKind, JobSummary, Orchestrator, Pipeline, RunOutcome,
};
use shekel_sources::{FrankfurterClient, RestCountriesClient};
use shekel_store_sqlite::SqliteStore;
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "shekel", author, version, about = "Country catalog and ILS exchange-rate loader")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, value_name = "FILE", default_value = "shekel.toml")]
  config: PathBuf,

  /// Default log level; `RUST_LOG` directives take precedence.
  #[arg(long, value_name = "LEVEL", default_value_t = LevelFilter::INFO)]
  log_level: LevelFilter,

  /// Print summaries as JSON.
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch the country catalog and upsert it.
  Countries,
  /// Resolve today's rate for every currency used by a stored country.
  Rates,
  /// Initial load: the countries job, then the rates job.
  Setup,
  /// Run both jobs on their schedules until interrupted.
  Schedule {
    /// Run the initial load before the first scheduled firing.
    #[arg(long)]
    initial_load: bool,
  },
  /// Show stored row counts.
  Status,
  /// Check the store and both sources; exits non-zero when unhealthy.
  Health,
}

#[derive(Serialize)]
struct Status {
  countries:   u64,
  rates:       u64,
  rates_today: usize,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(cli.log_level.into())
        .from_env_lossy(),
    )
    .init();

  let settings = Settings::load(&cli.config)?;

  let store = SqliteStore::open(&settings.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.store_path))?;
  let store = Arc::new(store);

  let countries = RestCountriesClient::new(settings.sources.countries_url.clone(), settings.timeout())
    .context("failed to build country source")?;
  let rates = FrankfurterClient::new(settings.sources.rates_url.clone(), settings.timeout())
    .context("failed to build rate source")?;

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::info!("shutdown requested");
      let _ = shutdown_tx.send(true);
    }
  });

  let pipeline = Pipeline::new(
    Arc::clone(&store),
    Arc::new(countries),
    Arc::new(rates),
    settings.pipeline_options(),
    shutdown_rx.clone(),
  );
  let orchestrator = Arc::new(Orchestrator::new(pipeline));

  match cli.command {
    Command::Countries => {
      let outcome = orchestrator
        .trigger(JobKind::Countries)
        .await
        .context("countries job failed")?;
      report_job(outcome, cli.json)
    }
    Command::Rates => {
      let outcome = orchestrator
        .trigger(JobKind::Rates)
        .await
        .context("rates job failed")?;
      report_job(outcome, cli.json)
    }
    Command::Setup => {
      let outcome = orchestrator.initial_load().await.context("initial load failed")?;
      report_initial_load(outcome, cli.json)
    }
    Command::Schedule { initial_load } => {
      if initial_load {
        // In scheduler mode a failed run is logged, never fatal.
        match orchestrator.initial_load().await {
          Ok(outcome) => report_initial_load(outcome, cli.json)?,
          Err(e) => tracing::error!(error = %e, "initial load failed"),
        }
      }
      orchestrator.run(settings.schedule, shutdown_rx).await;
      Ok(())
    }
    Command::Status => status(&store, cli.json).await,
    Command::Health => health(orchestrator.check_health().await, cli.json),
  }
}

// ─── Output ───────────────────────────────────────────────────────────────────

async fn status(store: &SqliteStore, json: bool) -> Result<()> {
  let today = Utc::now().date_naive();
  let status = Status {
    countries:   store.count_countries().await.context("failed to count countries")?,
    rates:       store.count_rates().await.context("failed to count rates")?,
    rates_today: store.rates_on(today).await.context("failed to read rates")?.len(),
  };

  if json {
    println!("{}", serde_json::to_string_pretty(&status)?);
  } else {
    println!("countries:    {}", status.countries);
    println!("rates:        {}", status.rates);
    println!("rates ({today}): {}", status.rates_today);
  }
  Ok(())
}

fn health(report: HealthReport, json: bool) -> Result<()> {
  if json {
    println!("{}", serde_json::to_string_pretty(&report)?);
  } else {
    println!("overall: {}", report.overall);
    for check in &report.checks {
      let state = if check.healthy { "ok" } else { "FAILED" };
      let kind = if check.critical { "critical" } else { "optional" };
      print!("  {:<18} {state:<6} {kind:<8} {}ms", check.name, check.duration_ms);
      match &check.error {
        Some(error) => println!("  {error}"),
        None => println!(),
      }
    }
  }
  if report.is_unhealthy() {
    bail!("health check failed: {}", report.overall);
  }
  Ok(())
}

fn report_job(outcome: RunOutcome, json: bool) -> Result<()> {
  let RunOutcome::Completed(summary) = outcome else {
    println!("job already running; skipped");
    return Ok(());
  };
  if json {
    println!("{}", serde_json::to_string_pretty(&summary)?);
  } else {
    print_summary(&summary);
  }
  Ok(())
}

fn report_initial_load(outcome: RunOutcome<InitialLoadSummary>, json: bool) -> Result<()> {
  let RunOutcome::Completed(summary) = outcome else {
    println!("a job is already running; initial load skipped");
    return Ok(());
  };
  if json {
    println!("{}", serde_json::to_string_pretty(&summary)?);
  } else {
    print_summary(&summary.countries);
    print_summary(&summary.rates);
  }
  Ok(())
}

fn print_summary(summary: &JobSummary) {
  println!(
    "{}: fetched {}, inserted {}, updated {}, skipped {}, failed {}",
    summary.job,
    summary.fetched,
    summary.inserted,
    summary.updated,
    summary.skipped.len(),
    summary.failed(),
  );
  for row in &summary.failed_rows {
    println!("  row {}: {}", row.key, row.reason);
  }
  for lookup in &summary.failed_lookups {
    println!("  {}: {:?}", lookup.code, lookup.failure);
  }
}
