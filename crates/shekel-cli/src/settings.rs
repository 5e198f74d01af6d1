//! Runtime configuration.
//!
//! Layered from an optional TOML file and `SHEKEL_*` environment variables,
//! e.g. `SHEKEL_STORE_PATH` or `SHEKEL_RETRY__MAX_ATTEMPTS`.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::Context as _;
use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use serde::Deserialize;
use shekel_core::Error;
use shekel_pipeline::{Cadence, PipelineOptions, RetryPolicy, Schedule};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  /// SQLite database file. Required.
  #[serde(default)]
  pub store_path: PathBuf,
  #[serde(default)]
  pub sources:    SourceSettings,
  #[serde(default)]
  pub http:       HttpSettings,
  #[serde(default)]
  pub retry:      RetrySettings,
  #[serde(default)]
  pub rates:      RateSettings,
  #[serde(default)]
  pub schedule:   Schedule,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
  pub countries_url: String,
  pub rates_url:     String,
}

impl Default for SourceSettings {
  fn default() -> Self {
    Self {
      countries_url: shekel_sources::rest_countries::DEFAULT_URL.into(),
      rates_url:     shekel_sources::frankfurter::DEFAULT_BASE_URL.into(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
  pub timeout_secs: u64,
}

impl Default for HttpSettings {
  fn default() -> Self { Self { timeout_secs: 30 } }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
  pub max_attempts:  u32,
  pub base_delay_ms: u64,
  pub max_delay_ms:  u64,
}

impl Default for RetrySettings {
  fn default() -> Self { Self { max_attempts: 3, base_delay_ms: 1_000, max_delay_ms: 60_000 } }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateSettings {
  /// Maximum concurrent rate lookups.
  pub concurrency: usize,
}

impl Default for RateSettings {
  fn default() -> Self { Self { concurrency: 4 } }
}

impl Settings {
  /// Read `path` (if it exists) and the environment, then validate.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let builder = Config::builder()
      .add_source(File::from(path).required(false))
      .add_source(
        Environment::with_prefix("SHEKEL")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      );
    Self::from_builder(builder)
  }

  fn from_builder(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<Self> {
    let mut settings: Self = builder
      .build()
      .context("failed to read configuration")?
      .try_deserialize()
      .context("failed to deserialise settings")?;

    settings.store_path = expand_tilde(&settings.store_path);
    settings.validate()?;
    Ok(settings)
  }

  pub fn validate(&self) -> shekel_core::Result<()> {
    let invalid = |msg: &str| Err(Error::Configuration(msg.into()));

    if self.store_path.as_os_str().is_empty() {
      return invalid("store_path is required");
    }
    if self.http.timeout_secs == 0 {
      return invalid("http.timeout_secs must be at least 1");
    }
    if self.retry.max_attempts == 0 {
      return invalid("retry.max_attempts must be at least 1");
    }
    if self.retry.base_delay_ms > self.retry.max_delay_ms {
      return invalid("retry.base_delay_ms must not exceed retry.max_delay_ms");
    }
    if self.rates.concurrency == 0 {
      return invalid("rates.concurrency must be at least 1");
    }
    for (job, cadence) in [("countries", self.schedule.countries), ("rates", self.schedule.rates)] {
      if let Cadence::Interval { minutes: 0 } = cadence {
        return Err(Error::Configuration(format!("schedule.{job}.minutes must be at least 1")));
      }
    }
    Ok(())
  }

  pub fn timeout(&self) -> Duration { Duration::from_secs(self.http.timeout_secs) }

  pub fn pipeline_options(&self) -> PipelineOptions {
    PipelineOptions {
      retry:            RetryPolicy {
        max_attempts: self.retry.max_attempts,
        base_delay:   Duration::from_millis(self.retry.base_delay_ms),
        max_delay:    Duration::from_millis(self.retry.max_delay_ms),
        call_timeout: self.timeout(),
      },
      rate_concurrency: self.rates.concurrency,
    }
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use chrono::{NaiveTime, Weekday};
  use config::FileFormat;

  use super::*;

  fn from_toml(toml: &str) -> anyhow::Result<Settings> {
    Settings::from_builder(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
  }

  #[test]
  fn defaults_fill_everything_but_the_store() {
    let settings = from_toml(r#"store_path = "/var/lib/shekel/catalog.db""#).unwrap();

    assert_eq!(settings.http.timeout_secs, 30);
    assert_eq!(settings.retry.max_attempts, 3);
    assert_eq!(settings.rates.concurrency, 4);
    assert_eq!(settings.sources.rates_url, "https://api.frankfurter.app");
    assert_eq!(settings.schedule, Schedule::default());

    let options = settings.pipeline_options();
    assert_eq!(options.retry.base_delay, Duration::from_secs(1));
    assert_eq!(options.retry.max_delay, Duration::from_secs(60));
    assert_eq!(options.retry.call_timeout, Duration::from_secs(30));
  }

  #[test]
  fn missing_store_path_is_rejected() {
    let err = from_toml("").unwrap_err();
    assert!(format!("{err:#}").contains("store_path is required"));
  }

  #[test]
  fn zero_attempts_is_rejected() {
    let err = from_toml(
      r#"
      store_path = "catalog.db"
      [retry]
      max_attempts = 0
      "#,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("max_attempts"));
  }

  #[test]
  fn cadences_are_configurable() {
    let settings = from_toml(
      r#"
      store_path = "catalog.db"

      [schedule.countries]
      kind = "weekly"
      weekday = "Mon"
      at = "06:30:00"

      [schedule.rates]
      kind = "interval"
      minutes = 60
      "#,
    )
    .unwrap();

    assert_eq!(
      settings.schedule.countries,
      Cadence::Weekly {
        weekday: Weekday::Mon,
        at:      NaiveTime::from_hms_opt(6, 30, 0).unwrap(),
      }
    );
    assert_eq!(settings.schedule.rates, Cadence::Interval { minutes: 60 });
  }

  #[test]
  fn zero_interval_is_rejected() {
    let err = from_toml(
      r#"
      store_path = "catalog.db"
      [schedule.rates]
      kind = "interval"
      minutes = 0
      "#,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("schedule.rates.minutes"));
  }

  #[test]
  fn tilde_expands_to_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(expand_tilde(Path::new("~/shekel.db")), PathBuf::from(home).join("shekel.db"));
    assert_eq!(expand_tilde(Path::new("/abs/shekel.db")), PathBuf::from("/abs/shekel.db"));
  }
}
