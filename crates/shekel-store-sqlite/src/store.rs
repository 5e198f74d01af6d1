//! [`SqliteStore`], the SQLite implementation of [`CatalogStore`].

use std::{
  collections::{BTreeMap, BTreeSet},
  path::Path,
};

use chrono::{NaiveDate, Utc};
use rusqlite::OptionalExtension as _;
use shekel_core::{
  CurrencyCode,
  country::{Country, StoredCountry, natural_key},
  rate::{CurrencyRate, StoredRate},
  store::{CatalogStore, RowFailure, UpsertSummary},
};

use crate::{
  Result,
  encode::{CountryRow, RateRow, decode_json, encode_date, encode_dt, rate_key},
  schema::SCHEMA,
};

const COUNTRY_COLUMNS: &str = "name_key, name, capitals, continent, currencies, is_un_member,
   population, timezone_info, created_at, updated_at";

const RATE_COLUMNS: &str =
  "currency_code, rate_date, shekel_rate, country_names, created_at, updated_at";

/// Outcome of one row inside a batch transaction: `Ok(true)` for an insert,
/// `Ok(false)` for an update, `Err` with the database message otherwise.
type RowOutcome = (String, std::result::Result<bool, String>);

// ─── Store ───────────────────────────────────────────────────────────────────

/// A catalog store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mainly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Row writers ─────────────────────────────────────────────────────────────
//
// Each writer runs inside a per-row savepoint and reports whether the row was
// new. Only the mutable columns and `updated_at` are touched on conflict.

fn upsert_country_row(
  conn: &rusqlite::Connection,
  row: &CountryRow,
  now: &str,
) -> rusqlite::Result<bool> {
  let existed = conn
    .query_row(
      "SELECT 1 FROM countries WHERE name_key = ?1",
      rusqlite::params![row.name_key],
      |_| Ok(()),
    )
    .optional()?
    .is_some();

  conn.execute(
    "INSERT INTO countries (
       name_key, name, capitals, continent, currencies, is_un_member,
       population, timezone_info, created_at, updated_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
     ON CONFLICT (name_key) DO UPDATE SET
       name          = excluded.name,
       capitals      = excluded.capitals,
       continent     = excluded.continent,
       currencies    = excluded.currencies,
       is_un_member  = excluded.is_un_member,
       population    = excluded.population,
       timezone_info = excluded.timezone_info,
       updated_at    = excluded.updated_at",
    rusqlite::params![
      row.name_key,
      row.name,
      row.capitals,
      row.continent,
      row.currencies,
      row.is_un_member,
      row.population,
      row.timezone_info,
      now,
    ],
  )?;

  Ok(!existed)
}

fn upsert_rate_row(conn: &rusqlite::Connection, row: &RateRow, now: &str) -> rusqlite::Result<bool> {
  let existed = conn
    .query_row(
      "SELECT 1 FROM currency_rates WHERE currency_code = ?1 AND rate_date = ?2",
      rusqlite::params![row.currency_code, row.rate_date],
      |_| Ok(()),
    )
    .optional()?
    .is_some();

  conn.execute(
    "INSERT INTO currency_rates (
       currency_code, rate_date, shekel_rate, country_names, created_at, updated_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)
     ON CONFLICT (currency_code, rate_date) DO UPDATE SET
       shekel_rate   = excluded.shekel_rate,
       country_names = excluded.country_names,
       updated_at    = excluded.updated_at",
    rusqlite::params![row.currency_code, row.rate_date, row.shekel_rate, row.country_names, now],
  )?;

  Ok(!existed)
}

/// Fold per-row outcomes into a summary.
fn tally(summary: &mut UpsertSummary, outcomes: Vec<RowOutcome>) {
  for (key, outcome) in outcomes {
    match outcome {
      Ok(true) => summary.inserted += 1,
      Ok(false) => summary.updated += 1,
      Err(reason) => summary.failed.push(RowFailure { key, reason }),
    }
  }
}

fn read_country(row: &rusqlite::Row<'_>) -> rusqlite::Result<(CountryRow, String, String)> {
  Ok((
    CountryRow {
      name_key:      row.get(0)?,
      name:          row.get(1)?,
      capitals:      row.get(2)?,
      continent:     row.get(3)?,
      currencies:    row.get(4)?,
      is_un_member:  row.get(5)?,
      population:    row.get(6)?,
      timezone_info: row.get(7)?,
    },
    row.get(8)?,
    row.get(9)?,
  ))
}

fn read_rate(row: &rusqlite::Row<'_>) -> rusqlite::Result<(RateRow, String, String)> {
  Ok((
    RateRow {
      currency_code: row.get(0)?,
      rate_date:     row.get(1)?,
      shekel_rate:   row.get(2)?,
      country_names: row.get(3)?,
    },
    row.get(4)?,
    row.get(5)?,
  ))
}

// ─── CatalogStore impl ───────────────────────────────────────────────────────

impl CatalogStore for SqliteStore {
  type Error = crate::Error;

  // ── Writes ────────────────────────────────────────────────────────────────

  async fn upsert_countries(&self, countries: Vec<Country>) -> Result<UpsertSummary> {
    let mut summary = UpsertSummary::default();
    let mut rows = Vec::with_capacity(countries.len());
    for country in &countries {
      match CountryRow::encode(country) {
        Ok(row) => rows.push(row),
        Err(e) => summary.failed.push(RowFailure {
          key:    country.key(),
          reason: e.to_string(),
        }),
      }
    }

    let now = encode_dt(Utc::now());
    let outcomes: Vec<RowOutcome> = self
      .conn
      .call(move |conn| {
        let mut tx = conn.transaction()?;
        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
          // Dropping an uncommitted savepoint rolls back just this row.
          let sp = tx.savepoint()?;
          match upsert_country_row(&sp, &row, &now) {
            Ok(inserted) => {
              sp.commit()?;
              outcomes.push((row.name_key, Ok(inserted)));
            }
            Err(e) => outcomes.push((row.name_key, Err(e.to_string()))),
          }
        }
        tx.commit()?;
        Ok(outcomes)
      })
      .await?;

    tally(&mut summary, outcomes);
    Ok(summary)
  }

  async fn upsert_rates(&self, rates: Vec<CurrencyRate>) -> Result<UpsertSummary> {
    let mut summary = UpsertSummary::default();
    let mut rows = Vec::with_capacity(rates.len());
    for rate in &rates {
      match RateRow::encode(rate) {
        Ok(row) => rows.push(row),
        Err(e) => summary.failed.push(RowFailure {
          key:    rate_key(rate.currency_code, rate.rate_date),
          reason: e.to_string(),
        }),
      }
    }

    let now = encode_dt(Utc::now());
    let outcomes: Vec<RowOutcome> = self
      .conn
      .call(move |conn| {
        let mut tx = conn.transaction()?;
        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
          let key = format!("{}@{}", row.currency_code, row.rate_date);
          let sp = tx.savepoint()?;
          match upsert_rate_row(&sp, &row, &now) {
            Ok(inserted) => {
              sp.commit()?;
              outcomes.push((key, Ok(inserted)));
            }
            Err(e) => outcomes.push((key, Err(e.to_string()))),
          }
        }
        tx.commit()?;
        Ok(outcomes)
      })
      .await?;

    tally(&mut summary, outcomes);
    Ok(summary)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn list_distinct_currency_codes(&self) -> Result<BTreeSet<CurrencyCode>> {
    let raw: Vec<String> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT DISTINCT j.value
           FROM countries c, json_each(c.currencies) j",
        )?;
        let codes = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(codes)
      })
      .await?;

    raw
      .iter()
      .map(|s| Ok(CurrencyCode::parse(s)?))
      .collect()
  }

  async fn currency_usage(&self) -> Result<BTreeMap<CurrencyCode, BTreeSet<String>>> {
    let rows: Vec<(String, String)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT name, currencies FROM countries")?;
        let rows = stmt
          .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut usage: BTreeMap<CurrencyCode, BTreeSet<String>> = BTreeMap::new();
    for (name, currencies) in rows {
      for code in decode_json::<BTreeSet<CurrencyCode>>(&currencies)? {
        usage.entry(code).or_default().insert(name.clone());
      }
    }
    Ok(usage)
  }

  async fn get_country<'a>(&'a self, name: &'a str) -> Result<Option<StoredCountry>> {
    let key = natural_key(name);

    let raw = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {COUNTRY_COLUMNS} FROM countries WHERE name_key = ?1"),
            rusqlite::params![key],
            read_country,
          )
          .optional()?)
      })
      .await?;

    raw
      .map(|(row, created_at, updated_at)| row.decode(&created_at, &updated_at))
      .transpose()
  }

  async fn count_countries(&self) -> Result<u64> {
    let count: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM countries", [], |r| r.get(0))?))
      .await?;
    Ok(u64::try_from(count).unwrap_or_default())
  }

  async fn rates_on(&self, date: NaiveDate) -> Result<Vec<StoredRate>> {
    let date_str = encode_date(date);

    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RATE_COLUMNS} FROM currency_rates
           WHERE rate_date = ?1
           ORDER BY currency_code"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![date_str], read_rate)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(row, created_at, updated_at)| row.decode(&created_at, &updated_at))
      .collect()
  }

  async fn count_rates(&self) -> Result<u64> {
    let count: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM currency_rates", [], |r| r.get(0))?))
      .await?;
    Ok(u64::try_from(count).unwrap_or_default())
  }
}
