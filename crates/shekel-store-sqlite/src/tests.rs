//! Integration tests for `SqliteStore` against an in-memory database.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use shekel_core::{
  CurrencyCode,
  country::Country,
  rate::CurrencyRate,
  store::CatalogStore,
};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn code(s: &str) -> CurrencyCode { CurrencyCode::parse(s).unwrap() }

fn country(name: &str, currencies: &[&str]) -> Country {
  Country {
    name:          name.into(),
    capitals:      vec![format!("{name} City")],
    continent:     "Europe".into(),
    currencies:    currencies.iter().map(|c| code(c)).collect(),
    is_un_member:  true,
    population:    1_000,
    timezone_info: BTreeMap::from([("UTC+01:00".into(), "2024-01-01 13:00:00".into())]),
  }
}

fn day(d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2024, 1, d).unwrap() }

fn rate(c: &str, date: NaiveDate, value: &str) -> CurrencyRate {
  CurrencyRate::new(code(c), date, value.parse::<Decimal>().unwrap()).unwrap()
}

// ─── Countries ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_countries_inserts_then_updates() {
  let s = store().await;

  let first = s
    .upsert_countries(vec![country("France", &["EUR"]), country("Japan", &["JPY"])])
    .await
    .unwrap();
  assert_eq!((first.inserted, first.updated), (2, 0));
  assert!(first.failed.is_empty());

  let second = s
    .upsert_countries(vec![country("France", &["EUR"]), country("Japan", &["JPY"])])
    .await
    .unwrap();
  assert_eq!((second.inserted, second.updated), (0, 2));
  assert_eq!(s.count_countries().await.unwrap(), 2);
}

#[tokio::test]
async fn update_refreshes_fields_and_keeps_created_at() {
  let s = store().await;
  s.upsert_countries(vec![country("Israel", &["ILS"])]).await.unwrap();
  let before = s.get_country("Israel").await.unwrap().unwrap();

  let mut changed = country("Israel", &["ILS"]);
  changed.population = 9_000_000;
  changed.capitals = vec!["Jerusalem".into()];
  s.upsert_countries(vec![changed]).await.unwrap();

  let after = s.get_country("israel").await.unwrap().unwrap();
  assert_eq!(after.country.population, 9_000_000);
  assert_eq!(after.country.capitals, vec!["Jerusalem"]);
  assert_eq!(after.created_at, before.created_at);
  assert!(after.updated_at >= before.updated_at);
}

#[tokio::test]
async fn natural_key_ignores_case_and_whitespace() {
  let s = store().await;
  s.upsert_countries(vec![country("United Kingdom", &["GBP"])]).await.unwrap();

  let summary = s
    .upsert_countries(vec![country("  united   KINGDOM ", &["GBP"])])
    .await
    .unwrap();
  assert_eq!(summary.updated, 1);
  assert_eq!(s.count_countries().await.unwrap(), 1);

  let fetched = s.get_country("UNITED KINGDOM").await.unwrap();
  assert!(fetched.is_some());
}

#[tokio::test]
async fn get_country_missing_returns_none() {
  let s = store().await;
  assert!(s.get_country("Atlantis").await.unwrap().is_none());
}

#[tokio::test]
async fn failing_row_does_not_abort_siblings() {
  let s = store().await;

  let summary = s
    .upsert_countries(vec![
      country("Norway", &["NOK"]),
      country("   ", &[]), // violates the non-empty key check
      country("Sweden", &["SEK"]),
    ])
    .await
    .unwrap();

  assert_eq!(summary.inserted, 2);
  assert_eq!(summary.failed.len(), 1);
  assert_eq!(summary.failed[0].key, "");
  assert_eq!(s.count_countries().await.unwrap(), 2);
}

#[tokio::test]
async fn unencodable_row_is_reported_individually() {
  let s = store().await;
  let mut huge = country("Bigland", &[]);
  huge.population = u64::MAX;

  let summary = s
    .upsert_countries(vec![huge, country("Smallland", &[])])
    .await
    .unwrap();

  assert_eq!(summary.inserted, 1);
  assert_eq!(summary.failed.len(), 1);
  assert_eq!(summary.failed[0].key, "bigland");
}

#[tokio::test]
async fn stored_country_round_trips_all_fields() {
  let s = store().await;
  let original = country("Switzerland", &["CHF", "EUR"]);
  s.upsert_countries(vec![original.clone()]).await.unwrap();

  let stored = s.get_country("switzerland").await.unwrap().unwrap();
  assert_eq!(stored.country, original);
}

// ─── Currency codes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn distinct_codes_empty_without_countries() {
  let s = store().await;
  assert!(s.list_distinct_currency_codes().await.unwrap().is_empty());
}

#[tokio::test]
async fn distinct_codes_deduplicate_shared_currencies() {
  let s = store().await;
  s.upsert_countries(vec![
    country("France", &["EUR"]),
    country("Germany", &["EUR"]),
    country("Zimbabwe", &["USD", "ZAR"]),
    country("Antarctica", &[]),
  ])
  .await
  .unwrap();

  let codes = s.list_distinct_currency_codes().await.unwrap();
  assert_eq!(codes, BTreeSet::from([code("EUR"), code("USD"), code("ZAR")]));
}

#[tokio::test]
async fn currency_usage_groups_countries() {
  let s = store().await;
  s.upsert_countries(vec![country("France", &["EUR"]), country("Germany", &["EUR"])])
    .await
    .unwrap();

  let usage = s.currency_usage().await.unwrap();
  assert_eq!(
    usage.get(&code("EUR")),
    Some(&BTreeSet::from(["France".to_string(), "Germany".to_string()]))
  );
}

// ─── Rates ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn same_currency_and_date_twice_keeps_one_row_with_second_value() {
  let s = store().await;

  let first = s.upsert_rates(vec![rate("USD", day(1), "3.70")]).await.unwrap();
  assert_eq!(first.inserted, 1);

  let second = s.upsert_rates(vec![rate("USD", day(1), "3.75")]).await.unwrap();
  assert_eq!((second.inserted, second.updated), (0, 1));

  assert_eq!(s.count_rates().await.unwrap(), 1);
  let rows = s.rates_on(day(1)).await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].rate.shekel_rate, "3.75".parse::<Decimal>().unwrap());
}

#[tokio::test]
async fn rates_on_different_days_are_separate_rows() {
  let s = store().await;
  s.upsert_rates(vec![rate("EUR", day(1), "4.01"), rate("EUR", day(2), "4.02")])
    .await
    .unwrap();

  assert_eq!(s.count_rates().await.unwrap(), 2);
  assert_eq!(s.rates_on(day(2)).await.unwrap().len(), 1);
  assert!(s.rates_on(day(3)).await.unwrap().is_empty());
}

#[tokio::test]
async fn rate_country_names_are_stored_but_not_keyed() {
  let s = store().await;
  let mut eur = rate("EUR", day(1), "4.00");
  eur.country_names = BTreeSet::from(["France".into(), "Germany".into()]);
  s.upsert_rates(vec![eur]).await.unwrap();

  let mut renamed = rate("EUR", day(1), "4.00");
  renamed.country_names = BTreeSet::from(["Italy".into()]);
  let summary = s.upsert_rates(vec![renamed]).await.unwrap();
  assert_eq!(summary.updated, 1);

  let rows = s.rates_on(day(1)).await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].rate.country_names, BTreeSet::from(["Italy".to_string()]));
}

#[tokio::test]
async fn rates_on_orders_by_code() {
  let s = store().await;
  s.upsert_rates(vec![
    rate("USD", day(1), "3.7"),
    rate("EUR", day(1), "4.0"),
    rate("GBP", day(1), "4.6"),
  ])
  .await
  .unwrap();

  let codes: Vec<String> = s
    .rates_on(day(1))
    .await
    .unwrap()
    .into_iter()
    .map(|r| r.rate.currency_code.to_string())
    .collect();
  assert_eq!(codes, vec!["EUR", "GBP", "USD"]);
}
