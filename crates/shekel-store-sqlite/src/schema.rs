//! SQL schema for the shekel SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per country. `name_key` is the display name trimmed, with
-- whitespace collapsed and lowercased. Rows are never deleted: a country
-- that disappears upstream keeps its last snapshot.
CREATE TABLE IF NOT EXISTS countries (
    name_key      TEXT PRIMARY KEY CHECK (name_key <> ''),
    name          TEXT NOT NULL,
    capitals      TEXT NOT NULL DEFAULT '[]',   -- JSON array of strings
    continent     TEXT NOT NULL,
    currencies    TEXT NOT NULL DEFAULT '[]',   -- JSON array of ISO 4217 codes
    is_un_member  INTEGER NOT NULL DEFAULT 0,
    population    INTEGER NOT NULL DEFAULT 0 CHECK (population >= 0),
    timezone_info TEXT NOT NULL DEFAULT '{}',   -- JSON {offset label: local time}
    created_at    TEXT NOT NULL,                -- ISO 8601 UTC
    updated_at    TEXT NOT NULL
);

-- One row per currency per day, however many countries share the currency.
-- shekel_rate = ILS received for 1 unit of currency_code, as a decimal string.
CREATE TABLE IF NOT EXISTS currency_rates (
    currency_code TEXT NOT NULL CHECK (length(currency_code) = 3),
    rate_date     TEXT NOT NULL,                -- YYYY-MM-DD
    shekel_rate   TEXT NOT NULL,
    country_names TEXT NOT NULL DEFAULT '[]',   -- JSON array, not part of the key
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (currency_code, rate_date)
);

CREATE INDEX IF NOT EXISTS currency_rates_date_idx ON currency_rates(rate_date);

PRAGMA user_version = 1;
";
