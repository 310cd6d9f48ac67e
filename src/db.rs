use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

/// Shared handle to the ledger store. All trade mutations run inside a
/// rusqlite transaction on this single connection; the mutex plus
/// SQLite's single-writer model serialize concurrent read-modify-write
/// sequences.
#[derive(Clone)]
pub struct DatabasePool(pub Arc<Mutex<rusqlite::Connection>>);

impl DatabasePool {
    /// Open (or create) the ledger database at `path` and bootstrap the
    /// schema.
    pub fn open(path: &str) -> Result<Self, rusqlite::Error> {
        let conn = rusqlite::Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: rusqlite::Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL UNIQUE,
                balance TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS portfolios (
                id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL UNIQUE,
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            );

            CREATE TABLE IF NOT EXISTS symbols (
                symbol TEXT PRIMARY KEY,
                company_name TEXT NOT NULL,
                sector TEXT,
                industry TEXT
            );

            -- Holdings are never deleted: quantity '0' marks a closed
            -- position, and a later buy reopens the same row.
            CREATE TABLE IF NOT EXISTS holdings (
                id INTEGER PRIMARY KEY,
                portfolio_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                quantity TEXT NOT NULL,
                average_cost TEXT NOT NULL,
                UNIQUE (portfolio_id, symbol),
                FOREIGN KEY (portfolio_id) REFERENCES portfolios(id),
                FOREIGN KEY (symbol) REFERENCES symbols(symbol)
            );

            -- Append-only: rows are never updated or deleted.
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                holding_id INTEGER NOT NULL,
                transaction_type TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                FOREIGN KEY (holding_id) REFERENCES holdings(id)
            );",
        )?;

        Ok(Self(Arc::new(Mutex::new(conn))))
    }
}

/// Decimals are stored as TEXT to keep fixed-point exactness; SQLite's
/// numeric affinity would silently convert to binary floats.
pub fn decimal_to_sql(value: Decimal) -> String {
    value.to_string()
}

/// Parse a TEXT decimal read from column `idx`, mapping parse failures
/// into rusqlite's conversion error so row mappers can use `?`.
pub fn decimal_from_sql(idx: usize, raw: String) -> rusqlite::Result<Decimal> {
    Decimal::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Parse an RFC 3339 timestamp read from column `idx`.
pub fn timestamp_from_sql(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
