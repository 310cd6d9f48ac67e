//! Trade Executor and ledger read paths.
//!
//! Every trade runs as one atomic unit of work: validate, read state,
//! apply the position math, write balance + holding + transaction row,
//! commit. Any failure after the first mutating statement rolls the
//! whole trade back; callers never observe a partially applied trade.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config;
use crate::db::{decimal_from_sql, decimal_to_sql, timestamp_from_sql, DatabasePool};
use crate::error::LedgerError;
use crate::market::PriceSource;
use crate::models::{
    Account, HoldingSummary, SymbolProfile, TradeAction, TradeResult, Transaction,
};
use crate::position::{self, Position};

/// Busy/locked store errors are retried this many times before
/// surfacing as `StoreConflict`.
const BUSY_RETRIES: u32 = 3;

pub(crate) struct AccountRow {
    pub(crate) account_id: i64,
    pub(crate) portfolio_id: i64,
    pub(crate) balance: Decimal,
}

struct HoldingRow {
    id: i64,
    position: Position,
}

/// Provision an account with its 1:1 portfolio.
pub async fn create_account(
    pool: &DatabasePool,
    user_id: i64,
    opening_balance: Decimal,
) -> Result<Account, LedgerError> {
    if opening_balance < Decimal::ZERO {
        return Err(LedgerError::InvalidInput(
            "opening balance must not be negative".to_string(),
        ));
    }

    let mut conn = pool.0.lock().await;
    let tx = conn.transaction()?;
    let inserted = tx.execute(
        "INSERT INTO accounts (user_id, balance) VALUES (?1, ?2)",
        params![user_id, decimal_to_sql(opening_balance)],
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_constraint_violation(&e) => {
            return Err(LedgerError::InvalidInput(format!(
                "account already exists for user {user_id}"
            )))
        }
        Err(e) => return Err(e.into()),
    }
    let account_id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO portfolios (account_id) VALUES (?1)",
        params![account_id],
    )?;
    tx.commit()?;

    info!(user_id, %opening_balance, "account created");
    Ok(Account {
        id: account_id,
        user_id,
        balance: opening_balance,
    })
}

/// Execute one buy or sell for a user, atomically.
///
/// The caller supplies the executed price; the price source is consulted
/// only to create symbol metadata on the first buy of an unseen symbol.
/// That fetch completes before the trade takes the store connection, so
/// a market outage aborts with zero mutations and concurrent ledger
/// operations never wait on a market round trip.
pub async fn execute_trade(
    pool: &DatabasePool,
    market: &dyn PriceSource,
    user_id: i64,
    symbol: &str,
    action: TradeAction,
    quantity: Decimal,
    price: Decimal,
) -> Result<TradeResult, LedgerError> {
    validate_trade_inputs(symbol, quantity, price)?;

    // Fetch metadata for an unseen symbol before taking the connection
    // for the trade itself, so other ledger operations never queue
    // behind a market round trip. A concurrent first buy of the same
    // symbol is harmless: the symbols insert is INSERT OR IGNORE.
    let needs_profile = if action == TradeAction::Buy {
        let conn = pool.0.lock().await;
        !symbol_known(&conn, symbol)?
    } else {
        false
    };
    let profile = if needs_profile {
        let fetched =
            market
                .profile(symbol)
                .await
                .map_err(|source| LedgerError::PriceUnavailable {
                    symbol: symbol.to_string(),
                    source,
                })?;
        Some(fetched)
    } else {
        None
    };

    let mut attempt = 0;
    loop {
        let outcome = {
            let mut conn = pool.0.lock().await;
            run_trade_tx(
                &mut conn,
                user_id,
                symbol,
                action,
                quantity,
                price,
                profile.as_ref(),
            )
        };
        match outcome {
            Err(LedgerError::StoreUnavailable(e)) if is_busy(&e) => {
                if attempt >= BUSY_RETRIES {
                    return Err(LedgerError::StoreConflict);
                }
                attempt += 1;
                warn!(attempt, "ledger store busy, retrying trade");
                tokio::time::sleep(std::time::Duration::from_millis(25 * u64::from(attempt)))
                    .await;
            }
            Ok(result) => {
                info!(
                    user_id,
                    symbol,
                    action = action.as_str(),
                    %quantity,
                    %price,
                    transaction_id = %result.transaction_id,
                    "trade committed"
                );
                return Ok(result);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Current cash balance for a user.
pub async fn balance(pool: &DatabasePool, user_id: i64) -> Result<Decimal, LedgerError> {
    let conn = pool.0.lock().await;
    Ok(account_row(&conn, user_id)?.balance)
}

/// Open positions (quantity > 0) for a user.
pub async fn holdings(
    pool: &DatabasePool,
    user_id: i64,
) -> Result<Vec<HoldingSummary>, LedgerError> {
    let conn = pool.0.lock().await;
    let account = account_row(&conn, user_id)?;

    let mut stmt = conn.prepare(
        "SELECT symbol, quantity, average_cost FROM holdings
         WHERE portfolio_id = ?1 ORDER BY symbol",
    )?;
    let rows = stmt
        .query_map([account.portfolio_id], |row| {
            Ok(HoldingSummary {
                symbol: row.get(0)?,
                quantity: decimal_from_sql(1, row.get(1)?)?,
                average_cost: decimal_from_sql(2, row.get(2)?)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter(|h| h.quantity > Decimal::ZERO)
        .collect())
}

/// Company names from the symbol-metadata cache. Symbols with no
/// cached profile fall back to the ticker itself.
pub async fn company_names(
    pool: &DatabasePool,
    symbols: &[String],
) -> Result<std::collections::HashMap<String, String>, LedgerError> {
    let conn = pool.0.lock().await;
    let mut names = std::collections::HashMap::with_capacity(symbols.len());
    for symbol in symbols {
        let name: Option<String> = conn
            .query_row(
                "SELECT company_name FROM symbols WHERE symbol = ?1",
                [symbol],
                |row| row.get(0),
            )
            .optional()?;
        names.insert(symbol.clone(), name.unwrap_or_else(|| symbol.clone()));
    }
    Ok(names)
}

/// Full transaction history for a user, newest first.
pub async fn transaction_history(
    pool: &DatabasePool,
    user_id: i64,
) -> Result<Vec<Transaction>, LedgerError> {
    let conn = pool.0.lock().await;
    let account = account_row(&conn, user_id)?;

    let mut stmt = conn.prepare(
        "SELECT t.id, h.symbol, t.transaction_type, t.quantity, t.price, t.timestamp
         FROM transactions t
         JOIN holdings h ON h.id = t.holding_id
         WHERE h.portfolio_id = ?1
         ORDER BY t.timestamp DESC",
    )?;
    let rows = stmt
        .query_map([account.portfolio_id], map_transaction_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn map_transaction_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    let action_raw: String = row.get(2)?;
    let action = TradeAction::parse(&action_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown transaction type {action_raw}").into(),
        )
    })?;
    Ok(Transaction {
        id: row.get(0)?,
        symbol: row.get(1)?,
        action,
        quantity: decimal_from_sql(3, row.get(3)?)?,
        price: decimal_from_sql(4, row.get(4)?)?,
        timestamp: timestamp_from_sql(5, row.get(5)?)?,
    })
}

fn validate_trade_inputs(
    symbol: &str,
    quantity: Decimal,
    price: Decimal,
) -> Result<(), LedgerError> {
    if symbol.trim().is_empty() {
        return Err(LedgerError::InvalidInput("symbol must not be empty".into()));
    }
    if quantity <= Decimal::ZERO {
        return Err(LedgerError::InvalidInput(
            "quantity must be greater than zero".into(),
        ));
    }
    if quantity < config::min_quantity() || quantity > config::max_quantity() {
        return Err(LedgerError::InvalidInput(format!(
            "quantity must be between {} and {}",
            config::min_quantity(),
            config::max_quantity()
        )));
    }
    if price <= Decimal::ZERO {
        return Err(LedgerError::InvalidInput(
            "price must be greater than zero".into(),
        ));
    }
    if price > config::max_price() {
        return Err(LedgerError::InvalidInput(format!(
            "price must not exceed {}",
            config::max_price()
        )));
    }
    Ok(())
}

fn run_trade_tx(
    conn: &mut Connection,
    user_id: i64,
    symbol: &str,
    action: TradeAction,
    quantity: Decimal,
    price: Decimal,
    profile: Option<&SymbolProfile>,
) -> Result<TradeResult, LedgerError> {
    let tx = conn.transaction()?;
    let account = account_row(&tx, user_id)?;
    // An early return drops `tx`, which rolls everything back.
    let result = match action {
        TradeAction::Buy => buy_in_tx(&tx, &account, symbol, quantity, price, profile)?,
        TradeAction::Sell => sell_in_tx(&tx, &account, symbol, quantity, price)?,
    };
    tx.commit()?;
    Ok(result)
}

fn buy_in_tx(
    tx: &Connection,
    account: &AccountRow,
    symbol: &str,
    quantity: Decimal,
    price: Decimal,
    profile: Option<&SymbolProfile>,
) -> Result<TradeResult, LedgerError> {
    let cost = quantity * price;
    if account.balance < cost {
        return Err(LedgerError::InsufficientBalance {
            available: account.balance,
            required: cost,
        });
    }

    let balance_after = account.balance - cost;
    tx.execute(
        "UPDATE accounts SET balance = ?1 WHERE id = ?2",
        params![decimal_to_sql(balance_after), account.account_id],
    )?;

    if let Some(profile) = profile {
        tx.execute(
            "INSERT OR IGNORE INTO symbols (symbol, company_name, sector, industry)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                symbol,
                profile.company_name,
                profile.sector,
                profile.industry
            ],
        )?;
    }

    let holding = match holding_row(tx, account.portfolio_id, symbol)? {
        Some(existing) => existing,
        None => {
            tx.execute(
                "INSERT INTO holdings (portfolio_id, symbol, quantity, average_cost)
                 VALUES (?1, ?2, '0', '0')",
                params![account.portfolio_id, symbol],
            )?;
            HoldingRow {
                id: tx.last_insert_rowid(),
                position: Position::flat(),
            }
        }
    };

    let new_position = position::apply_buy(holding.position, quantity, price);
    update_holding(tx, holding.id, new_position)?;
    let (transaction_id, timestamp) =
        append_transaction(tx, holding.id, TradeAction::Buy, quantity, price)?;

    Ok(TradeResult {
        transaction_id,
        symbol: symbol.to_string(),
        action: TradeAction::Buy,
        quantity,
        price,
        total: cost,
        balance_after,
        position_quantity: new_position.quantity,
        position_average_cost: new_position.average_cost,
        realized_gain: None,
        timestamp,
    })
}

fn sell_in_tx(
    tx: &Connection,
    account: &AccountRow,
    symbol: &str,
    quantity: Decimal,
    price: Decimal,
) -> Result<TradeResult, LedgerError> {
    let holding = holding_row(tx, account.portfolio_id, symbol)?
        .filter(|h| h.position.quantity > Decimal::ZERO)
        .ok_or_else(|| LedgerError::NoSuchPosition(symbol.to_string()))?;

    let new_position = position::apply_sell(holding.position, quantity)?;
    // Quantity may reach zero; the row is retained so the transaction
    // history stays queryable, and a later buy reopens it.
    update_holding(tx, holding.id, new_position)?;

    let proceeds = quantity * price;
    let balance_after = account.balance + proceeds;
    tx.execute(
        "UPDATE accounts SET balance = ?1 WHERE id = ?2",
        params![decimal_to_sql(balance_after), account.account_id],
    )?;

    let (transaction_id, timestamp) =
        append_transaction(tx, holding.id, TradeAction::Sell, quantity, price)?;

    Ok(TradeResult {
        transaction_id,
        symbol: symbol.to_string(),
        action: TradeAction::Sell,
        quantity,
        price,
        total: proceeds,
        balance_after,
        position_quantity: new_position.quantity,
        position_average_cost: new_position.average_cost,
        realized_gain: Some(position::realized_gain(
            holding.position.average_cost,
            quantity,
            price,
        )),
        timestamp,
    })
}

pub(crate) fn account_row(conn: &Connection, user_id: i64) -> Result<AccountRow, LedgerError> {
    conn.query_row(
        "SELECT a.id, p.id, a.balance FROM accounts a
         JOIN portfolios p ON p.account_id = a.id
         WHERE a.user_id = ?1",
        [user_id],
        |row| {
            Ok(AccountRow {
                account_id: row.get(0)?,
                portfolio_id: row.get(1)?,
                balance: decimal_from_sql(2, row.get(2)?)?,
            })
        },
    )
    .optional()?
    .ok_or(LedgerError::AccountNotFound(user_id))
}

fn holding_row(
    conn: &Connection,
    portfolio_id: i64,
    symbol: &str,
) -> Result<Option<HoldingRow>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, quantity, average_cost FROM holdings
         WHERE portfolio_id = ?1 AND symbol = ?2",
        params![portfolio_id, symbol],
        |row| {
            Ok(HoldingRow {
                id: row.get(0)?,
                position: Position {
                    quantity: decimal_from_sql(1, row.get(1)?)?,
                    average_cost: decimal_from_sql(2, row.get(2)?)?,
                },
            })
        },
    )
    .optional()
}

fn update_holding(
    conn: &Connection,
    holding_id: i64,
    position: Position,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE holdings SET quantity = ?1, average_cost = ?2 WHERE id = ?3",
        params![
            decimal_to_sql(position.quantity),
            decimal_to_sql(position.average_cost),
            holding_id
        ],
    )?;
    Ok(())
}

fn append_transaction(
    conn: &Connection,
    holding_id: i64,
    action: TradeAction,
    quantity: Decimal,
    price: Decimal,
) -> Result<(String, DateTime<Utc>), rusqlite::Error> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    conn.execute(
        "INSERT INTO transactions (id, holding_id, transaction_type, quantity, price, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            holding_id,
            action.as_str(),
            decimal_to_sql(quantity),
            decimal_to_sql(price),
            now.to_rfc3339()
        ],
    )?;
    Ok((id, now))
}

fn symbol_known(conn: &Connection, symbol: &str) -> Result<bool, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM symbols WHERE symbol = ?1",
        [symbol],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
