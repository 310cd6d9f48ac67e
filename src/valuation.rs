//! Valuation Reconstructor: replays the transaction log against
//! historical closing prices to produce a daily series of portfolio
//! value, cost basis, and cash balance.
//!
//! The replay is anchored to the present: positions accumulate over the
//! full log (so the end of the window agrees with the live holdings),
//! and cash walks backward from the current balance by inverting each
//! day's signed cash flow. Days before a symbol's first known close are
//! valued at zero — an approximation for not-yet-listed or delisted
//! symbols, kept visible here rather than blended away.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use tracing::debug;

use crate::db::DatabasePool;
use crate::error::LedgerError;
use crate::ledger::{account_row, map_transaction_row};
use crate::market::PriceSource;
use crate::models::{TradeAction, Transaction, ValuationPoint};

/// Closes are fetched with this lookback so a window opening on a
/// non-trading day can forward-fill from the prior close.
const PRICE_LOOKBACK_DAYS: u64 = 7;

/// Per-day aggregate of the log: signed share deltas by symbol, signed
/// cash flow, and signed cost flow.
#[derive(Default)]
struct DayDelta {
    shares: HashMap<String, Decimal>,
    cash: Decimal,
    cost: Decimal,
}

/// Reconstruct the daily valuation series for `user_id` over
/// `[start, end]` (inclusive).
///
/// Read-only: all store reads happen under a single connection
/// acquisition, so the series is computed from one consistent snapshot
/// of the log.
pub async fn reconstruct_valuation(
    pool: &DatabasePool,
    market: &dyn PriceSource,
    user_id: i64,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<ValuationPoint>, LedgerError> {
    if start > end {
        return Err(LedgerError::InvalidInput(
            "window start must not be after its end".to_string(),
        ));
    }

    // Consistent snapshot of balance and log.
    let (current_balance, log) = {
        let conn = pool.0.lock().await;
        let account = account_row(&conn, user_id)?;
        let mut stmt = conn.prepare(
            "SELECT t.id, h.symbol, t.transaction_type, t.quantity, t.price, t.timestamp
             FROM transactions t
             JOIN holdings h ON h.id = t.holding_id
             WHERE h.portfolio_id = ?1
             ORDER BY t.timestamp ASC",
        )?;
        let log = stmt
            .query_map([account.portfolio_id], map_transaction_row)?
            .collect::<Result<Vec<_>, _>>()?;
        (account.balance, log)
    };

    debug!(
        user_id,
        transactions = log.len(),
        %start,
        %end,
        "reconstructing valuation"
    );

    let deltas = fold_by_day(&log);

    // Positions and cost basis accumulate from the beginning of the
    // log, then the window is sliced out.
    let mut positions: HashMap<String, Decimal> = HashMap::new();
    let mut cost_basis = Decimal::ZERO;
    for (_, delta) in deltas.range(..start) {
        apply_delta(&mut positions, &mut cost_basis, delta);
    }

    let mut days: Vec<(NaiveDate, HashMap<String, Decimal>, Decimal)> = Vec::new();
    let mut day = start;
    loop {
        if let Some(delta) = deltas.get(&day) {
            apply_delta(&mut positions, &mut cost_basis, delta);
        }
        days.push((day, positions.clone(), cost_basis));
        if day >= end {
            break;
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    // Price tables for every symbol that is held at some point in the
    // window.
    let mut needed: HashSet<&str> = HashSet::new();
    for (_, snapshot, _) in &days {
        for (symbol, quantity) in snapshot {
            if !quantity.is_zero() {
                needed.insert(symbol.as_str());
            }
        }
    }
    let price_start = start
        .checked_sub_days(Days::new(PRICE_LOOKBACK_DAYS))
        .unwrap_or(start);
    let mut price_tables: HashMap<String, BTreeMap<NaiveDate, Decimal>> = HashMap::new();
    for symbol in needed {
        let closes = market
            .historical_closes(symbol, price_start, end)
            .await
            .map_err(|source| LedgerError::PriceUnavailable {
                symbol: symbol.to_string(),
                source,
            })?;
        price_tables.insert(symbol.to_string(), closes.into_iter().collect());
    }

    // Cash walks backward from the live balance: today's balance minus
    // the cash flow of every day after the one being reconstructed.
    let cash_suffix = suffix_cash_flows(&deltas);

    let series = days
        .into_iter()
        .map(|(date, snapshot, cost)| {
            let total_value = snapshot
                .iter()
                .filter(|(_, quantity)| !quantity.is_zero())
                .map(|(symbol, quantity)| *quantity * close_on(&price_tables, symbol, date))
                .sum();
            ValuationPoint {
                date,
                total_value,
                total_cost_basis: cost,
                cash_balance: current_balance - flows_after(&cash_suffix, date),
            }
        })
        .collect();

    Ok(series)
}

fn fold_by_day(log: &[Transaction]) -> BTreeMap<NaiveDate, DayDelta> {
    let mut deltas: BTreeMap<NaiveDate, DayDelta> = BTreeMap::new();
    for txn in log {
        let day = txn.timestamp.date_naive();
        let entry = deltas.entry(day).or_default();
        let notional = txn.quantity * txn.price;
        match txn.action {
            TradeAction::Buy => {
                *entry.shares.entry(txn.symbol.clone()).or_default() += txn.quantity;
                entry.cash -= notional;
                entry.cost += notional;
            }
            TradeAction::Sell => {
                *entry.shares.entry(txn.symbol.clone()).or_default() -= txn.quantity;
                entry.cash += notional;
                entry.cost -= notional;
            }
        }
    }
    deltas
}

fn apply_delta(
    positions: &mut HashMap<String, Decimal>,
    cost_basis: &mut Decimal,
    delta: &DayDelta,
) {
    for (symbol, shares) in &delta.shares {
        *positions.entry(symbol.clone()).or_default() += *shares;
    }
    *cost_basis += delta.cost;
}

/// `(day, cash flow)` pairs, ascending. `flows_after` sums the flows of
/// all days strictly after the queried one.
fn suffix_cash_flows(deltas: &BTreeMap<NaiveDate, DayDelta>) -> Vec<(NaiveDate, Decimal)> {
    deltas.iter().map(|(d, delta)| (*d, delta.cash)).collect()
}

fn flows_after(flows: &[(NaiveDate, Decimal)], day: NaiveDate) -> Decimal {
    let idx = flows.partition_point(|(d, _)| *d <= day);
    flows[idx..].iter().map(|(_, cash)| *cash).sum()
}

/// Last known close on or before `date`; zero when the symbol has no
/// close yet (the documented pre-listing approximation).
fn close_on(
    tables: &HashMap<String, BTreeMap<NaiveDate, Decimal>>,
    symbol: &str,
    date: NaiveDate,
) -> Decimal {
    tables
        .get(symbol)
        .and_then(|closes| closes.range(..=date).next_back())
        .map(|(_, close)| *close)
        .unwrap_or(Decimal::ZERO)
}
