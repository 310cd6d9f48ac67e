use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::LedgerError;
use crate::handlers::{error_response, AppState, UserQuery};
use crate::models::{HoldingView, Portfolio, Transaction, ValuationPoint};
use crate::{ledger, valuation};

#[derive(Deserialize)]
pub struct ValuationQuery {
    pub user_id: i64,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Open holdings enriched with the live quote and market value.
#[axum::debug_handler]
pub async fn get_portfolio(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<(StatusCode, Json<Portfolio>), (StatusCode, Json<String>)> {
    let holdings = ledger::holdings(&state.pool, query.user_id)
        .await
        .map_err(error_response)?;
    let symbols: Vec<String> = holdings.iter().map(|h| h.symbol.clone()).collect();
    let names = ledger::company_names(&state.pool, &symbols)
        .await
        .map_err(error_response)?;

    let mut views = Vec::with_capacity(holdings.len());
    let mut total_value = Decimal::ZERO;
    for holding in holdings {
        let current_price = state
            .market
            .current_price(&holding.symbol)
            .await
            .map_err(|source| {
                error_response(LedgerError::PriceUnavailable {
                    symbol: holding.symbol.clone(),
                    source,
                })
            })?;
        let market_value = holding.quantity * current_price;
        total_value += market_value;
        views.push(HoldingView {
            company_name: names
                .get(&holding.symbol)
                .cloned()
                .unwrap_or_else(|| holding.symbol.clone()),
            symbol: holding.symbol,
            quantity: holding.quantity.round_dp(8),
            average_cost: holding.average_cost.round_dp(2),
            current_price: current_price.round_dp(2),
            market_value: market_value.round_dp(2),
        });
    }

    Ok((
        StatusCode::OK,
        Json(Portfolio {
            holdings: views,
            total_value: total_value.round_dp(2),
        }),
    ))
}

/// Full trade history for a user, newest first.
#[axum::debug_handler]
pub async fn get_transaction_history(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<(StatusCode, Json<Vec<Transaction>>), (StatusCode, Json<String>)> {
    let transactions = ledger::transaction_history(&state.pool, query.user_id)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::OK, Json(transactions)))
}

/// Reconstructed daily valuation over `[start, end]`.
#[axum::debug_handler]
pub async fn get_valuation_history(
    State(state): State<AppState>,
    Query(query): Query<ValuationQuery>,
) -> Result<(StatusCode, Json<Vec<ValuationPoint>>), (StatusCode, Json<String>)> {
    let series = valuation::reconstruct_valuation(
        &state.pool,
        state.market.as_ref(),
        query.user_id,
        query.start,
        query.end,
    )
    .await
    .map_err(error_response)?;

    let rounded = series
        .into_iter()
        .map(|point| ValuationPoint {
            total_value: point.total_value.round_dp(2),
            total_cost_basis: point.total_cost_basis.round_dp(2),
            cash_balance: point.cash_balance.round_dp(2),
            ..point
        })
        .collect();

    Ok((StatusCode::OK, Json(rounded)))
}
