use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::error::LedgerError;
use crate::handlers::{error_response, AppState};
use crate::ledger;
use crate::models::{TradeAction, TradeRequest, TradeResult};

/// Buy a stock. The request carries the symbol and quantity; when it
/// omits the price, the trade executes at the live quote.
#[axum::debug_handler]
pub async fn buy_stock(
    State(state): State<AppState>,
    Json(trade): Json<TradeRequest>,
) -> Result<(StatusCode, Json<TradeResult>), (StatusCode, Json<String>)> {
    execute(state, trade, TradeAction::Buy).await
}

/// Sell a stock. Same request shape as `buy_stock`.
#[axum::debug_handler]
pub async fn sell_stock(
    State(state): State<AppState>,
    Json(trade): Json<TradeRequest>,
) -> Result<(StatusCode, Json<TradeResult>), (StatusCode, Json<String>)> {
    execute(state, trade, TradeAction::Sell).await
}

async fn execute(
    state: AppState,
    trade: TradeRequest,
    action: TradeAction,
) -> Result<(StatusCode, Json<TradeResult>), (StatusCode, Json<String>)> {
    let price = match trade.price {
        Some(price) => price,
        None => state
            .market
            .current_price(&trade.symbol)
            .await
            .map_err(|source| {
                error_response(LedgerError::PriceUnavailable {
                    symbol: trade.symbol.clone(),
                    source,
                })
            })?,
    };

    let result = ledger::execute_trade(
        &state.pool,
        state.market.as_ref(),
        trade.user_id,
        &trade.symbol,
        action,
        trade.quantity,
        price,
    )
    .await
    .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(for_display(result))))
}

/// Round monetary fields for the wire; the store keeps full precision.
fn for_display(result: TradeResult) -> TradeResult {
    TradeResult {
        price: result.price.round_dp(2),
        total: result.total.round_dp(2),
        balance_after: result.balance_after.round_dp(2),
        position_average_cost: result.position_average_cost.round_dp(2),
        realized_gain: result.realized_gain.map(|g| g.round_dp(2)),
        quantity: result.quantity.round_dp(8),
        position_quantity: result.position_quantity.round_dp(8),
        ..result
    }
}
