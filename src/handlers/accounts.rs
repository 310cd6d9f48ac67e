use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::handlers::{error_response, AppState, UserQuery};
use crate::ledger;
use crate::models::{Account, CreateAccount};

#[derive(Serialize)]
pub struct BalanceResponse {
    pub balance: Decimal,
}

/// Provision a new account with an opening cash balance.
#[axum::debug_handler]
pub async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccount>,
) -> Result<(StatusCode, Json<Account>), (StatusCode, Json<String>)> {
    let account = ledger::create_account(&state.pool, req.user_id, req.opening_balance)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// Current cash balance for a user.
#[axum::debug_handler]
pub async fn get_balance(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<(StatusCode, Json<BalanceResponse>), (StatusCode, Json<String>)> {
    let balance = ledger::balance(&state.pool, query.user_id)
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::OK,
        Json(BalanceResponse {
            balance: balance.round_dp(2),
        }),
    ))
}
