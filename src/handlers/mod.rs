pub mod accounts;
pub mod portfolio;
pub mod trading;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::db::DatabasePool;
use crate::error::LedgerError;
use crate::market::PriceSource;

/// Shared application state: the ledger store and the price source,
/// passed into every handler instead of living in globals.
#[derive(Clone)]
pub struct AppState {
    pub pool: DatabasePool,
    pub market: Arc<dyn PriceSource>,
}

#[derive(Deserialize)]
pub struct UserQuery {
    pub user_id: i64,
}

/// Map a ledger error kind onto a transport status, keeping the typed
/// message in the body.
pub fn error_response(e: LedgerError) -> (StatusCode, Json<String>) {
    let status = match &e {
        LedgerError::InvalidInput(_)
        | LedgerError::InsufficientBalance { .. }
        | LedgerError::NoSuchPosition(_)
        | LedgerError::InsufficientShares { .. } => StatusCode::BAD_REQUEST,
        LedgerError::AccountNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::PriceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::StoreConflict => StatusCode::CONFLICT,
        LedgerError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, "ledger store failure");
    }
    (status, Json(e.to_string()))
}
