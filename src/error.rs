use rust_decimal::Decimal;
use thiserror::Error;

use crate::market::PriceError;

/// Every failure the ledger core can report to a caller.
///
/// The first five variants are caller-correctable and are always raised
/// before any mutating statement has been issued. The remaining variants
/// are transient or fatal, and the executor guarantees a full rollback
/// before surfacing them.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no account found for user {0}")]
    AccountNotFound(i64),

    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        available: Decimal,
        required: Decimal,
    },

    #[error("no open position in {0}")]
    NoSuchPosition(String),

    #[error("insufficient shares: own {owned}, requested {requested}")]
    InsufficientShares { owned: Decimal, requested: Decimal },

    #[error("price unavailable for {symbol}: {source}")]
    PriceUnavailable {
        symbol: String,
        source: PriceError,
    },

    #[error("store conflict: concurrent writer, retries exhausted")]
    StoreConflict,

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),
}
