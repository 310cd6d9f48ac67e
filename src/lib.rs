// src/lib.rs
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod market;
pub mod models;
pub mod position;
pub mod valuation;

// Re-export commonly used items
pub use db::DatabasePool;
pub use error::LedgerError;
pub use models::*;
