use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A user's cash wallet. One account per user.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    pub balance: Decimal,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreateAccount {
    pub user_id: i64,
    pub opening_balance: Decimal,
}

/// Buy or sell, as stored in the transaction log.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(TradeAction::Buy),
            "SELL" => Some(TradeAction::Sell),
            _ => None,
        }
    }
}

/// An open position as reported to callers.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HoldingSummary {
    pub symbol: String,
    pub quantity: Decimal,
    pub average_cost: Decimal,
}

/// A holding enriched with live market data for the portfolio view.
#[derive(Serialize, Deserialize, Debug)]
pub struct HoldingView {
    pub symbol: String,
    pub company_name: String,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct Portfolio {
    pub holdings: Vec<HoldingView>,
    pub total_value: Decimal,
}

/// One immutable row of the transaction log.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Transaction {
    pub id: String,
    pub symbol: String,
    pub action: TradeAction,
    pub quantity: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TradeRequest {
    pub user_id: i64,
    pub symbol: String,
    pub quantity: Decimal,
    /// Executed price. Omitted → the live quote is used.
    pub price: Option<Decimal>,
}

/// Success payload of one executed trade.
#[derive(Serialize, Deserialize, Debug)]
pub struct TradeResult {
    pub transaction_id: String,
    pub symbol: String,
    pub action: TradeAction,
    pub quantity: Decimal,
    pub price: Decimal,
    /// Cost for buys, proceeds for sells. Always positive.
    pub total: Decimal,
    pub balance_after: Decimal,
    pub position_quantity: Decimal,
    pub position_average_cost: Decimal,
    /// Present on sells only; derived, never persisted.
    pub realized_gain: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// Descriptive info cached on first trade of an unseen symbol.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SymbolProfile {
    #[serde(alias = "name")]
    pub company_name: String,
    pub sector: Option<String>,
    #[serde(alias = "finnhubIndustry")]
    pub industry: Option<String>,
}

/// One day of a reconstructed valuation series.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ValuationPoint {
    pub date: NaiveDate,
    pub total_value: Decimal,
    pub total_cost_basis: Decimal,
    pub cash_balance: Decimal,
}
