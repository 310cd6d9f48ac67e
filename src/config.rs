use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

/// Trade size bounds enforced before any mutation.
pub const MIN_QUANTITY_MILLIS: i64 = 1; // 0.001 shares
pub const MAX_QUANTITY: i64 = 999_999;
/// Per-share price ceiling. Together with `MAX_QUANTITY` this bounds
/// the notional of a single trade, keeping the decimal arithmetic in
/// the position math far away from overflow.
pub const MAX_PRICE: i64 = 1_000_000;

pub fn min_quantity() -> Decimal {
    Decimal::new(MIN_QUANTITY_MILLIS, 3)
}

pub fn max_quantity() -> Decimal {
    Decimal::from_i64(MAX_QUANTITY).unwrap_or(Decimal::MAX)
}

pub fn max_price() -> Decimal {
    Decimal::from_i64(MAX_PRICE).unwrap_or(Decimal::MAX)
}

/// Process configuration, read once at startup from the environment
/// (with `.env` support) and passed down explicitly.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: String,
    pub frontend_url: String,
    pub finnhub_base_url: String,
    pub finnhub_api_key: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let finnhub_api_key = dotenv::var("FINNHUB_API_KEY")
            .map_err(|_| "FINNHUB_API_KEY must be set".to_string())?;

        Ok(AppConfig {
            bind_addr: dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            db_path: dotenv::var("DB_PATH").unwrap_or_else(|_| "./homebroker.sqlite".to_string()),
            frontend_url: dotenv::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            finnhub_base_url: dotenv::var("FINNHUB_BASE_URL")
                .unwrap_or_else(|_| "https://finnhub.io".to_string()),
            finnhub_api_key,
        })
    }
}
