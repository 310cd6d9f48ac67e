//! Price Source collaborator: live quotes, historical closes, and
//! company profiles, behind a trait so the ledger core can be tested
//! without the network.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::SymbolProfile;

/// Quotes are served from cache for this long before a refetch.
const QUOTE_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("no market data for {0}")]
    NotFound(String),

    #[error("price source rate limited")]
    RateLimited,

    #[error("price source unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Latest trade price for a symbol.
    async fn current_price(&self, symbol: &str) -> Result<Decimal, PriceError>;

    /// Daily closing prices over `[start, end]`, ascending by date.
    /// Non-trading days are absent; callers forward-fill.
    async fn historical_closes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, Decimal)>, PriceError>;

    /// Descriptive company info, fetched once per unseen symbol.
    async fn profile(&self, symbol: &str) -> Result<SymbolProfile, PriceError>;
}

/// Finnhub-backed price source. The HTTP client and quote cache are
/// owned here rather than living in process-wide statics, so every
/// consumer receives the collaborator explicitly.
pub struct FinnhubClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    quote_cache: Mutex<HashMap<String, (Decimal, Instant)>>,
}

#[derive(Deserialize)]
struct FinnhubQuote {
    /// Current price.
    c: f64,
}

#[derive(Deserialize)]
struct FinnhubCandles {
    s: String,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    t: Vec<i64>,
}

#[derive(Deserialize)]
struct FinnhubProfile {
    name: Option<String>,
    #[serde(rename = "finnhubIndustry")]
    industry: Option<String>,
}

impl FinnhubClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        FinnhubClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
            quote_cache: Mutex::new(HashMap::new()),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        symbol: &str,
    ) -> Result<T, PriceError> {
        debug!("Requesting market data from {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PriceError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PriceError::RateLimited);
        }
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PriceError::NotFound(symbol.to_string()));
        }
        if !response.status().is_success() {
            return Err(PriceError::Unavailable(format!(
                "HTTP {} from price source",
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PriceError::Unavailable(format!("bad response body: {e}")))
    }
}

/// Convert a JSON float into a price decimal. Quotes come over the wire
/// as binary floats; rounding to 4 places strips the representation
/// noise before the value enters ledger arithmetic.
fn price_from_f64(value: f64, symbol: &str) -> Result<Decimal, PriceError> {
    if value <= 0.0 {
        return Err(PriceError::NotFound(symbol.to_string()));
    }
    Decimal::try_from(value)
        .map(|d| d.round_dp(4))
        .map_err(|e| PriceError::Unavailable(format!("unrepresentable price {value}: {e}")))
}

#[async_trait]
impl PriceSource for FinnhubClient {
    async fn current_price(&self, symbol: &str) -> Result<Decimal, PriceError> {
        let now = Instant::now();
        {
            let cache = self.quote_cache.lock().await;
            if let Some((price, fetched_at)) = cache.get(symbol) {
                if now.duration_since(*fetched_at) < QUOTE_CACHE_TTL {
                    return Ok(*price);
                }
            }
        }

        let url = format!(
            "{}/api/v1/quote?symbol={}&token={}",
            self.base_url, symbol, self.api_key
        );
        let quote: FinnhubQuote = self.get_json(&url, symbol).await?;
        let price = price_from_f64(quote.c, symbol)?;

        self.quote_cache
            .lock()
            .await
            .insert(symbol.to_string(), (price, now));

        Ok(price)
    }

    async fn historical_closes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, Decimal)>, PriceError> {
        let from = start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();
        let to = end
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();

        let url = format!(
            "{}/api/v1/stock/candle?symbol={}&resolution=D&from={}&to={}&token={}",
            self.base_url, symbol, from, to, self.api_key
        );
        let candles: FinnhubCandles = self.get_json(&url, symbol).await?;

        if candles.s == "no_data" {
            return Ok(Vec::new());
        }
        if candles.s != "ok" {
            return Err(PriceError::Unavailable(format!(
                "candle status '{}' for {symbol}",
                candles.s
            )));
        }

        let mut closes = Vec::with_capacity(candles.c.len());
        for (ts, close) in candles.t.iter().zip(candles.c.iter()) {
            let date = DateTime::from_timestamp(*ts, 0)
                .ok_or_else(|| PriceError::Unavailable(format!("bad candle timestamp {ts}")))?
                .date_naive();
            closes.push((date, price_from_f64(*close, symbol)?));
        }
        closes.sort_by_key(|(date, _)| *date);
        Ok(closes)
    }

    async fn profile(&self, symbol: &str) -> Result<SymbolProfile, PriceError> {
        let url = format!(
            "{}/api/v1/stock/profile2?symbol={}&token={}",
            self.base_url, symbol, self.api_key
        );
        let profile: FinnhubProfile = self.get_json(&url, symbol).await?;

        // Finnhub answers unknown symbols with an empty object.
        let company_name = profile
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| PriceError::NotFound(symbol.to_string()))?;

        Ok(SymbolProfile {
            company_name,
            sector: None,
            industry: profile.industry.filter(|i| !i.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> FinnhubClient {
        FinnhubClient::new(&server.uri(), "test-token")
    }

    #[tokio::test]
    async fn quote_is_parsed_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/quote"))
            .and(query_param("symbol", "AAPL"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"c":150.65,"d":1.2,"dp":0.8,"pc":149.45}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let first = client.current_price("AAPL").await.unwrap();
        assert_eq!(first, dec!(150.65));

        // Second call inside the TTL must be served from cache; the
        // mock's expect(1) verifies no second request is made.
        let second = client.current_price("AAPL").await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn zero_quote_means_unknown_symbol() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/quote"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"c":0,"d":0,"dp":0,"pc":0}"#),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.current_price("NOPE").await,
            Err(PriceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn http_429_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/quote"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.current_price("AAPL").await,
            Err(PriceError::RateLimited)
        ));
    }

    #[tokio::test]
    async fn candles_become_dated_closes() {
        // 2024-01-02 and 2024-01-03, midnight UTC.
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/stock/candle"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"s":"ok","c":[185.5,184.25],"t":[1704153600,1704240000]}"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let closes = client
            .historical_closes(
                "AAPL",
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            closes,
            vec![
                (NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), dec!(185.5)),
                (NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(), dec!(184.25)),
            ]
        );
    }

    #[tokio::test]
    async fn no_data_candles_are_an_empty_series() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/stock/candle"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"s":"no_data"}"#))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let closes = client
            .historical_closes(
                "NEWCO",
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            )
            .await
            .unwrap();
        assert!(closes.is_empty());
    }

    #[tokio::test]
    async fn profile_parses_name_and_industry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/stock/profile2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"name":"Apple Inc","finnhubIndustry":"Technology"}"#),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let profile = client.profile("AAPL").await.unwrap();
        assert_eq!(profile.company_name, "Apple Inc");
        assert_eq!(profile.industry.as_deref(), Some("Technology"));
    }

    #[tokio::test]
    async fn empty_profile_means_unknown_symbol() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/stock/profile2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.profile("NOPE").await,
            Err(PriceError::NotFound(_))
        ));
    }
}
