mod config;
mod db;
mod error;
mod handlers;
mod ledger;
mod market;
mod models;
mod position;
mod valuation;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DatabasePool;
use crate::handlers::{
    accounts::{create_account, get_balance},
    portfolio::{get_portfolio, get_transaction_history, get_valuation_history},
    trading::{buy_stock, sell_stock},
    AppState,
};
use crate::market::FinnhubClient;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderValue;
use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Method;
use tower_http::cors::CorsLayer;
use tower_http::trace::{self, TraceLayer};
use tracing::Level;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set the log level based on the first argument
    let args: Vec<String> = std::env::args().collect();
    let mut log_level = Level::INFO;
    if args.len() >= 2 {
        log_level = match args[1].as_str() {
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .with_max_level(log_level)
        .init();

    tracing::info!("Log level set to: {}", log_level);

    // Initalize dotenv so we can read .env file
    dotenv::dotenv().ok();
    let config = AppConfig::from_env()?;

    // Initialize CORS layer for the frontend origin
    let cors = CorsLayer::new()
        .allow_origin(config.frontend_url.parse::<HeaderValue>()?)
        .allow_methods(vec![Method::GET, Method::POST])
        .allow_headers(vec![CONTENT_TYPE]);

    // Ledger store and price source, passed to handlers as shared state
    let pool = DatabasePool::open(&config.db_path)?;
    let state = AppState {
        pool,
        market: Arc::new(FinnhubClient::new(
            &config.finnhub_base_url,
            &config.finnhub_api_key,
        )),
    };

    // Build application with routes
    let app = Router::new()
        // Account routes
        .route("/account", post(create_account))
        .route("/balance", get(get_balance))
        // Trading routes
        .route("/buy", post(buy_stock))
        .route("/sell", post(sell_stock))
        // Portfolio routes
        .route("/portfolio", get(get_portfolio))
        .route("/portfolio/history", get(get_valuation_history))
        .route("/transactions", get(get_transaction_history))
        // Shared app state
        .with_state(state)
        // CORS and tracing layers
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        );

    // Run server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Listening on: {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
