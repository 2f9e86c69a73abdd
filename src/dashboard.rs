//! The dashboard web server.
//!
//! Serves the artefacts written by the pipeline (candles, features, news
//! sentiment, training metrics, backtest stats) plus a live valuation of
//! the configured portfolio. Artefacts are read once at start-up and again
//! on `POST /api/reload`.

use axum::{
    body::Body,
    extract::{Path as UrlPath, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use futures::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::{Config, DataConfig};
use crate::core::{
    features_file_name, read_features_csv, read_stats_csv, read_training_metrics, StatRow, TrainingMetrics,
    METRICS_FILE_NAME, STATS_FILE_NAME,
};
use crate::core::dataset::{aggregate_daily_sentiment, DailySentiment};
use crate::models::{Candle, FeatureRow, SentimentRecord};
use crate::services::market_data::read_candles_csv;
use crate::services::portfolio::{Portfolio, PortfolioValuation, PortfolioValuationService};
use crate::services::risk::RiskEngine;
use crate::services::sentiment::{read_sentiment_csv, SENTIMENT_FILE_NAME};
use crate::{PortfolioError, Result};

pub const STREAM_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct PriceSeries {
    /// File-name form of the market, e.g. `BTC_USDT`.
    pub symbol: String,
    pub timeframe: String,
    pub candles: Vec<Candle>,
    pub features: Vec<FeatureRow>,
}

impl PriceSeries {
    fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.candles.last().map(|c| c.timestamp)
    }
}

/// Everything the dashboard shows, as last read from disk.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub portfolio: Option<Portfolio>,
    pub series: Vec<PriceSeries>,
    pub sentiment: Vec<SentimentRecord>,
    pub metrics: Option<TrainingMetrics>,
    pub backtest: Option<Vec<StatRow>>,
    pub loaded_at: DateTime<Utc>,
}

fn optional<T>(what: &str, path: &Path, read: impl FnOnce(&Path) -> Result<T>) -> Option<T> {
    if !path.exists() {
        return None;
    }
    match read(path) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Skipping {} at {}: {}", what, path.display(), e);
            None
        }
    }
}

/// `BTC/USDT`, `btc-usdt` and `BTC_USDT` all name the same market.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase().replace(['/', '-'], "_")
}

impl Snapshot {
    pub fn load(data: &DataConfig) -> Self {
        let portfolio = optional("portfolio", &data.portfolio_file, Portfolio::load);
        let series = load_series(data);
        let sentiment = optional(
            "sentiment",
            &data.processed_dir.join(SENTIMENT_FILE_NAME),
            read_sentiment_csv,
        )
        .unwrap_or_default();
        let metrics = optional(
            "training metrics",
            &data.models_dir.join(METRICS_FILE_NAME),
            read_training_metrics,
        );
        let backtest = optional(
            "backtest stats",
            &data.processed_dir.join(STATS_FILE_NAME),
            read_stats_csv,
        );

        info!(
            "Loaded {} price series, {} sentiment records, portfolio: {}, metrics: {}, backtest: {}",
            series.len(),
            sentiment.len(),
            portfolio.is_some(),
            metrics.is_some(),
            backtest.is_some()
        );

        Self {
            portfolio,
            series,
            sentiment,
            metrics,
            backtest,
            loaded_at: Utc::now(),
        }
    }

    pub fn find_series(&self, symbol: &str, timeframe: Option<&str>) -> Option<&PriceSeries> {
        let symbol = normalize_symbol(symbol);
        self.series
            .iter()
            .filter(|s| s.symbol == symbol)
            .find(|s| timeframe.map_or(true, |tf| s.timeframe == tf))
    }

    /// The freshest series for a market across timeframes.
    fn latest_series(&self, symbol: &str) -> Option<&PriceSeries> {
        let symbol = normalize_symbol(symbol);
        self.series
            .iter()
            .filter(|s| s.symbol == symbol && !s.candles.is_empty())
            .max_by_key(|s| s.last_timestamp())
    }

    /// Value the portfolio at the last close of each held market.
    pub fn valuation(&self) -> Result<PortfolioValuation> {
        let portfolio = self
            .portfolio
            .as_ref()
            .ok_or_else(|| PortfolioError::Portfolio("No portfolio file loaded".to_string()))?;

        let mut prices = HashMap::new();
        let mut history = HashMap::new();
        for symbol in portfolio.symbols() {
            if let Some(series) = self.latest_series(&symbol) {
                if let Some(last) = series.candles.last() {
                    prices.insert(symbol.clone(), last.close);
                }
                history.insert(symbol, series.candles.clone());
            }
        }

        // Risk is annualised at the spacing of the timestamps all series share
        PortfolioValuationService::new(RiskEngine::default()).value_portfolio(portfolio, &prices, &history)
    }
}

fn load_series(data: &DataConfig) -> Vec<PriceSeries> {
    let entries = match fs::read_dir(&data.raw_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read {}: {}", data.raw_dir.display(), e);
            return Vec::new();
        }
    };

    let mut series = Vec::new();
    for entry in entries.flatten() {
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(stem) = file_name
            .strip_prefix("ohlcv_")
            .and_then(|rest| rest.strip_suffix(".csv"))
        else {
            continue;
        };
        let Some((symbol, timeframe)) = stem.rsplit_once('_') else {
            continue;
        };
        let Some(candles) = optional("candles", &entry.path(), read_candles_csv) else {
            continue;
        };
        let features = optional(
            "features",
            &data.processed_dir.join(features_file_name(&file_name)),
            read_features_csv,
        )
        .unwrap_or_default();

        series.push(PriceSeries {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            candles,
            features,
        });
    }
    series.sort_by(|a, b| (&a.symbol, &a.timeframe).cmp(&(&b.symbol, &b.timeframe)));
    series
}

#[derive(Clone)]
pub struct DashboardState {
    pub config: Arc<Config>,
    pub snapshot: Arc<RwLock<Snapshot>>,
    pub stream_interval: Duration,
}

impl DashboardState {
    pub fn new(config: Config) -> Self {
        let snapshot = Snapshot::load(&config.data);
        Self {
            config: Arc::new(config),
            snapshot: Arc::new(RwLock::new(snapshot)),
            stream_interval: STREAM_INTERVAL,
        }
    }

    pub fn with_stream_interval(mut self, every: Duration) -> Self {
        self.stream_interval = every;
        self
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    fn ok<T: Serialize>(message: &str, data: &T) -> std::result::Result<Json<Self>, ApiError> {
        let data = serde_json::to_value(data).map_err(|e| ApiError::internal(e.to_string()))?;
        Ok(Json(Self {
            success: true,
            message: message.to_string(),
            data: Some(data),
        }))
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<PortfolioError> for ApiError {
    fn from(err: PortfolioError) -> Self {
        match err {
            PortfolioError::Portfolio(_) => Self::not_found(err.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse {
            success: false,
            message: self.message,
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult = std::result::Result<Json<ApiResponse>, ApiError>;

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8">
  <title>Crypto AI Portfolio Manager</title>
  <style>
    body { font-family: sans-serif; margin: 2rem; }
    pre { background: #f4f4f4; padding: 1rem; overflow-x: auto; }
  </style>
</head>
<body>
  <h1>Crypto AI Portfolio Manager</h1>
  <h2>Portfolio</h2>
  <pre id="portfolio">waiting for data...</pre>
  <h2>Model</h2>
  <pre id="model">-</pre>
  <h2>Backtest</h2>
  <pre id="backtest">-</pre>
  <h2>News sentiment</h2>
  <pre id="sentiment">-</pre>
  <script>
    const show = (id, body) => {
      document.getElementById(id).textContent = JSON.stringify(body.data ?? body.message, null, 2);
    };
    for (const [id, url] of [["model", "/api/model"], ["backtest", "/api/backtest"], ["sentiment", "/api/sentiment"]]) {
      fetch(url).then(r => r.json()).then(body => show(id, body));
    }
    const events = new EventSource("/api/portfolio/stream");
    events.onmessage = e => show("portfolio", JSON.parse(e.data));
  </script>
</body>
</html>
"#;

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn get_portfolio(State(state): State<DashboardState>) -> ApiResult {
    let snapshot = state.snapshot.read().await;
    let valuation = snapshot.valuation()?;
    ApiResponse::ok("Portfolio valued successfully", &valuation)
}

async fn portfolio_stream(State(state): State<DashboardState>) -> Response {
    let every = state.stream_interval;
    let stream = IntervalStream::new(interval(every)).then(move |_| {
        let state = state.clone();
        async move {
            let snapshot = state.snapshot.read().await;
            let body = match snapshot.valuation() {
                Ok(valuation) => ApiResponse {
                    success: true,
                    message: "Portfolio valued successfully".to_string(),
                    data: serde_json::to_value(valuation).ok(),
                },
                Err(e) => ApiResponse {
                    success: false,
                    message: e.to_string(),
                    data: None,
                },
            };
            let json = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());
            Ok::<String, std::io::Error>(format!("data: {}\n\n", json))
        }
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct PriceQuery {
    timeframe: Option<String>,
}

async fn get_prices(
    State(state): State<DashboardState>,
    UrlPath(symbol): UrlPath<String>,
    Query(query): Query<PriceQuery>,
) -> ApiResult {
    let snapshot = state.snapshot.read().await;
    let series = snapshot
        .find_series(&symbol, query.timeframe.as_deref())
        .ok_or_else(|| ApiError::not_found(format!("No price data for {symbol}")))?;
    ApiResponse::ok("Price data retrieved successfully", series)
}

#[derive(Serialize)]
struct SentimentView<'a> {
    records: &'a [SentimentRecord],
    daily: Vec<DailySentiment>,
}

async fn get_sentiment(State(state): State<DashboardState>) -> ApiResult {
    let snapshot = state.snapshot.read().await;
    if snapshot.sentiment.is_empty() {
        return Err(ApiError::not_found("No news sentiment available"));
    }
    let view = SentimentView {
        records: &snapshot.sentiment,
        daily: aggregate_daily_sentiment(&snapshot.sentiment),
    };
    ApiResponse::ok("Sentiment retrieved successfully", &view)
}

async fn get_model(State(state): State<DashboardState>) -> ApiResult {
    let snapshot = state.snapshot.read().await;
    let metrics = snapshot
        .metrics
        .as_ref()
        .ok_or_else(|| ApiError::not_found("No training metrics available"))?;
    ApiResponse::ok("Training metrics retrieved successfully", metrics)
}

async fn get_backtest(State(state): State<DashboardState>) -> ApiResult {
    let snapshot = state.snapshot.read().await;
    let stats = snapshot
        .backtest
        .as_ref()
        .ok_or_else(|| ApiError::not_found("No backtest stats available"))?;
    ApiResponse::ok("Backtest stats retrieved successfully", stats)
}

async fn reload(State(state): State<DashboardState>) -> ApiResult {
    let data = state.config.data.clone();
    let fresh = tokio::task::spawn_blocking(move || Snapshot::load(&data))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let summary = serde_json::json!({
        "series": fresh.series.len(),
        "sentiment_records": fresh.sentiment.len(),
        "portfolio": fresh.portfolio.is_some(),
        "metrics": fresh.metrics.is_some(),
        "backtest": fresh.backtest.is_some(),
    });
    *state.snapshot.write().await = fresh;
    info!("Dashboard data reloaded");
    ApiResponse::ok("Dashboard data reloaded", &summary)
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/api/portfolio", get(get_portfolio))
        .route("/api/portfolio/stream", get(portfolio_stream))
        .route("/api/prices/:symbol", get(get_prices))
        .route("/api/sentiment", get(get_sentiment))
        .route("/api/model", get(get_model))
        .route("/api/backtest", get(get_backtest))
        .route("/api/reload", post(reload))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

/// Bind `dashboard.listen_addr()` and serve until the process stops.
pub async fn serve(config: Config) -> Result<()> {
    let addr = config.dashboard.listen_addr();
    let state = DashboardState::new(config);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Dashboard listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
