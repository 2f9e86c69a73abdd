//! Binance spot klines over REST.
//!
//! Public market data needs no signature; the API key, when configured, is
//! sent as `X-MBX-APIKEY` so requests count against the account's weight.

use std::future::Future;
use std::pin::Pin;

use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::{OhlcvProvider, DEFAULT_PAGE_LIMIT};
use crate::models::{Candle, Timeframe};
use crate::{PortfolioError, Result};

pub struct BinanceOhlcvProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl BinanceOhlcvProvider {
    pub fn new<S: Into<String>>(base_url: S, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    async fn do_fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.base_url.trim_end_matches('/'));
        let limit = limit.clamp(1, DEFAULT_PAGE_LIMIT).to_string();
        let start = since_ms.to_string();
        let market = exchange_symbol(symbol);
        let query = [
            ("symbol", market.as_str()),
            ("interval", timeframe.as_str()),
            ("startTime", start.as_str()),
            ("limit", limit.as_str()),
        ];

        let mut request = self.client.get(&url).query(&query);
        if let Some(ref key) = self.api_key {
            request = request.header("X-MBX-APIKEY", key);
        }

        let resp = request.send().await.map_err(PortfolioError::Network)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let rows: Vec<Vec<Value>> = resp.json().await.map_err(PortfolioError::Network)?;
        debug!("Binance returned {} klines for {}", rows.len(), market);
        rows.iter().map(|row| parse_kline(row)).collect()
    }
}

impl OhlcvProvider for BinanceOhlcvProvider {
    fn name(&self) -> &str {
        "binance"
    }

    fn fetch_ohlcv<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Candle>>> + Send + 'a>> {
        Box::pin(self.do_fetch_ohlcv(symbol, timeframe, since_ms, limit))
    }
}

/// `BTC/USDT` -> `BTCUSDT`
pub fn exchange_symbol(symbol: &str) -> String {
    symbol.replace(['/', '-', '_'], "").to_uppercase()
}

fn classify_status(status: StatusCode, body: String) -> PortfolioError {
    // 418 is Binance's IP ban after ignoring 429s
    if status == StatusCode::TOO_MANY_REQUESTS
        || status.as_u16() == 418
        || status.is_server_error()
    {
        PortfolioError::RateLimited(format!("HTTP {status}: {body}"))
    } else {
        PortfolioError::Exchange(format!("HTTP {status}: {body}"))
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// `[open_time, "open", "high", "low", "close", "volume", close_time, ...]`
pub fn parse_kline(row: &[Value]) -> Result<Candle> {
    let bad = || PortfolioError::MarketData(format!("Malformed kline: {row:?}"));
    if row.len() < 6 {
        return Err(bad());
    }
    let open_ms = row[0].as_i64().ok_or_else(bad)?;
    let timestamp = Utc.timestamp_millis_opt(open_ms).single().ok_or_else(bad)?;
    Ok(Candle {
        timestamp,
        open: number(&row[1]).ok_or_else(bad)?,
        high: number(&row[2]).ok_or_else(bad)?,
        low: number(&row[3]).ok_or_else(bad)?,
        close: number(&row[4]).ok_or_else(bad)?,
        volume: number(&row[5]).ok_or_else(bad)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_kline_row() {
        let row = json!([1499040000000i64, "0.01634790", "0.80000000", "0.01575800", "0.01577100", "148976.11427815", 1499644799999i64, "2434.19", 308, "1756.87", "28.46", "0"]);
        let candle = parse_kline(row.as_array().unwrap()).unwrap();
        assert_eq!(candle.timestamp_ms(), 1499040000000);
        assert!((candle.close - 0.015771).abs() < 1e-12);
        assert!((candle.volume - 148976.11427815).abs() < 1e-6);
    }

    #[test]
    fn rejects_short_rows() {
        let row = json!([1499040000000i64, "1.0"]);
        assert!(parse_kline(row.as_array().unwrap()).is_err());
    }

    #[test]
    fn symbol_conversion() {
        assert_eq!(exchange_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(exchange_symbol("eth-usdt"), "ETHUSDT");
    }

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(!classify_status(StatusCode::BAD_REQUEST, String::new()).is_retryable());
    }
}
