use crate::config::ExchangeConfig;
use crate::models::{Candle, Timeframe};
use crate::storage;
use crate::{PortfolioError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

// Submodules for concrete providers
pub mod mock;
pub use mock::*;

pub mod binance;
pub use binance::*;

/// Largest page most exchanges serve per klines request.
pub const DEFAULT_PAGE_LIMIT: usize = 1000;

// Object-safe so providers can be swapped behind an Arc at runtime
pub trait OhlcvProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Up to `limit` candles whose open time is at or after `since_ms`, oldest first.
    fn fetch_ohlcv<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Candle>>> + Send + 'a>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OhlcvProviderKind {
    Mock,
    Binance,
}

pub fn make_ohlcv_provider(kind: OhlcvProviderKind, config: &ExchangeConfig) -> Arc<dyn OhlcvProvider> {
    match kind {
        OhlcvProviderKind::Mock => Arc::new(mock::MockOhlcvProvider::default()),
        OhlcvProviderKind::Binance => Arc::new(binance::BinanceOhlcvProvider::new(
            config.rest_url.clone(),
            config.api_key.clone(),
        )),
    }
}

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub page_limit: usize,
    /// Pause between successful pages.
    pub rate_limit: Duration,
    /// Pause before retrying after a transient failure.
    pub retry_delay: Duration,
    /// Consecutive transient failures tolerated before giving up.
    pub max_retries: u32,
    pub end: Option<DateTime<Utc>>,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            page_limit: DEFAULT_PAGE_LIMIT,
            rate_limit: Duration::from_millis(1200),
            retry_delay: Duration::from_secs(5),
            max_retries: 5,
            end: None,
        }
    }
}

/// Page through the provider from `start` until it returns an empty page.
///
/// Each next request starts one millisecond after the last candle received.
/// Transient errors are retried after `retry_delay`; any other error aborts
/// the backfill. The result is sorted and free of duplicate timestamps.
pub async fn fetch_historical_ohlcv(
    provider: &dyn OhlcvProvider,
    symbol: &str,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    options: &BackfillOptions,
) -> Result<Vec<Candle>> {
    info!(
        "Fetching {} ({}) from {} via {}",
        symbol,
        timeframe,
        start.to_rfc3339(),
        provider.name()
    );

    let end_ms = options.end.map(|e| e.timestamp_millis());
    let mut since = start.timestamp_millis();
    let mut all = Vec::new();
    let mut failures = 0u32;

    loop {
        match provider.fetch_ohlcv(symbol, timeframe, since, options.page_limit).await {
            Ok(page) => {
                failures = 0;
                let last_ms = match page.last() {
                    Some(candle) => candle.timestamp_ms(),
                    None => break,
                };
                info!("  > Received {} candles, last {}", page.len(), page[page.len() - 1].timestamp.to_rfc3339());
                all.extend(page);

                if end_ms.map_or(false, |end| last_ms >= end) {
                    break;
                }
                if last_ms < since {
                    warn!("Provider returned candles older than requested; stopping backfill");
                    break;
                }
                since = last_ms + 1;

                if !options.rate_limit.is_zero() {
                    sleep(options.rate_limit).await;
                }
            }
            Err(e) if e.is_retryable() => {
                failures += 1;
                if failures > options.max_retries {
                    error!("Giving up on {} after {} failed attempts: {}", symbol, failures, e);
                    return Err(e);
                }
                warn!("Network error: {}. Retrying in {:?}...", e, options.retry_delay);
                sleep(options.retry_delay).await;
            }
            Err(e) => {
                error!("Exchange error for {}: {}. Aborting.", symbol, e);
                return Err(e);
            }
        }
    }

    let mut candles = normalize_candles(all);
    if let Some(end) = end_ms {
        candles.retain(|c| c.timestamp_ms() <= end);
    }
    info!("Backfill complete. {} candles for {}", candles.len(), symbol);
    Ok(candles)
}

/// Sort by open time and drop repeated timestamps, keeping the first copy.
pub fn normalize_candles(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    candles
}

/// Accepts `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp.
pub fn parse_start_date(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .ok_or_else(|| PortfolioError::Configuration(format!("Invalid date: {input}")));
    }
    Ok(DateTime::parse_from_rfc3339(input)?.with_timezone(&Utc))
}

/// `BTC/USDT` + 1h -> `ohlcv_BTC_USDT_1h.csv`
pub fn ohlcv_file_name(symbol: &str, timeframe: Timeframe) -> String {
    format!("ohlcv_{}_{}.csv", symbol.replace('/', "_"), timeframe)
}

pub fn write_candles_csv(path: &Path, candles: &[Candle]) -> Result<()> {
    storage::write_csv(path, candles)?;
    info!("Saved {} candles to {}", candles.len(), path.display());
    Ok(())
}

pub fn read_candles_csv(path: &Path) -> Result<Vec<Candle>> {
    let candles: Vec<Candle> = storage::read_csv(path)?;
    Ok(normalize_candles(candles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(ms: i64, close: f64) -> Candle {
        Candle::new(Utc.timestamp_millis_opt(ms).unwrap(), close, close, close, close, 1.0)
    }

    #[test]
    fn normalize_keeps_first_duplicate() {
        let candles = vec![candle(2000, 2.0), candle(1000, 1.0), candle(2000, 9.0)];
        let normalized = normalize_candles(candles);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].close, 1.0);
        assert_eq!(normalized[1].close, 2.0);
    }

    #[test]
    fn parses_both_date_forms() {
        let d = parse_start_date("2023-01-01").unwrap();
        assert_eq!(d, Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        let d = parse_start_date("2025-10-27T00:00:00Z").unwrap();
        assert_eq!(d, Utc.with_ymd_and_hms(2025, 10, 27, 0, 0, 0).unwrap());
        assert!(parse_start_date("yesterday").is_err());
    }

    #[test]
    fn file_name_replaces_slash() {
        assert_eq!(ohlcv_file_name("BTC/USDT", Timeframe::H1), "ohlcv_BTC_USDT_1h.csv");
        assert_eq!(ohlcv_file_name("ETH/USDT", Timeframe::D1), "ohlcv_ETH_USDT_1d.csv");
    }
}
