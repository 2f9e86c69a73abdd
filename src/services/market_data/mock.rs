use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;

use super::OhlcvProvider;
use crate::models::{Candle, Timeframe};
use crate::Result;

/// Offline OHLCV source: a seeded geometric random walk on a fixed time grid.
///
/// The same seed always yields the same series, however it is paged.
pub struct MockOhlcvProvider {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_price: f64,
    /// Per-bar log drift.
    pub drift: f64,
    /// Per-bar log volatility.
    pub volatility: f64,
    pub seed: u64,
}

impl Default for MockOhlcvProvider {
    fn default() -> Self {
        let end = Utc::now();
        Self::new(end - Duration::days(365), end, 42)
    }
}

impl MockOhlcvProvider {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, seed: u64) -> Self {
        Self {
            start,
            end,
            initial_price: 30_000.0,
            drift: 0.0002,
            volatility: 0.02,
            seed,
        }
    }

    pub fn with_walk(mut self, initial_price: f64, drift: f64, volatility: f64) -> Self {
        self.initial_price = initial_price;
        self.drift = drift;
        self.volatility = volatility;
        self
    }

    fn bar_count(&self, step_ms: i64) -> usize {
        let span = self.end.timestamp_millis() - self.start.timestamp_millis();
        if span < 0 {
            0
        } else {
            (span / step_ms) as usize + 1
        }
    }

    /// First `n` bars of the walk for `symbol`.
    pub fn series(&self, symbol: &str, timeframe: Timeframe, n: usize) -> Vec<Candle> {
        let step_ms = timeframe.duration().num_milliseconds();
        let symbol_salt = symbol.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        let mut rng = StdRng::seed_from_u64(self.seed ^ symbol_salt);
        let start_ms = self.start.timestamp_millis();

        let mut candles = Vec::with_capacity(n);
        let mut price = self.initial_price;
        for i in 0..n {
            let z: f64 = rng.sample(StandardNormal);
            let wick: f64 = rng.sample(StandardNormal);
            let open = price;
            let close = open * (self.drift + self.volatility * z).exp();
            let spread = (self.volatility * wick.abs() * 0.5).min(0.5);
            let high = open.max(close) * (1.0 + spread);
            let low = open.min(close) * (1.0 - spread);
            let volume = 100.0 + rng.gen::<f64>() * 900.0;
            let ts = Utc
                .timestamp_millis_opt(start_ms + i as i64 * step_ms)
                .single()
                .unwrap_or(self.start);
            candles.push(Candle::new(ts, open, high, low, close, volume));
            price = close;
        }
        candles
    }

    fn page(&self, symbol: &str, timeframe: Timeframe, since_ms: i64, limit: usize) -> Vec<Candle> {
        let step_ms = timeframe.duration().num_milliseconds();
        let total = self.bar_count(step_ms);
        let offset = since_ms - self.start.timestamp_millis();
        // Round up to the next grid point at or after `since`
        let first = if offset <= 0 { 0 } else { ((offset + step_ms - 1) / step_ms) as usize };
        if first >= total {
            return Vec::new();
        }
        let last = (first + limit).min(total);
        self.series(symbol, timeframe, last).split_off(first)
    }
}

impl OhlcvProvider for MockOhlcvProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn fetch_ohlcv<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Candle>>> + Send + 'a>> {
        let result = self.page(symbol, timeframe, since_ms, limit);
        Box::pin(async move { Ok(result) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_contiguous_and_deterministic() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let provider = MockOhlcvProvider::new(start, start + Duration::hours(9), 7);

        let first = provider.page("BTC/USDT", Timeframe::H1, start.timestamp_millis(), 4);
        assert_eq!(first.len(), 4);
        let next_since = first[3].timestamp_ms() + 1;
        let second = provider.page("BTC/USDT", Timeframe::H1, next_since, 4);
        assert_eq!(second[0].timestamp, start + Duration::hours(4));
        assert_eq!(second[0].open, first[3].close);

        let rest = provider.page("BTC/USDT", Timeframe::H1, second[3].timestamp_ms() + 1, 4);
        assert_eq!(rest.len(), 2);
        let done = provider.page("BTC/USDT", Timeframe::H1, rest[1].timestamp_ms() + 1, 4);
        assert!(done.is_empty());
    }

    #[test]
    fn candles_are_well_formed() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let provider = MockOhlcvProvider::new(start, start + Duration::days(30), 1);
        for c in provider.series("ETH/USDT", Timeframe::D1, 31) {
            assert!(c.high >= c.open.max(c.close));
            assert!(c.low <= c.open.min(c.close));
            assert!(c.low > 0.0);
            assert!(c.volume >= 100.0);
        }
    }
}
