//! Rolling-window technical indicators.
//!
//! Every function returns one slot per input value. A slot is `None` until
//! its window is full or while any input inside the window is missing, so
//! the output lines up index-for-index with the candles it came from.

use std::path::Path;

use crate::models::{Candle, FeatureRow};
use crate::storage;
use crate::{PortfolioError, Result};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorParams {
    pub ma_short: usize,
    pub ma_long: usize,
    pub rsi_period: usize,
    pub momentum_period: usize,
    pub volatility_window: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            ma_short: 10,
            ma_long: 50,
            rsi_period: 14,
            momentum_period: 5,
            volatility_window: 20,
        }
    }
}

impl IndicatorParams {
    pub fn validate(&self) -> Result<()> {
        for (name, window) in [
            ("ma_short", self.ma_short),
            ("ma_long", self.ma_long),
            ("rsi_period", self.rsi_period),
            ("momentum_period", self.momentum_period),
            ("volatility_window", self.volatility_window),
        ] {
            if window == 0 {
                return Err(PortfolioError::Indicator(format!("{name} must be at least 1")));
            }
        }
        // sample std needs two points
        if self.volatility_window < 2 {
            return Err(PortfolioError::Indicator(
                "volatility_window must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

fn rolling_apply<F>(values: &[Option<f64>], window: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let mut out = vec![None; values.len()];
    if window == 0 {
        return out;
    }
    let mut buf = Vec::with_capacity(window);
    for end in window.saturating_sub(1)..values.len() {
        buf.clear();
        buf.extend(values[end + 1 - window..=end].iter().flatten());
        if buf.len() == window {
            out[end] = f(&buf);
        }
    }
    out
}

fn mean(window: &[f64]) -> Option<f64> {
    Some(window.iter().sum::<f64>() / window.len() as f64)
}

fn sample_std(window: &[f64]) -> Option<f64> {
    if window.len() < 2 {
        return None;
    }
    let m = window.iter().sum::<f64>() / window.len() as f64;
    let var = window.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (window.len() - 1) as f64;
    Some(var.sqrt())
}

fn present(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().map(|&v| Some(v)).collect()
}

/// Simple moving average.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling_apply(&present(values), window, mean)
}

/// Rolling sample standard deviation (n - 1 denominator).
pub fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling_apply(&present(values), window, sample_std)
}

pub fn diff(values: &[f64]) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| if i == 0 { None } else { Some(values[i] - values[i - 1]) })
        .collect()
}

/// `values[i] / values[i - periods] - 1`. A zero base has no defined change.
pub fn pct_change(values: &[f64], periods: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if periods == 0 || i < periods {
                return None;
            }
            let base = values[i - periods];
            if base == 0.0 {
                None
            } else {
                Some(values[i] / base - 1.0)
            }
        })
        .collect()
}

/// Relative Strength Index using simple rolling means of gains and losses.
///
/// The first bar has no previous close and counts as an unchanged bar, so
/// the first value appears at index `period - 1`.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let deltas = diff(values);
    let gains: Vec<f64> = deltas.iter().map(|d| d.filter(|v| *v > 0.0).unwrap_or(0.0)).collect();
    let losses: Vec<f64> = deltas
        .iter()
        .map(|d| d.filter(|v| *v < 0.0).map(|v| -v).unwrap_or(0.0))
        .collect();

    let avg_gain = rolling_mean(&gains, period);
    let avg_loss = rolling_mean(&losses, period);

    avg_gain
        .iter()
        .zip(avg_loss.iter())
        .map(|(g, l)| match (g, l) {
            (Some(g), Some(l)) => {
                if *l == 0.0 {
                    if *g > 0.0 {
                        Some(100.0)
                    } else {
                        None
                    }
                } else {
                    Some(100.0 - 100.0 / (1.0 + g / l))
                }
            }
            _ => None,
        })
        .collect()
}

/// Attach moving averages, RSI, momentum and volatility to each candle.
///
/// Rows where any indicator is still warming up are dropped.
pub fn compute_technical_features(candles: &[Candle], params: &IndicatorParams) -> Result<Vec<FeatureRow>> {
    params.validate()?;

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let ma_short = rolling_mean(&closes, params.ma_short);
    let ma_long = rolling_mean(&closes, params.ma_long);
    let rsi_values = rsi(&closes, params.rsi_period);
    let momentum = pct_change(&closes, params.momentum_period);
    let volatility = rolling_apply(&pct_change(&closes, 1), params.volatility_window, sample_std);

    let rows: Vec<FeatureRow> = candles
        .iter()
        .enumerate()
        .filter_map(|(i, c)| {
            Some(FeatureRow {
                timestamp: c.timestamp,
                open: c.open,
                high: c.high,
                low: c.low,
                close: c.close,
                volume: c.volume,
                ma_short: ma_short[i]?,
                ma_long: ma_long[i]?,
                rsi: rsi_values[i]?,
                momentum_5: momentum[i]?,
                volatility_20: volatility[i]?,
            })
        })
        .collect();

    if rows.is_empty() {
        return Err(PortfolioError::Indicator(format!(
            "No complete feature rows from {} candles (need more than {} bars)",
            candles.len(),
            params.ma_long.max(params.volatility_window)
        )));
    }

    info!(
        "Computed features for {} of {} candles",
        rows.len(),
        candles.len()
    );
    Ok(rows)
}

/// `ohlcv_BTC_USDT_1h.csv` -> `features_prices_BTC_USDT_1h.csv`
pub fn features_file_name(ohlcv_file: &str) -> String {
    let base = ohlcv_file.strip_prefix("ohlcv_").unwrap_or(ohlcv_file);
    format!("features_prices_{base}")
}

pub fn write_features_csv(path: &Path, rows: &[FeatureRow]) -> Result<()> {
    storage::write_csv(path, rows)?;
    info!("Saved {} feature rows to {}", rows.len(), path.display());
    Ok(())
}

pub fn read_features_csv(path: &Path) -> Result<Vec<FeatureRow>> {
    let mut rows: Vec<FeatureRow> = storage::read_csv(path)?;
    rows.sort_by_key(|r| r.timestamp);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn close_enough(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn rolling_mean_waits_for_full_window() {
        let out = rolling_mean(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert!(close_enough(out[2].unwrap(), 2.0));
        assert!(close_enough(out[3].unwrap(), 3.0));
    }

    #[test]
    fn rolling_std_is_sample_std() {
        let out = rolling_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 8);
        // population std is 2.0 for this series, sample std is sqrt(32/7)
        assert!(close_enough(out[7].unwrap(), (32.0f64 / 7.0).sqrt()));
    }

    #[test]
    fn pct_change_handles_offsets_and_zero_base() {
        let out = pct_change(&[100.0, 110.0, 0.0, 5.0], 1);
        assert_eq!(out[0], None);
        assert!(close_enough(out[1].unwrap(), 0.1));
        assert!(close_enough(out[2].unwrap(), -1.0));
        assert_eq!(out[3], None);
    }

    #[test]
    fn rsi_saturates_on_monotonic_series() {
        let up: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let out = rsi(&up, 14);
        assert_eq!(out[12], None);
        assert_eq!(out[13], Some(100.0));

        let down: Vec<f64> = (1..=20).rev().map(|x| x as f64).collect();
        assert_eq!(rsi(&down, 14)[19], Some(0.0));

        let flat = vec![5.0; 20];
        assert_eq!(rsi(&flat, 14)[19], None);
    }

    #[test]
    fn rsi_balanced_moves_is_fifty() {
        let zigzag: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 10.0 } else { 11.0 }).collect();
        // the 14 deltas ending at index 15 hold 7 ups and 7 downs
        let out = rsi(&zigzag, 14);
        assert!(close_enough(out[15].unwrap(), 50.0));
    }

    #[test]
    fn features_drop_warmup_rows() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles: Vec<Candle> = (0..80)
            .map(|i| {
                let p = 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64 * 0.1;
                Candle::new(start + Duration::days(i), p, p + 1.0, p - 1.0, p, 10.0)
            })
            .collect();
        let rows = compute_technical_features(&candles, &IndicatorParams::default()).unwrap();
        // first complete row is the 50th candle
        assert_eq!(rows.len(), 31);
        assert_eq!(rows[0].timestamp, candles[49].timestamp);
        assert!(rows.iter().all(|r| r.rsi >= 0.0 && r.rsi <= 100.0));
    }

    #[test]
    fn too_few_candles_is_an_error() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles: Vec<Candle> = (0..10)
            .map(|i| Candle::new(start + Duration::days(i), 1.0, 1.0, 1.0, 1.0 + i as f64, 1.0))
            .collect();
        assert!(matches!(
            compute_technical_features(&candles, &IndicatorParams::default()),
            Err(PortfolioError::Indicator(_))
        ));
    }

    #[test]
    fn feature_file_name_follows_ohlcv_name() {
        assert_eq!(
            features_file_name("ohlcv_BTC_USDT_1h.csv"),
            "features_prices_BTC_USDT_1h.csv"
        );
    }
}
