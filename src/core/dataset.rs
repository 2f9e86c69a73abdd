use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::models::{DatasetRow, FeatureRow, SentimentRecord};
use crate::storage;
use crate::{PortfolioError, Result};

pub const DATASET_FILE_NAME: &str = "training_dataset.csv";

/// Columns never fed to the classifier: the label itself plus the news
/// columns, which are sparse for most of the price history.
pub const EXCLUDED_FEATURE_COLUMNS: [&str; 3] = ["target", "sentiment_mean", "news_volume"];

const DATASET_COLUMNS: [&str; 13] = [
    "open",
    "high",
    "low",
    "close",
    "volume",
    "ma_short",
    "ma_long",
    "rsi",
    "momentum_5",
    "volatility_20",
    "sentiment_mean",
    "news_volume",
    "target",
];

pub fn default_feature_columns() -> Vec<String> {
    DATASET_COLUMNS
        .iter()
        .filter(|c| !EXCLUDED_FEATURE_COLUMNS.contains(c))
        .map(|c| c.to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailySentiment {
    pub date: NaiveDate,
    pub sentiment_mean: f64,
    pub news_volume: u32,
}

/// Mean score and article count per UTC calendar day.
///
/// The result covers every day from the first to the last record; days in
/// between without news get a zero mean and zero volume.
pub fn aggregate_daily_sentiment(records: &[SentimentRecord]) -> Vec<DailySentiment> {
    let mut by_day: BTreeMap<NaiveDate, (f64, u32)> = BTreeMap::new();
    for record in records {
        let entry = by_day.entry(record.timestamp.date_naive()).or_insert((0.0, 0));
        entry.0 += record.sentiment_score;
        entry.1 += 1;
    }

    let (first, last) = match (by_day.keys().next(), by_day.keys().next_back()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Vec::new(),
    };

    first
        .iter_days()
        .take_while(|day| *day <= last)
        .map(|date| match by_day.get(&date) {
            Some((sum, count)) => DailySentiment {
                date,
                sentiment_mean: sum / *count as f64,
                news_volume: *count,
            },
            None => DailySentiment {
                date,
                sentiment_mean: 0.0,
                news_volume: 0,
            },
        })
        .collect()
}

/// Join features with the day's news sentiment and label each row with
/// whether the close `horizon` bars later is higher.
pub fn build_training_dataset(
    features: &[FeatureRow],
    sentiment: &[SentimentRecord],
    horizon: usize,
) -> Result<Vec<DatasetRow>> {
    if horizon == 0 {
        return Err(PortfolioError::Dataset("horizon must be at least 1".to_string()));
    }
    if features.len() <= horizon {
        return Err(PortfolioError::Dataset(format!(
            "Need more than {} feature rows to label a {}-bar horizon, got {}",
            horizon,
            horizon,
            features.len()
        )));
    }

    let daily: BTreeMap<NaiveDate, DailySentiment> = aggregate_daily_sentiment(sentiment)
        .into_iter()
        .map(|d| (d.date, d))
        .collect();

    let mut features = features.to_vec();
    features.sort_by_key(|f| f.timestamp);

    let rows: Vec<DatasetRow> = features
        .iter()
        .zip(features.iter().skip(horizon))
        .map(|(row, future)| {
            let day = daily.get(&row.timestamp.date_naive());
            DatasetRow {
                timestamp: row.timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
                ma_short: row.ma_short,
                ma_long: row.ma_long,
                rsi: row.rsi,
                momentum_5: row.momentum_5,
                volatility_20: row.volatility_20,
                sentiment_mean: day.map_or(0.0, |d| d.sentiment_mean),
                news_volume: day.map_or(0, |d| d.news_volume),
                target: u8::from(future.close > row.close),
            }
        })
        .collect();

    let with_news = rows.iter().filter(|r| r.news_volume > 0).count();
    info!(
        "Built {} dataset rows ({} with news coverage)",
        rows.len(),
        with_news
    );
    Ok(rows)
}

pub fn write_dataset_csv(path: &Path, rows: &[DatasetRow]) -> Result<()> {
    storage::write_csv(path, rows)?;
    info!("Saved training dataset ({} rows) to {}", rows.len(), path.display());
    Ok(())
}

pub fn read_dataset_csv(path: &Path) -> Result<Vec<DatasetRow>> {
    let mut rows: Vec<DatasetRow> = storage::read_csv(path)?;
    if rows.is_empty() {
        return Err(PortfolioError::Dataset(format!("{} has no rows", path.display())));
    }
    rows.sort_by_key(|r| r.timestamp);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn record(ts: DateTime<Utc>, score: f64) -> SentimentRecord {
        SentimentRecord {
            timestamp: ts,
            sentiment_score: score,
            reasoning: String::new(),
            title: "t".into(),
        }
    }

    fn feature(ts: DateTime<Utc>, close: f64) -> FeatureRow {
        FeatureRow {
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            ma_short: close,
            ma_long: close,
            rsi: 50.0,
            momentum_5: 0.0,
            volatility_20: 0.01,
        }
    }

    #[test]
    fn daily_aggregate_fills_gaps() {
        let records = vec![record(at(1, 9), 0.5), record(at(1, 18), -0.1), record(at(3, 12), 1.0)];
        let daily = aggregate_daily_sentiment(&records);
        assert_eq!(daily.len(), 3);
        assert!((daily[0].sentiment_mean - 0.2).abs() < 1e-12);
        assert_eq!(daily[0].news_volume, 2);
        assert_eq!(daily[1].sentiment_mean, 0.0);
        assert_eq!(daily[1].news_volume, 0);
        assert_eq!(daily[2].news_volume, 1);
    }

    #[test]
    fn dataset_labels_next_close_and_drops_tail() {
        let start = at(1, 0);
        let closes = [10.0, 11.0, 10.5, 10.5, 12.0];
        let features: Vec<FeatureRow> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| feature(start + Duration::days(i as i64), *c))
            .collect();
        let sentiment = vec![record(at(2, 15), 0.4)];

        let rows = build_training_dataset(&features, &sentiment, 1).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows.iter().map(|r| r.target).collect::<Vec<_>>(), vec![1, 0, 0, 1]);
        assert_eq!(rows[0].news_volume, 0);
        assert!((rows[1].sentiment_mean - 0.4).abs() < 1e-12);
        assert_eq!(rows[1].news_volume, 1);
    }

    #[test]
    fn dataset_needs_rows_beyond_horizon() {
        let features = vec![feature(at(1, 0), 1.0)];
        assert!(build_training_dataset(&features, &[], 1).is_err());
        assert!(build_training_dataset(&features, &[], 0).is_err());
    }

    #[test]
    fn default_features_skip_label_and_news() {
        let cols = default_feature_columns();
        assert_eq!(cols.len(), 10);
        assert!(!cols.iter().any(|c| c == "target" || c == "sentiment_mean"));
        assert_eq!(cols[0], "open");
        assert_eq!(cols[9], "volatility_20");
    }
}
