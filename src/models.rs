use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{PortfolioError, Result};

/// One OHLCV bar. `timestamp` is the bar's open time in UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(rename = "datetime")]
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self { timestamp, open, high, low, close, volume }
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H8,
    H12,
    D1,
    D3,
    W1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::D3 => "3d",
            Timeframe::W1 => "1w",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M3 => Duration::minutes(3),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::M30 => Duration::minutes(30),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H2 => Duration::hours(2),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::H6 => Duration::hours(6),
            Timeframe::H8 => Duration::hours(8),
            Timeframe::H12 => Duration::hours(12),
            Timeframe::D1 => Duration::days(1),
            Timeframe::D3 => Duration::days(3),
            Timeframe::W1 => Duration::weeks(1),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self> {
        let tf = match s.trim() {
            "1m" => Timeframe::M1,
            "3m" => Timeframe::M3,
            "5m" => Timeframe::M5,
            "15m" => Timeframe::M15,
            "30m" => Timeframe::M30,
            "1h" => Timeframe::H1,
            "2h" => Timeframe::H2,
            "4h" => Timeframe::H4,
            "6h" => Timeframe::H6,
            "8h" => Timeframe::H8,
            "12h" => Timeframe::H12,
            "1d" => Timeframe::D1,
            "3d" => Timeframe::D3,
            "1w" => Timeframe::W1,
            other => {
                return Err(PortfolioError::Configuration(format!("Unsupported timeframe: {other}")))
            }
        };
        Ok(tf)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsSource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Article in NewsAPI's wire shape, which is also the on-disk shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsArticle {
    #[serde(default)]
    pub source: Option<NewsSource>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsBatch {
    pub status: String,
    #[serde(default)]
    pub total_results: u64,
    #[serde(default)]
    pub articles: Vec<NewsArticle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl NewsBatch {
    pub fn is_empty(&self) -> bool {
        self.total_results == 0 || self.articles.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentRecord {
    #[serde(rename = "datetime")]
    pub timestamp: DateTime<Utc>,
    pub sentiment_score: f64,
    pub reasoning: String,
    pub title: String,
}

/// A candle plus the technical indicators computed up to and including it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    #[serde(rename = "datetime")]
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub ma_short: f64,
    pub ma_long: f64,
    pub rsi: f64,
    pub momentum_5: f64,
    pub volatility_20: f64,
}

/// A feature row joined with daily news sentiment and the next-bar target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    #[serde(rename = "datetime")]
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub ma_short: f64,
    pub ma_long: f64,
    pub rsi: f64,
    pub momentum_5: f64,
    pub volatility_20: f64,
    pub sentiment_mean: f64,
    pub news_volume: u32,
    pub target: u8,
}

impl DatasetRow {
    pub fn column(&self, name: &str) -> Option<f64> {
        let value = match name {
            "open" => self.open,
            "high" => self.high,
            "low" => self.low,
            "close" => self.close,
            "volume" => self.volume,
            "ma_short" => self.ma_short,
            "ma_long" => self.ma_long,
            "rsi" => self.rsi,
            "momentum_5" => self.momentum_5,
            "volatility_20" => self.volatility_20,
            "sentiment_mean" => self.sentiment_mean,
            "news_volume" => self.news_volume as f64,
            "target" => self.target as f64,
            _ => return None,
        };
        Some(value)
    }

    pub fn feature_vector(&self, names: &[String]) -> Result<Vec<f64>> {
        names
            .iter()
            .map(|name| {
                self.column(name)
                    .ok_or_else(|| PortfolioError::Dataset(format!("Unknown column: {name}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_round_trips_through_str() {
        for s in ["1m", "15m", "1h", "4h", "1d", "1w"] {
            let tf: Timeframe = s.parse().unwrap();
            assert_eq!(tf.as_str(), s);
        }
        assert!("2y".parse::<Timeframe>().is_err());
        assert_eq!(Timeframe::H4.duration(), Duration::hours(4));
    }

    #[test]
    fn news_article_reads_newsapi_shape() {
        let json = r#"{
            "status": "ok",
            "totalResults": 1,
            "articles": [{
                "source": {"id": null, "name": "CoinDesk"},
                "author": null,
                "title": "Bitcoin rallies",
                "description": "BTC up 5%",
                "url": "https://example.com",
                "urlToImage": null,
                "publishedAt": "2024-03-01T10:00:00Z",
                "content": null
            }]
        }"#;
        let batch: NewsBatch = serde_json::from_str(json).unwrap();
        assert_eq!(batch.total_results, 1);
        assert_eq!(batch.articles[0].title.as_deref(), Some("Bitcoin rallies"));
        assert_eq!(
            batch.articles[0].source.as_ref().and_then(|s| s.name.as_deref()),
            Some("CoinDesk")
        );
    }
}
