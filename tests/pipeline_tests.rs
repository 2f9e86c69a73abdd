use chrono::{NaiveDate, TimeZone, Utc};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crypto_portfolio_manager::{
    cli::{
        model::{backtest, BacktestArgs},
        run_all, Context, RunAllArgs,
    },
    config::Config,
    core::{read_dataset_csv, read_stats_csv, read_training_metrics, LogisticRegression, StatRow},
    models::{Candle, Timeframe},
    services::{
        market_data::{fetch_historical_ohlcv, read_candles_csv, BackfillOptions, MockOhlcvProvider, OhlcvProvider},
        news::{MockNewsProvider, NewsProvider},
        sentiment::{analyze_news_sentiment, read_sentiment_csv, SentimentAnalyzer, SentimentOptions, SentimentScore},
    },
    PortfolioError, Result,
};

fn temp_workspace() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cpm-test-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn offline_context(root: &PathBuf) -> Context {
    let mut config = Config::default();
    config.data.raw_dir = root.join("data/raw");
    config.data.processed_dir = root.join("data/processed");
    config.data.models_dir = root.join("models");
    config.data.portfolio_file = root.join("portfolio.json");
    Context { config, offline: true }
}

fn fast_backfill() -> BackfillOptions {
    BackfillOptions {
        page_limit: 100,
        rate_limit: Duration::ZERO,
        retry_delay: Duration::ZERO,
        max_retries: 3,
        end: None,
    }
}

#[tokio::test]
async fn test_offline_pipeline_writes_every_artefact() {
    let root = temp_workspace();
    let ctx = offline_context(&root);
    let args = RunAllArgs {
        symbol: "BTC/USDT".to_string(),
        timeframe: "1d".to_string(),
        start: "2023-01-01".to_string(),
        end: Some("2024-01-01".to_string()),
        query: "Bitcoin".to_string(),
        news_from: Some("2023-06-01".to_string()),
        news_to: Some("2023-06-30".to_string()),
    };

    run_all(&ctx, &args).await.unwrap();

    let raw = &ctx.config.data.raw_dir;
    let processed = &ctx.config.data.processed_dir;
    let models = &ctx.config.data.models_dir;

    let candles = read_candles_csv(&raw.join("ohlcv_BTC_USDT_1d.csv")).unwrap();
    assert_eq!(candles.len(), 366);
    assert!(raw.join("news_bitcoin_2023-06-01_to_2023-06-30.json").exists());
    assert!(processed.join("features_prices_BTC_USDT_1d.csv").exists());

    let sentiment = read_sentiment_csv(&processed.join("news_sentiment.csv")).unwrap();
    assert!(!sentiment.is_empty());
    assert!(sentiment.iter().all(|r| (-1.0..=1.0).contains(&r.sentiment_score)));

    let dataset = read_dataset_csv(&processed.join("training_dataset.csv")).unwrap();
    // 366 candles, 49 warm-up rows for the 50-bar average, 1 row without a future close
    assert_eq!(dataset.len(), 316);
    assert!(dataset.iter().any(|r| r.news_volume > 0));
    assert!(dataset.iter().all(|r| r.target <= 1));

    let metrics = read_training_metrics(&models.join("training_metrics.json")).unwrap();
    assert_eq!(metrics.train_samples + metrics.test_samples, dataset.len());
    assert_eq!(metrics.train_samples, 252);
    assert!((0.0..=1.0).contains(&metrics.accuracy));
    assert!(!metrics.features.iter().any(|f| f == "sentiment_mean" || f == "news_volume"));
    assert!(metrics.train_end < metrics.test_start);

    let model = LogisticRegression::load(&models.join("model.json")).unwrap();
    assert_eq!(model.feature_names, metrics.features);

    let stats = read_stats_csv(&processed.join("backtest_stats.csv")).unwrap();
    assert_eq!(stats[0].metric, "Start");
    assert_eq!(stats[0].value, metrics.test_start.to_rfc3339());
    let start_value = stats.iter().find(|r| r.metric == "Start Value").unwrap();
    assert_eq!(start_value.value, "100");

    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_backtest_full_dataset_or_test_split() {
    let root = temp_workspace();
    let ctx = offline_context(&root);
    let args = RunAllArgs {
        symbol: "BTC/USDT".to_string(),
        timeframe: "1d".to_string(),
        start: "2023-01-01".to_string(),
        end: Some("2024-01-01".to_string()),
        query: "Bitcoin".to_string(),
        news_from: Some("2023-06-01".to_string()),
        news_to: Some("2023-06-30".to_string()),
    };
    run_all(&ctx, &args).await.unwrap();

    let dataset_path = ctx.config.data.processed_dir.join("training_dataset.csv");
    let dataset = read_dataset_csv(&dataset_path).unwrap();
    let metrics = read_training_metrics(&ctx.config.data.models_dir.join("training_metrics.json")).unwrap();

    let run = |full: bool, name: &str| {
        let args = BacktestArgs {
            model_path: ctx.config.data.models_dir.join("model.json"),
            dataset_path: dataset_path.clone(),
            granularity: "D".to_string(),
            stats_out: Some(root.join(name)),
            trades_out: None,
            full,
            init_cash: 100.0,
            fees: 0.0,
            slippage: 0.0,
        };
        let path = backtest(&ctx, &args).unwrap();
        read_stats_csv(&path).unwrap()
    };
    let value = |rows: &[StatRow], metric: &str| rows.iter().find(|r| r.metric == metric).unwrap().value.clone();

    let full = run(true, "full.csv");
    assert_eq!(value(&full, "Period [bars]"), dataset.len().to_string());
    assert_eq!(value(&full, "Start"), dataset[0].timestamp.to_rfc3339());

    let split = run(false, "split.csv");
    assert_eq!(value(&split, "Period [bars]"), metrics.test_samples.to_string());
    assert_eq!(value(&split, "Start"), metrics.test_start.to_rfc3339());

    std::fs::remove_dir_all(root).ok();
}

/// Fails with a rate limit on its first `failures` calls, then serves the mock.
struct FlakyProvider {
    inner: MockOhlcvProvider,
    failures: u32,
    calls: AtomicU32,
}

impl OhlcvProvider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    fn fetch_ohlcv<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Candle>>> + Send + 'a>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(PortfolioError::RateLimited("HTTP 429".to_string()));
            }
            self.inner.fetch_ohlcv(symbol, timeframe, since_ms, limit).await
        })
    }
}

#[tokio::test]
async fn test_backfill_retries_transient_failures() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 0).unwrap();
    let provider = FlakyProvider {
        inner: MockOhlcvProvider::new(start, end, 7),
        failures: 2,
        calls: AtomicU32::new(0),
    };

    let candles = fetch_historical_ohlcv(&provider, "BTC/USDT", Timeframe::H1, start, &fast_backfill())
        .await
        .unwrap();

    // 240 hours plus the closing bar, in pages of 100
    assert_eq!(candles.len(), 241);
    assert_eq!(candles[0].timestamp, start);
    assert!(candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    // two failures, three full pages, one empty page
    assert_eq!(provider.calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_backfill_gives_up_after_max_retries() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let provider = FlakyProvider {
        inner: MockOhlcvProvider::new(start, start, 7),
        failures: 10,
        calls: AtomicU32::new(0),
    };

    let result = fetch_historical_ohlcv(&provider, "BTC/USDT", Timeframe::H1, start, &fast_backfill()).await;

    assert!(matches!(result, Err(PortfolioError::RateLimited(_))));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
}

struct ExchangeDown;

impl OhlcvProvider for ExchangeDown {
    fn name(&self) -> &str {
        "down"
    }

    fn fetch_ohlcv<'a>(
        &'a self,
        _symbol: &'a str,
        _timeframe: Timeframe,
        _since_ms: i64,
        _limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Candle>>> + Send + 'a>> {
        Box::pin(async { Err(PortfolioError::Exchange("Invalid symbol".to_string())) })
    }
}

#[tokio::test]
async fn test_backfill_aborts_on_exchange_error() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let result = fetch_historical_ohlcv(&ExchangeDown, "NOPE/USDT", Timeframe::D1, start, &fast_backfill()).await;
    assert!(matches!(result, Err(PortfolioError::Exchange(_))));
}

/// Unparseable replies for hack stories, API failures for regulation stories.
struct PickyAnalyzer;

impl SentimentAnalyzer for PickyAnalyzer {
    fn name(&self) -> &str {
        "picky"
    }

    fn analyze<'a>(
        &'a self,
        title: &'a str,
        _description: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SentimentScore>> + Send + 'a>> {
        Box::pin(async move {
            if title.contains("hack") {
                Err(PortfolioError::Sentiment("not JSON".to_string()))
            } else if title.contains("Regulators") {
                Err(PortfolioError::RateLimited("quota".to_string()))
            } else {
                Ok(SentimentScore {
                    score: 0.5,
                    reasoning: "fine".to_string(),
                })
            }
        })
    }
}

#[tokio::test]
async fn test_sentiment_skips_unusable_and_failed_articles() {
    let from = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let to = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
    let batch = MockNewsProvider::new().fetch_articles("Bitcoin", from, to).await.unwrap();
    assert_eq!(batch.articles.len(), 6);

    let options = SentimentOptions {
        max_articles: 50,
        pace: Duration::ZERO,
        error_pause: Duration::ZERO,
    };
    let records = analyze_news_sentiment(&PickyAnalyzer, &batch, &options).await.unwrap();

    // six articles: one [Removed], one unparseable, one API failure
    assert_eq!(records.len(), 3);
    assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(records.iter().all(|r| !r.title.contains("hack")));
}

#[tokio::test]
async fn test_sentiment_respects_article_cap() {
    let from = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let to = NaiveDate::from_ymd_opt(2024, 3, 30).unwrap();
    let batch = MockNewsProvider::new().fetch_articles("Bitcoin", from, to).await.unwrap();

    let options = SentimentOptions {
        max_articles: 4,
        pace: Duration::ZERO,
        error_pause: Duration::ZERO,
    };
    let records = analyze_news_sentiment(&PickyAnalyzer, &batch, &options).await.unwrap();
    assert!(records.len() <= 4);
}
