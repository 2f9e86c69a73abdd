//! Feature commands - sentiment scoring, indicators and the training dataset

use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use super::Context;
use crate::core::{
    build_training_dataset, compute_technical_features, features_file_name, read_features_csv,
    write_dataset_csv, write_features_csv, IndicatorParams, DATASET_FILE_NAME,
};
use crate::services::market_data::read_candles_csv;
use crate::services::news::read_news_json;
use crate::services::sentiment::{
    analyze_news_sentiment, make_sentiment_analyzer, read_sentiment_csv, write_sentiment_csv,
    SentimentAnalyzerKind, SentimentOptions, SENTIMENT_FILE_NAME,
};

#[derive(Args, Clone)]
pub struct SentimentArgs {
    /// News JSON written by fetch-news
    pub input: PathBuf,

    /// Score at most this many articles (default 50)
    #[arg(long)]
    pub max_articles: Option<usize>,

    /// Output CSV, defaults to DATA_PROCESSED_DIR/news_sentiment.csv
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Clone)]
pub struct IndicatorsArgs {
    /// OHLCV CSV written by fetch-prices
    pub input: PathBuf,

    /// Output directory, defaults to DATA_PROCESSED_DIR
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

#[derive(Args, Clone)]
pub struct DatasetArgs {
    /// Features CSV written by indicators
    pub features: PathBuf,

    /// Sentiment CSV written by sentiment; without it every day has no news
    pub sentiment: Option<PathBuf>,

    /// Bars ahead the target looks
    #[arg(long, default_value_t = 1)]
    pub horizon: usize,

    /// Output CSV, defaults to DATA_PROCESSED_DIR/training_dataset.csv
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub async fn sentiment(ctx: &Context, args: &SentimentArgs) -> Result<PathBuf> {
    let batch = read_news_json(&args.input)
        .with_context(|| format!("failed to read news from {}", args.input.display()))?;

    let (kind, mut options) = if ctx.offline {
        let options = SentimentOptions {
            pace: Duration::ZERO,
            error_pause: Duration::ZERO,
            ..SentimentOptions::default()
        };
        (SentimentAnalyzerKind::Keyword, options)
    } else {
        (SentimentAnalyzerKind::Gemini, SentimentOptions::default())
    };
    if let Some(max) = args.max_articles {
        options.max_articles = max;
    }

    let analyzer = make_sentiment_analyzer(kind, &ctx.config.sentiment)?;
    let records = analyze_news_sentiment(analyzer.as_ref(), &batch, &options).await?;

    let path = args
        .out
        .clone()
        .unwrap_or_else(|| ctx.config.data.processed_dir.join(SENTIMENT_FILE_NAME));
    write_sentiment_csv(&path, &records)?;
    Ok(path)
}

pub fn indicators(ctx: &Context, args: &IndicatorsArgs) -> Result<PathBuf> {
    let candles = read_candles_csv(&args.input)
        .with_context(|| format!("failed to read candles from {}", args.input.display()))?;
    info!("Computing indicators over {} candles", candles.len());
    let rows = compute_technical_features(&candles, &IndicatorParams::default())?;

    let file_name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "ohlcv.csv".to_string());
    let dir = args
        .out_dir
        .clone()
        .unwrap_or_else(|| ctx.config.data.processed_dir.clone());
    let path = dir.join(features_file_name(&file_name));
    write_features_csv(&path, &rows)?;
    Ok(path)
}

pub fn dataset(ctx: &Context, args: &DatasetArgs) -> Result<PathBuf> {
    let features = read_features_csv(&args.features)
        .with_context(|| format!("failed to read features from {}", args.features.display()))?;
    let sentiment = match &args.sentiment {
        Some(path) => read_sentiment_csv(path)
            .with_context(|| format!("failed to read sentiment from {}", path.display()))?,
        None => {
            warn!("No sentiment file given; sentiment_mean and news_volume will be zero");
            Vec::new()
        }
    };

    let rows = build_training_dataset(&features, &sentiment, args.horizon)?;
    let path = args
        .out
        .clone()
        .unwrap_or_else(|| ctx.config.data.processed_dir.join(DATASET_FILE_NAME));
    write_dataset_csv(&path, &rows)?;
    Ok(path)
}
