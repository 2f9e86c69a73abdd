//! Fetch commands - raw prices and news from the network (or the mocks)

use anyhow::{Context as _, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::Context;
use crate::models::Timeframe;
use crate::services::market_data::{
    fetch_historical_ohlcv, make_ohlcv_provider, ohlcv_file_name, parse_start_date, write_candles_csv,
    BackfillOptions, MockOhlcvProvider, OhlcvProvider, OhlcvProviderKind,
};
use crate::services::news::{
    make_news_provider, news_file_name, parse_date, write_news_json, NewsProviderKind,
};

/// Seed of the offline random walk, so offline runs are reproducible.
const MOCK_SEED: u64 = 42;

#[derive(Args, Clone)]
pub struct FetchPricesArgs {
    /// Trading pair, e.g. BTC/USDT
    #[arg(long, default_value = "BTC/USDT")]
    pub symbol: String,

    /// Candle timeframe (1m ... 1w)
    #[arg(long, default_value = "1d")]
    pub timeframe: String,

    /// First candle (YYYY-MM-DD or RFC 3339)
    #[arg(long, default_value = "2023-01-01")]
    pub start: String,

    /// Last candle, defaults to now
    #[arg(long)]
    pub end: Option<String>,

    /// Output directory, defaults to DATA_RAW_DIR
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

#[derive(Args, Clone)]
pub struct FetchNewsArgs {
    /// Search query
    #[arg(long, default_value = "Bitcoin")]
    pub query: String,

    /// First day (YYYY-MM-DD), defaults to 29 days before `to`
    #[arg(long)]
    pub from: Option<String>,

    /// Last day (YYYY-MM-DD), defaults to today
    #[arg(long)]
    pub to: Option<String>,

    /// Output directory, defaults to DATA_RAW_DIR
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

/// Backfill candles and write them to `ohlcv_<pair>_<tf>.csv`.
pub async fn fetch_prices(ctx: &Context, args: &FetchPricesArgs) -> Result<PathBuf> {
    let timeframe: Timeframe = args.timeframe.parse()?;
    let start = parse_start_date(&args.start)?;
    let end = args.end.as_deref().map(parse_start_date).transpose()?;

    let (provider, options): (Arc<dyn OhlcvProvider>, BackfillOptions) = if ctx.offline {
        let mock: Arc<dyn OhlcvProvider> =
            Arc::new(MockOhlcvProvider::new(start, end.unwrap_or_else(Utc::now), MOCK_SEED));
        let options = BackfillOptions {
            rate_limit: std::time::Duration::ZERO,
            retry_delay: std::time::Duration::ZERO,
            end,
            ..BackfillOptions::default()
        };
        (mock, options)
    } else {
        let provider = make_ohlcv_provider(OhlcvProviderKind::Binance, &ctx.config.exchange);
        let options = BackfillOptions {
            end,
            ..BackfillOptions::default()
        };
        (provider, options)
    };

    let candles = fetch_historical_ohlcv(provider.as_ref(), &args.symbol, timeframe, start, &options)
        .await
        .with_context(|| format!("failed to fetch {} candles", args.symbol))?;
    if candles.is_empty() {
        anyhow::bail!("no candles returned for {} since {}", args.symbol, args.start);
    }

    let dir = args.out_dir.clone().unwrap_or_else(|| ctx.config.data.raw_dir.clone());
    let path = dir.join(ohlcv_file_name(&args.symbol, timeframe));
    write_candles_csv(&path, &candles)?;
    Ok(path)
}

/// Download articles. Returns `None` when the query matched nothing.
pub async fn fetch_news(ctx: &Context, args: &FetchNewsArgs) -> Result<Option<PathBuf>> {
    let to: NaiveDate = match &args.to {
        Some(to) => parse_date(to)?,
        None => Utc::now().date_naive(),
    };
    let from = match &args.from {
        Some(from) => parse_date(from)?,
        None => to - Duration::days(29),
    };
    if from > to {
        anyhow::bail!("news range starts after it ends: {from} > {to}");
    }

    let kind = if ctx.offline {
        NewsProviderKind::Mock
    } else {
        NewsProviderKind::NewsApi
    };
    let provider = make_news_provider(kind, &ctx.config.news)?;
    info!("Fetching '{}' news from {} to {} via {}", args.query, from, to, provider.name());

    let batch = provider.fetch_articles(&args.query, from, to).await?;
    if batch.is_empty() {
        warn!("No articles found for '{}' between {} and {}", args.query, from, to);
        return Ok(None);
    }

    let dir = args.out_dir.clone().unwrap_or_else(|| ctx.config.data.raw_dir.clone());
    let path = dir.join(news_file_name(&args.query, from, to));
    write_news_json(&path, &batch)?;
    Ok(Some(path))
}
