//! Command-line interface
//!
//! One subcommand per pipeline stage. Every stage reads its input from disk
//! and writes its output to disk, so stages can be re-run independently.

pub mod fetch;
pub mod model;
pub mod process;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::config::Config;

/// Crypto AI Portfolio Manager pipeline
#[derive(Parser)]
#[command(name = "cpm")]
#[command(about = "Data, feature, model and backtest pipeline for the portfolio manager")]
#[command(version)]
pub struct Cli {
    /// Use mock market data and news and the keyword sentiment scorer
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Backfill OHLCV candles from the exchange
    FetchPrices(fetch::FetchPricesArgs),
    /// Download news articles for a query and date range
    FetchNews(fetch::FetchNewsArgs),
    /// Score downloaded news with the sentiment model
    Sentiment(process::SentimentArgs),
    /// Compute technical indicators from an OHLCV file
    Indicators(process::IndicatorsArgs),
    /// Join features with daily sentiment and label the target
    Dataset(process::DatasetArgs),
    /// Train the direction classifier and evaluate it
    Train(model::TrainArgs),
    /// Backtest the trained model's signals
    Backtest(model::BacktestArgs),
    /// Run every stage in order
    RunAll(RunAllArgs),
}

/// Shared by every command.
pub struct Context {
    pub config: Config,
    pub offline: bool,
}

#[derive(Args, Clone)]
pub struct RunAllArgs {
    /// Trading pair
    #[arg(long, default_value = "BTC/USDT")]
    pub symbol: String,

    /// Candle timeframe (1h, 4h, 1d, ...)
    #[arg(long, default_value = "1d")]
    pub timeframe: String,

    /// First candle (YYYY-MM-DD or RFC 3339)
    #[arg(long, default_value = "2023-01-01")]
    pub start: String,

    /// Last candle (YYYY-MM-DD or RFC 3339), defaults to now
    #[arg(long)]
    pub end: Option<String>,

    /// News search query
    #[arg(long, default_value = "Bitcoin")]
    pub query: String,

    /// First news day (YYYY-MM-DD), defaults to 29 days before the last
    #[arg(long)]
    pub news_from: Option<String>,

    /// Last news day (YYYY-MM-DD), defaults to today
    #[arg(long)]
    pub news_to: Option<String>,
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let ctx = Context {
        config,
        offline: cli.offline,
    };
    if ctx.offline {
        info!("Offline mode: using mock providers");
    }

    match cli.command {
        Commands::FetchPrices(args) => {
            fetch::fetch_prices(&ctx, &args).await?;
        }
        Commands::FetchNews(args) => {
            fetch::fetch_news(&ctx, &args).await?;
        }
        Commands::Sentiment(args) => {
            process::sentiment(&ctx, &args).await?;
        }
        Commands::Indicators(args) => {
            process::indicators(&ctx, &args)?;
        }
        Commands::Dataset(args) => {
            process::dataset(&ctx, &args)?;
        }
        Commands::Train(args) => {
            model::train(&ctx, &args)?;
        }
        Commands::Backtest(args) => {
            model::backtest(&ctx, &args)?;
        }
        Commands::RunAll(args) => {
            run_all(&ctx, &args).await?;
        }
    }
    Ok(())
}

/// Prices, news, sentiment, indicators, dataset, training and backtest.
pub async fn run_all(ctx: &Context, args: &RunAllArgs) -> Result<()> {
    let ohlcv_path = fetch::fetch_prices(
        ctx,
        &fetch::FetchPricesArgs {
            symbol: args.symbol.clone(),
            timeframe: args.timeframe.clone(),
            start: args.start.clone(),
            end: args.end.clone(),
            out_dir: None,
        },
    )
    .await?;

    let news_path = fetch::fetch_news(
        ctx,
        &fetch::FetchNewsArgs {
            query: args.query.clone(),
            from: args.news_from.clone(),
            to: args.news_to.clone(),
            out_dir: None,
        },
    )
    .await?;

    let sentiment_path = match news_path {
        Some(news_path) => Some(
            process::sentiment(
                ctx,
                &process::SentimentArgs {
                    input: news_path,
                    max_articles: None,
                    out: None,
                },
            )
            .await?,
        ),
        None => None,
    };

    let features_path = process::indicators(
        ctx,
        &process::IndicatorsArgs {
            input: ohlcv_path,
            out_dir: None,
        },
    )?;

    let dataset_path = process::dataset(
        ctx,
        &process::DatasetArgs {
            features: features_path,
            sentiment: sentiment_path,
            horizon: 1,
            out: None,
        },
    )?;

    let model_path = model::train(
        ctx,
        &model::TrainArgs {
            data_file: dataset_path.clone(),
            model_out: None,
            metrics_out: None,
            learning_rate: None,
            iterations: None,
        },
    )?;

    let granularity = args
        .timeframe
        .parse::<crate::models::Timeframe>()?
        .as_str()
        .to_string();
    model::backtest(
        ctx,
        &model::BacktestArgs {
            model_path,
            dataset_path,
            granularity,
            stats_out: None,
            trades_out: None,
            full: false,
            init_cash: 100.0,
            fees: 0.0,
            slippage: 0.0,
        },
    )?;

    info!("Pipeline finished. Start the dashboard to explore the results.");
    Ok(())
}
