//! Model commands - training and backtesting

use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

use super::Context;
use crate::core::{
    run_backtest_pipeline, run_training_pipeline, write_stats_csv, write_trades_csv, BacktestOptions,
    Frequency, TrainingParams, METRICS_FILE_NAME, MODEL_FILE_NAME, STATS_FILE_NAME,
};

#[derive(Args, Clone)]
pub struct TrainArgs {
    /// Training dataset CSV written by the dataset command
    pub data_file: PathBuf,

    /// Where to save the model, defaults to MODELS_DIR/model.json
    #[arg(long)]
    pub model_out: Option<PathBuf>,

    /// Where to save the evaluation metrics, defaults to MODELS_DIR/training_metrics.json
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,

    /// Gradient descent step size
    #[arg(long)]
    pub learning_rate: Option<f64>,

    /// Gradient descent iterations
    #[arg(long)]
    pub iterations: Option<usize>,
}

#[derive(Args, Clone)]
pub struct BacktestArgs {
    /// Model JSON written by train
    pub model_path: PathBuf,

    /// Training dataset CSV the model was trained on
    pub dataset_path: PathBuf,

    /// Bar frequency used to annualise (D, H, 4h, 15m, ...)
    #[arg(long, default_value = "D")]
    pub granularity: String,

    /// Stats CSV, defaults to DATA_PROCESSED_DIR/backtest_stats.csv
    #[arg(long)]
    pub stats_out: Option<PathBuf>,

    /// Also write the trade list to this CSV
    #[arg(long)]
    pub trades_out: Option<PathBuf>,

    /// Backtest every row instead of the held-out test split
    #[arg(long)]
    pub full: bool,

    #[arg(long, default_value_t = 100.0)]
    pub init_cash: f64,

    /// Fee per fill as a fraction of traded value
    #[arg(long, default_value_t = 0.0)]
    pub fees: f64,

    #[arg(long, default_value_t = 0.0)]
    pub slippage: f64,
}

/// Returns the path of the saved model.
pub fn train(ctx: &Context, args: &TrainArgs) -> Result<PathBuf> {
    let models_dir = &ctx.config.data.models_dir;
    let model_out = args.model_out.clone().unwrap_or_else(|| models_dir.join(MODEL_FILE_NAME));
    let metrics_out = args
        .metrics_out
        .clone()
        .unwrap_or_else(|| models_dir.join(METRICS_FILE_NAME));

    let mut params = TrainingParams::default();
    if let Some(rate) = args.learning_rate {
        params.learning_rate = rate;
    }
    if let Some(iterations) = args.iterations {
        params.iterations = iterations;
    }

    let outcome = run_training_pipeline(&args.data_file, &model_out, &metrics_out, params)
        .with_context(|| format!("training on {} failed", args.data_file.display()))?;
    let report = &outcome.metrics.classification_report;
    info!(
        "Accuracy {:.4}, up precision {:.4}, up recall {:.4}",
        outcome.metrics.accuracy, report.up.precision, report.up.recall
    );
    Ok(model_out)
}

/// Returns the path of the stats CSV.
pub fn backtest(ctx: &Context, args: &BacktestArgs) -> Result<PathBuf> {
    let options = BacktestOptions {
        init_cash: args.init_cash,
        fees: args.fees,
        slippage: args.slippage,
        frequency: args.granularity.parse::<Frequency>()?,
        test_set_only: !args.full,
        ..BacktestOptions::default()
    };

    let report = run_backtest_pipeline(&args.model_path, &args.dataset_path, &options)
        .context("backtest failed")?;
    for row in report.stats.to_rows() {
        info!("{:<28} {}", row.metric, row.value);
    }

    let stats_out = args
        .stats_out
        .clone()
        .unwrap_or_else(|| ctx.config.data.processed_dir.join(STATS_FILE_NAME));
    write_stats_csv(&stats_out, &report.stats)?;
    if let Some(trades_out) = &args.trades_out {
        write_trades_csv(trades_out, &report.trades)?;
    }
    Ok(stats_out)
}
