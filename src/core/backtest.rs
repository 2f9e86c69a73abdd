//! Signal backtester.
//!
//! Model predictions become long-only, all-in trades executed at the bar's
//! open price. A prediction made on bar `t` can only be acted on at bar
//! `t + 1`, so entries and exits are the predictions shifted by one bar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use super::classifier::LogisticRegression;
use super::dataset::read_dataset_csv;
use super::trainer::{chronological_split, feature_matrix};
use crate::services::risk::{RiskEngine, DAYS_PER_YEAR};
use crate::storage;
use crate::{PortfolioError, Result};

pub const STATS_FILE_NAME: &str = "backtest_stats.csv";

const MINUTES_PER_YEAR: f64 = DAYS_PER_YEAR * 24.0 * 60.0;

/// Bar spacing used to annualise returns.
#[derive(Debug, Clone, PartialEq)]
pub struct Frequency {
    label: String,
    minutes: f64,
}

impl Frequency {
    pub fn daily() -> Self {
        Self {
            label: "D".to_string(),
            minutes: 24.0 * 60.0,
        }
    }

    pub fn periods_per_year(&self) -> f64 {
        MINUTES_PER_YEAR / self.minutes
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl FromStr for Frequency {
    type Err = PortfolioError;

    /// Accepts `D`, `H`, `W` and counted forms such as `1d`, `4h`, `15m`,
    /// `15min` or `15T`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (count, unit) = s.split_at(split);
        let count: f64 = if count.is_empty() {
            1.0
        } else {
            count
                .parse()
                .map_err(|_| PortfolioError::Configuration(format!("Invalid frequency: {s}")))?
        };
        let unit_minutes = match unit {
            "D" | "d" => 24.0 * 60.0,
            "H" | "h" => 60.0,
            "m" | "min" | "T" | "t" => 1.0,
            "W" | "w" => 7.0 * 24.0 * 60.0,
            _ => return Err(PortfolioError::Configuration(format!("Invalid frequency: {s}"))),
        };
        if count <= 0.0 {
            return Err(PortfolioError::Configuration(format!("Invalid frequency: {s}")));
        }
        Ok(Self {
            label: s.to_string(),
            minutes: count * unit_minutes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BacktestOptions {
    pub init_cash: f64,
    /// Fraction of traded value paid on every fill.
    pub fees: f64,
    /// Fraction the fill price moves against the trade.
    pub slippage: f64,
    pub frequency: Frequency,
    /// Only simulate the rows the model never saw in training.
    pub test_set_only: bool,
    pub test_size: f64,
}

impl Default for BacktestOptions {
    fn default() -> Self {
        Self {
            init_cash: 100.0,
            fees: 0.0,
            slippage: 0.0,
            frequency: Frequency::daily(),
            test_set_only: true,
            test_size: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub size: f64,
    pub fees: f64,
    pub pnl: f64,
    pub return_pct: f64,
    pub status: TradeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestStats {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub period: usize,
    pub start_value: f64,
    pub end_value: f64,
    pub total_return_pct: f64,
    pub benchmark_return_pct: f64,
    pub max_gross_exposure_pct: f64,
    pub total_fees_paid: f64,
    pub max_drawdown_pct: f64,
    pub max_drawdown_duration: usize,
    pub total_trades: usize,
    pub total_closed_trades: usize,
    pub total_open_trades: usize,
    pub open_trade_pnl: f64,
    pub win_rate_pct: f64,
    pub best_trade_pct: f64,
    pub worst_trade_pct: f64,
    pub avg_winning_trade_pct: f64,
    pub avg_losing_trade_pct: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub var_95_pct: f64,
    pub expected_shortfall_95_pct: f64,
}

/// One `metric,value` line of the stats file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRow {
    pub metric: String,
    pub value: String,
}

impl BacktestStats {
    /// Report lines in display order. Undefined values print as `NaN`.
    pub fn to_rows(&self) -> Vec<StatRow> {
        let rows: Vec<(&str, String)> = vec![
            ("Start", self.start.to_rfc3339()),
            ("End", self.end.to_rfc3339()),
            ("Period [bars]", self.period.to_string()),
            ("Start Value", self.start_value.to_string()),
            ("End Value", self.end_value.to_string()),
            ("Total Return [%]", self.total_return_pct.to_string()),
            ("Benchmark Return [%]", self.benchmark_return_pct.to_string()),
            ("Max Gross Exposure [%]", self.max_gross_exposure_pct.to_string()),
            ("Total Fees Paid", self.total_fees_paid.to_string()),
            ("Max Drawdown [%]", self.max_drawdown_pct.to_string()),
            ("Max Drawdown Duration [bars]", self.max_drawdown_duration.to_string()),
            ("Total Trades", self.total_trades.to_string()),
            ("Total Closed Trades", self.total_closed_trades.to_string()),
            ("Total Open Trades", self.total_open_trades.to_string()),
            ("Open Trade PnL", self.open_trade_pnl.to_string()),
            ("Win Rate [%]", self.win_rate_pct.to_string()),
            ("Best Trade [%]", self.best_trade_pct.to_string()),
            ("Worst Trade [%]", self.worst_trade_pct.to_string()),
            ("Avg Winning Trade [%]", self.avg_winning_trade_pct.to_string()),
            ("Avg Losing Trade [%]", self.avg_losing_trade_pct.to_string()),
            ("Profit Factor", self.profit_factor.to_string()),
            ("Expectancy", self.expectancy.to_string()),
            ("Sharpe Ratio", self.sharpe_ratio.to_string()),
            ("Sortino Ratio", self.sortino_ratio.to_string()),
            ("Calmar Ratio", self.calmar_ratio.to_string()),
            ("VaR 95% [%]", self.var_95_pct.to_string()),
            ("Expected Shortfall 95% [%]", self.expected_shortfall_95_pct.to_string()),
        ];
        rows.into_iter()
            .map(|(metric, value)| StatRow {
                metric: metric.to_string(),
                value,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub stats: BacktestStats,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
}

/// `entry[t] = signal[t-1] == 1`, `exit[t] = signal[t-1] == 0`.
pub fn shift_signals(signals: &[u8]) -> (Vec<bool>, Vec<bool>) {
    let mut entries = vec![false; signals.len()];
    let mut exits = vec![false; signals.len()];
    for t in 1..signals.len() {
        entries[t] = signals[t - 1] == 1;
        exits[t] = signals[t - 1] == 0;
    }
    (entries, exits)
}

struct OpenPosition {
    entry_time: DateTime<Utc>,
    entry_price: f64,
    size: f64,
    cost: f64,
    entry_fees: f64,
}

/// Run the long-only simulation over `prices` (the execution price of each bar).
pub fn simulate(
    timestamps: &[DateTime<Utc>],
    prices: &[f64],
    entries: &[bool],
    exits: &[bool],
    options: &BacktestOptions,
) -> Result<BacktestReport> {
    let n = prices.len();
    if n < 2 || timestamps.len() != n || entries.len() != n || exits.len() != n {
        return Err(PortfolioError::Backtest(format!(
            "Need at least 2 aligned bars, got {} prices, {} timestamps, {} entries, {} exits",
            n,
            timestamps.len(),
            entries.len(),
            exits.len()
        )));
    }
    if let Some(bad) = prices.iter().find(|p| !p.is_finite() || **p <= 0.0) {
        return Err(PortfolioError::Backtest(format!("Invalid price in series: {bad}")));
    }
    if !options.init_cash.is_finite() || options.init_cash <= 0.0 {
        return Err(PortfolioError::Backtest("init_cash must be positive".to_string()));
    }

    let mut cash = options.init_cash;
    let mut position: Option<OpenPosition> = None;
    let mut trades = Vec::new();
    let mut equity_curve = Vec::with_capacity(n);
    let mut total_fees = 0.0;
    let mut max_exposure: f64 = 0.0;

    for t in 0..n {
        let price = prices[t];
        match position.take() {
            None if entries[t] => {
                let fill = price * (1.0 + options.slippage);
                let entry_fees = cash * options.fees;
                let size = (cash - entry_fees) / fill;
                total_fees += entry_fees;
                position = Some(OpenPosition {
                    entry_time: timestamps[t],
                    entry_price: fill,
                    size,
                    cost: cash,
                    entry_fees,
                });
                cash = 0.0;
            }
            Some(open) if exits[t] => {
                let fill = price * (1.0 - options.slippage);
                let proceeds = open.size * fill;
                let exit_fees = proceeds * options.fees;
                total_fees += exit_fees;
                cash += proceeds - exit_fees;
                let pnl = proceeds - exit_fees - open.cost;
                trades.push(Trade {
                    entry_time: open.entry_time,
                    exit_time: Some(timestamps[t]),
                    entry_price: open.entry_price,
                    exit_price: Some(fill),
                    size: open.size,
                    fees: open.entry_fees + exit_fees,
                    pnl,
                    return_pct: pnl / open.cost * 100.0,
                    status: TradeStatus::Closed,
                });
            }
            other => position = other,
        }

        let held = position.as_ref().map_or(0.0, |p| p.size * price);
        let equity = cash + held;
        if equity > 0.0 {
            max_exposure = max_exposure.max(held / equity);
        }
        equity_curve.push(EquityPoint {
            timestamp: timestamps[t],
            equity,
        });
    }

    let last_price = prices[n - 1];
    if let Some(open) = position {
        let pnl = open.size * last_price - open.cost;
        trades.push(Trade {
            entry_time: open.entry_time,
            exit_time: None,
            entry_price: open.entry_price,
            exit_price: None,
            size: open.size,
            fees: open.entry_fees,
            pnl,
            return_pct: pnl / open.cost * 100.0,
            status: TradeStatus::Open,
        });
    }

    let stats = compute_stats(&equity_curve, prices, &trades, total_fees, max_exposure, options);
    Ok(BacktestReport {
        stats,
        trades,
        equity_curve,
    })
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        f64::NAN
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn fold_or_nan(values: &[f64], f: fn(f64, f64) -> f64) -> f64 {
    values.iter().copied().reduce(f).unwrap_or(f64::NAN)
}

fn compute_stats(
    equity_curve: &[EquityPoint],
    prices: &[f64],
    trades: &[Trade],
    total_fees: f64,
    max_exposure: f64,
    options: &BacktestOptions,
) -> BacktestStats {
    let equity: Vec<f64> = equity_curve.iter().map(|p| p.equity).collect();
    let start_value = options.init_cash;
    let end_value = equity.last().copied().unwrap_or(start_value);
    let periods_per_year = options.frequency.periods_per_year();
    let engine = RiskEngine::new(0.95, 1, 1).with_periods_per_year(periods_per_year);

    let mut bar_returns = Vec::with_capacity(equity.len());
    let mut prev = start_value;
    for &value in &equity {
        bar_returns.push(if prev != 0.0 { value / prev - 1.0 } else { 0.0 });
        prev = value;
    }

    let closed: Vec<&Trade> = trades.iter().filter(|t| t.status == TradeStatus::Closed).collect();
    let closed_returns: Vec<f64> = closed.iter().map(|t| t.return_pct).collect();
    let wins: Vec<f64> = closed.iter().filter(|t| t.pnl > 0.0).map(|t| t.return_pct).collect();
    let losses: Vec<f64> = closed.iter().filter(|t| t.pnl < 0.0).map(|t| t.return_pct).collect();
    let gross_profit: f64 = closed.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let gross_loss: f64 = closed.iter().filter(|t| t.pnl < 0.0).map(|t| -t.pnl).sum();

    let profit_factor = if closed.is_empty() {
        f64::NAN
    } else if gross_loss == 0.0 {
        if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else {
        gross_profit / gross_loss
    };

    let drawdown = RiskEngine::max_drawdown(&equity);
    let total_return = end_value / start_value - 1.0;
    let annualized_return = (end_value / start_value).powf(periods_per_year / equity.len() as f64) - 1.0;
    let calmar_ratio = if drawdown.max_drawdown_pct == 0.0 {
        if annualized_return == 0.0 {
            f64::NAN
        } else {
            annualized_return.signum() * f64::INFINITY
        }
    } else {
        annualized_return / (drawdown.max_drawdown_pct / 100.0)
    };

    let first_price = prices[0];
    let last_price = prices[prices.len() - 1];

    BacktestStats {
        start: equity_curve.first().map_or_else(Utc::now, |p| p.timestamp),
        end: equity_curve.last().map_or_else(Utc::now, |p| p.timestamp),
        period: equity.len(),
        start_value,
        end_value,
        total_return_pct: total_return * 100.0,
        benchmark_return_pct: (last_price / first_price - 1.0) * 100.0,
        max_gross_exposure_pct: max_exposure * 100.0,
        total_fees_paid: total_fees,
        max_drawdown_pct: drawdown.max_drawdown_pct,
        max_drawdown_duration: drawdown.duration,
        total_trades: trades.len(),
        total_closed_trades: closed.len(),
        total_open_trades: trades.len() - closed.len(),
        open_trade_pnl: trades
            .iter()
            .filter(|t| t.status == TradeStatus::Open)
            .map(|t| t.pnl)
            .sum(),
        win_rate_pct: if closed.is_empty() {
            f64::NAN
        } else {
            wins.len() as f64 / closed.len() as f64 * 100.0
        },
        best_trade_pct: fold_or_nan(&closed_returns, f64::max),
        worst_trade_pct: fold_or_nan(&closed_returns, f64::min),
        avg_winning_trade_pct: mean(&wins),
        avg_losing_trade_pct: mean(&losses),
        profit_factor,
        expectancy: mean(&closed.iter().map(|t| t.pnl).collect::<Vec<_>>()),
        sharpe_ratio: engine.sharpe_ratio(&bar_returns, 0.0),
        sortino_ratio: engine.sortino_ratio(&bar_returns),
        calmar_ratio,
        var_95_pct: engine.calculate_var(&bar_returns).map_or(f64::NAN, |v| v * 100.0),
        expected_shortfall_95_pct: engine
            .calculate_expected_shortfall(&bar_returns)
            .map_or(f64::NAN, |v| v * 100.0),
    }
}

/// Predict with the saved model over the dataset and simulate the signals.
pub fn run_backtest_pipeline(
    model_path: &Path,
    dataset_path: &Path,
    options: &BacktestOptions,
) -> Result<BacktestReport> {
    info!("Starting backtest with model {}", model_path.display());
    let model = LogisticRegression::load(model_path)?;
    let rows = read_dataset_csv(dataset_path)?;

    let rows = if options.test_set_only {
        let split = chronological_split(rows.len(), options.test_size)?;
        info!(
            "Backtesting the test split only ({} of {} rows)",
            rows.len() - split,
            rows.len()
        );
        &rows[split..]
    } else {
        info!("Backtesting the full dataset ({} rows)", rows.len());
        &rows[..]
    };

    let x = feature_matrix(rows, &model.feature_names)?;
    let signals = model.predict_batch(&x)?;
    let (entries, exits) = shift_signals(&signals);
    let timestamps: Vec<DateTime<Utc>> = rows.iter().map(|r| r.timestamp).collect();
    let opens: Vec<f64> = rows.iter().map(|r| r.open).collect();

    info!("Simulating at open prices (frequency {})", options.frequency);
    let report = simulate(&timestamps, &opens, &entries, &exits, options)?;
    info!(
        "Backtest done: total return {:.2}% vs benchmark {:.2}%, {} trades",
        report.stats.total_return_pct,
        report.stats.benchmark_return_pct,
        report.stats.total_trades
    );
    Ok(report)
}

pub fn write_stats_csv(path: &Path, stats: &BacktestStats) -> Result<()> {
    storage::write_csv(path, &stats.to_rows())?;
    info!("Saved backtest stats to {}", path.display());
    Ok(())
}

pub fn read_stats_csv(path: &Path) -> Result<Vec<StatRow>> {
    storage::read_csv(path)
}

pub fn write_trades_csv(path: &Path, trades: &[Trade]) -> Result<()> {
    storage::write_csv(path, trades)?;
    info!("Saved {} trades to {}", trades.len(), path.display());
    Ok(())
}
