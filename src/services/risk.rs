use crate::{PortfolioError, Result};
use nalgebra as na;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Crypto markets trade every day of the year.
pub const DAYS_PER_YEAR: f64 = 365.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawdownStats {
    /// Largest peak-to-trough loss, in percent of the peak.
    pub max_drawdown_pct: f64,
    /// Bars from the peak before the largest drawdown until the series
    /// regains that peak, or until the last bar if it never does.
    pub duration: usize,
}

/// Monte Carlo loss estimates in currency units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulatedRisk {
    pub var: f64,
    pub expected_shortfall: f64,
}

#[derive(Debug, Clone)]
pub struct RiskEngine {
    confidence_level: f64,
    horizon_periods: u32,
    num_simulations: usize,
    periods_per_year: f64,
    seed: Option<u64>,
}

impl RiskEngine {
    pub fn new(confidence_level: f64, horizon_periods: u32, num_simulations: usize) -> Self {
        Self {
            confidence_level,
            horizon_periods,
            num_simulations,
            periods_per_year: DAYS_PER_YEAR,
            seed: None,
        }
    }

    pub fn with_periods_per_year(mut self, periods_per_year: f64) -> Self {
        self.periods_per_year = periods_per_year;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    pub fn periods_per_year(&self) -> f64 {
        self.periods_per_year
    }

    fn sorted_finite(returns: &[f64]) -> Result<Vec<f64>> {
        let mut sorted: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
        if sorted.is_empty() {
            return Err(PortfolioError::RiskCalculation("Empty returns vector".to_string()));
        }
        sorted.sort_by(f64::total_cmp);
        Ok(sorted)
    }

    fn tail_index(&self, len: usize) -> usize {
        (((1.0 - self.confidence_level) * len as f64) as usize).min(len - 1)
    }

    /// Historical VaR as a positive fraction of value lost.
    pub fn calculate_var(&self, returns: &[f64]) -> Result<f64> {
        let sorted = Self::sorted_finite(returns)?;
        Ok(-sorted[self.tail_index(sorted.len())])
    }

    /// Mean loss over the returns at or beyond the VaR cutoff.
    pub fn calculate_expected_shortfall(&self, returns: &[f64]) -> Result<f64> {
        let sorted = Self::sorted_finite(returns)?;
        let tail = &sorted[..=self.tail_index(sorted.len())];
        Ok(-tail.iter().sum::<f64>() / tail.len() as f64)
    }

    /// Sample standard deviation of per-period returns.
    pub fn calculate_volatility(&self, returns: &[f64]) -> Result<f64> {
        if returns.len() < 2 {
            return Err(PortfolioError::RiskCalculation(
                "Insufficient data for volatility calculation".to_string(),
            ));
        }

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;

        Ok(variance.sqrt())
    }

    pub fn annualized_volatility(&self, returns: &[f64]) -> Result<f64> {
        Ok(self.calculate_volatility(returns)? * self.periods_per_year.sqrt())
    }

    /// `p[t] / p[t-1] - 1`; steps from a zero price are skipped.
    pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
        prices
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| w[1] / w[0] - 1.0)
            .collect()
    }

    pub fn max_drawdown(equity: &[f64]) -> DrawdownStats {
        let mut peak = match equity.first() {
            Some(first) => *first,
            None => {
                return DrawdownStats {
                    max_drawdown_pct: 0.0,
                    duration: 0,
                }
            }
        };
        let mut peak_idx = 0;
        let mut worst = 0.0;
        let mut worst_peak_idx = 0;
        let mut worst_peak = peak;
        let mut worst_trough_idx = 0;

        for (i, &value) in equity.iter().enumerate() {
            if value > peak {
                peak = value;
                peak_idx = i;
            }
            let drawdown = if peak > 0.0 { (peak - value) / peak } else { 0.0 };
            if drawdown > worst {
                worst = drawdown;
                worst_peak_idx = peak_idx;
                worst_peak = peak;
                worst_trough_idx = i;
            }
        }

        if worst == 0.0 {
            return DrawdownStats {
                max_drawdown_pct: 0.0,
                duration: 0,
            };
        }

        let recovered = equity
            .iter()
            .enumerate()
            .skip(worst_trough_idx + 1)
            .find(|(_, v)| **v >= worst_peak)
            .map(|(i, _)| i)
            .unwrap_or(equity.len() - 1);

        DrawdownStats {
            max_drawdown_pct: worst * 100.0,
            duration: recovered - worst_peak_idx,
        }
    }

    /// Annualised Sharpe ratio of per-period returns. NaN without variation.
    pub fn sharpe_ratio(&self, returns: &[f64], risk_free_per_period: f64) -> f64 {
        if returns.len() < 2 {
            return f64::NAN;
        }
        let excess: Vec<f64> = returns.iter().map(|r| r - risk_free_per_period).collect();
        let mean = excess.iter().sum::<f64>() / excess.len() as f64;
        match self.calculate_volatility(&excess) {
            Ok(std) => annualised_ratio(mean, std, self.periods_per_year),
            Err(_) => f64::NAN,
        }
    }

    /// Like Sharpe, but only returns below zero count as risk.
    pub fn sortino_ratio(&self, returns: &[f64]) -> f64 {
        if returns.is_empty() {
            return f64::NAN;
        }
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let downside = (returns.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>() / n).sqrt();
        annualised_ratio(mean, downside, self.periods_per_year)
    }

    /// Simulate horizon returns under geometric Brownian motion.
    ///
    /// `volatility` and `drift` are annualised.
    pub fn simulate_portfolio_returns(&self, volatility: f64, drift: f64) -> Result<Vec<f64>> {
        if self.num_simulations == 0 {
            return Err(PortfolioError::RiskCalculation("num_simulations must be positive".to_string()));
        }
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let dt = 1.0 / self.periods_per_year;
        let sqrt_dt = dt.sqrt();

        let returns: Vec<f64> = (0..self.num_simulations)
            .map(|_| {
                let mut growth = 1.0;
                for _ in 0..self.horizon_periods {
                    let z: f64 = rng.sample(StandardNormal);
                    growth *= 1.0 + drift * dt + volatility * sqrt_dt * z;
                }
                growth - 1.0
            })
            .collect();

        Ok(returns)
    }

    pub fn simulate_risk(&self, portfolio_value: f64, volatility: f64, drift: f64) -> Result<SimulatedRisk> {
        let returns = self.simulate_portfolio_returns(volatility, drift)?;
        Ok(SimulatedRisk {
            var: self.calculate_var(&returns)? * portfolio_value,
            expected_shortfall: self.calculate_expected_shortfall(&returns)? * portfolio_value,
        })
    }

    pub fn calculate_correlation_matrix(&self, returns_matrix: &[Vec<f64>]) -> Result<na::DMatrix<f64>> {
        let n_observations = match returns_matrix.first() {
            Some(first) => first.len(),
            None => return Err(PortfolioError::RiskCalculation("Empty returns matrix".to_string())),
        };
        if returns_matrix.iter().any(|r| r.len() != n_observations) {
            return Err(PortfolioError::RiskCalculation(
                "Inconsistent number of observations".to_string(),
            ));
        }

        let n_assets = returns_matrix.len();
        let means: Vec<f64> = returns_matrix
            .iter()
            .map(|returns| returns.iter().sum::<f64>() / n_observations.max(1) as f64)
            .collect();
        let sum_sq: Vec<f64> = returns_matrix
            .iter()
            .zip(&means)
            .map(|(returns, m)| returns.iter().map(|x| (x - m).powi(2)).sum())
            .collect();

        let correlation = na::DMatrix::from_fn(n_assets, n_assets, |i, j| {
            if i == j {
                return 1.0;
            }
            let numerator: f64 = (0..n_observations)
                .map(|k| (returns_matrix[i][k] - means[i]) * (returns_matrix[j][k] - means[j]))
                .sum();
            let denominator = (sum_sq[i] * sum_sq[j]).sqrt();
            if denominator > 0.0 {
                numerator / denominator
            } else {
                0.0
            }
        });

        Ok(correlation)
    }

    /// Variance-covariance VaR over the horizon, as a positive currency loss.
    ///
    /// `volatilities` are per period.
    pub fn calculate_portfolio_var(
        &self,
        weights: &[f64],
        volatilities: &[f64],
        correlation_matrix: &na::DMatrix<f64>,
        portfolio_value: f64,
    ) -> Result<f64> {
        let n = weights.len();
        if volatilities.len() != n || correlation_matrix.nrows() != n || correlation_matrix.ncols() != n {
            return Err(PortfolioError::RiskCalculation(
                "Dimension mismatch in portfolio VaR calculation".to_string(),
            ));
        }

        let scaled = na::DVector::from_iterator(n, weights.iter().zip(volatilities).map(|(w, v)| w * v));
        let variance = (scaled.transpose() * correlation_matrix * &scaled)[(0, 0)];
        let normal = Normal::new(0.0, 1.0).map_err(|e| PortfolioError::RiskCalculation(e.to_string()))?;
        let z_score = normal.inverse_cdf(self.confidence_level);

        Ok(portfolio_value * variance.max(0.0).sqrt() * z_score * f64::from(self.horizon_periods).sqrt())
    }
}

fn annualised_ratio(mean: f64, risk: f64, periods_per_year: f64) -> f64 {
    if risk == 0.0 || !risk.is_finite() {
        if mean == 0.0 {
            f64::NAN
        } else {
            mean.signum() * f64::INFINITY
        }
    } else {
        mean / risk * periods_per_year.sqrt()
    }
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new(0.95, 1, 10000)
    }
}
