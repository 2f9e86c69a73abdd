use crate::models::Candle;
use crate::services::risk::{RiskEngine, DAYS_PER_YEAR};
use crate::storage;
use crate::{PortfolioError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: String,
    pub name: String,
    pub positions: Vec<Position>,
    pub base_currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A holding of one asset on one exchange or wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    /// Market symbol, e.g. `BTC/USDT`.
    pub symbol: String,
    pub exchange: String,
    pub quantity: f64,
    pub average_cost: Option<f64>,
    pub entry_date: DateTime<Utc>,
}

/// All positions in one symbol, summed across exchanges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub quantity: f64,
    /// Total cost, known only when every position carries an average cost.
    pub cost_basis: Option<f64>,
    pub exchanges: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioValuation {
    pub portfolio_id: String,
    pub name: String,
    pub total_value: f64,
    pub currency: String,
    pub positions: Vec<PositionValuation>,
    pub risk_metrics: Option<RiskMetrics>,
    pub timestamp: DateTime<Utc>,
    pub performance: Option<PortfolioPerformance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionValuation {
    pub position_id: String,
    pub symbol: String,
    pub exchange: String,
    pub quantity: f64,
    pub price: f64,
    pub market_value: f64,
    pub weight: f64, // Percentage of portfolio
    pub pnl: Option<f64>,
    pub pnl_percentage: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioPerformance {
    pub total_return: f64,
    pub total_return_percentage: f64,
}

/// Risk of the portfolio's historical value series, in base currency
/// unless marked as a ratio or percentage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub observations: usize,
    /// Annualised.
    pub volatility: f64,
    pub var_1d: f64,
    pub expected_shortfall_1d: f64,
    pub simulated_var_1d: Option<f64>,
    pub parametric_var_1d: Option<f64>,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown_pct: f64,
}

impl Portfolio {
    pub fn new(name: String, base_currency: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            positions: Vec::new(),
            base_currency,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_position(
        &mut self,
        symbol: String,
        exchange: String,
        quantity: f64,
        average_cost: Option<f64>,
    ) -> String {
        let position_id = Uuid::new_v4().to_string();
        let position = Position {
            id: position_id.clone(),
            symbol,
            exchange,
            quantity,
            average_cost,
            entry_date: Utc::now(),
        };

        self.positions.push(position);
        self.updated_at = Utc::now();
        position_id
    }

    pub fn update_position(&mut self, position_id: &str, quantity: f64) -> Result<()> {
        let position = self
            .positions
            .iter_mut()
            .find(|p| p.id == position_id)
            .ok_or_else(|| PortfolioError::Portfolio(format!("Position not found: {}", position_id)))?;

        position.quantity = quantity;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn remove_position(&mut self, position_id: &str) -> Result<()> {
        let index = self
            .positions
            .iter()
            .position(|p| p.id == position_id)
            .ok_or_else(|| PortfolioError::Portfolio(format!("Position not found: {}", position_id)))?;

        self.positions.remove(index);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn symbols(&self) -> Vec<String> {
        self.aggregate_by_symbol().into_keys().collect()
    }

    pub fn aggregate_by_symbol(&self) -> BTreeMap<String, Holding> {
        let mut holdings: BTreeMap<String, Holding> = BTreeMap::new();
        for position in &self.positions {
            let holding = holdings.entry(position.symbol.clone()).or_insert_with(|| Holding {
                symbol: position.symbol.clone(),
                quantity: 0.0,
                cost_basis: Some(0.0),
                exchanges: Vec::new(),
            });
            holding.quantity += position.quantity;
            holding.cost_basis = match (holding.cost_basis, position.average_cost) {
                (Some(total), Some(cost)) => Some(total + cost * position.quantity),
                _ => None,
            };
            if !holding.exchanges.contains(&position.exchange) {
                holding.exchanges.push(position.exchange.clone());
            }
        }
        holdings
    }

    pub fn load(path: &Path) -> Result<Self> {
        storage::read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        storage::write_json(path, self)
    }
}

pub struct PortfolioValuationService {
    risk_engine: RiskEngine,
}

impl PortfolioValuationService {
    pub fn new(risk_engine: RiskEngine) -> Self {
        Self { risk_engine }
    }

    /// Value every position at `prices[symbol]` and derive risk from the
    /// close histories of the held symbols.
    pub fn value_portfolio(
        &self,
        portfolio: &Portfolio,
        prices: &HashMap<String, f64>,
        history: &HashMap<String, Vec<Candle>>,
    ) -> Result<PortfolioValuation> {
        let mut position_valuations = Vec::new();
        let mut total_value = 0.0;

        for position in &portfolio.positions {
            let price = *prices
                .get(&position.symbol)
                .ok_or_else(|| PortfolioError::Portfolio(format!("No price for {}", position.symbol)))?;
            let market_value = price * position.quantity;

            let (pnl, pnl_percentage) = if let Some(avg_cost) = position.average_cost {
                let total_cost = avg_cost * position.quantity;
                let pnl = market_value - total_cost;
                let pnl_pct = if total_cost != 0.0 { pnl / total_cost * 100.0 } else { 0.0 };
                (Some(pnl), Some(pnl_pct))
            } else {
                (None, None)
            };

            position_valuations.push(PositionValuation {
                position_id: position.id.clone(),
                symbol: position.symbol.clone(),
                exchange: position.exchange.clone(),
                quantity: position.quantity,
                price,
                market_value,
                weight: 0.0,
                pnl,
                pnl_percentage,
            });

            total_value += market_value;
        }

        for position_val in &mut position_valuations {
            position_val.weight = if total_value != 0.0 {
                position_val.market_value / total_value * 100.0
            } else {
                0.0
            };
        }

        let risk_metrics = match self.calculate_risk_metrics(portfolio, history, total_value) {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                debug!("No risk metrics for {}: {}", portfolio.name, e);
                None
            }
        };
        let performance = calculate_performance(&position_valuations);

        Ok(PortfolioValuation {
            portfolio_id: portfolio.id.clone(),
            name: portfolio.name.clone(),
            total_value,
            currency: portfolio.base_currency.clone(),
            positions: position_valuations,
            risk_metrics,
            timestamp: Utc::now(),
            performance,
        })
    }

    fn calculate_risk_metrics(
        &self,
        portfolio: &Portfolio,
        history: &HashMap<String, Vec<Candle>>,
        total_value: f64,
    ) -> Result<RiskMetrics> {
        let holdings = portfolio.aggregate_by_symbol();
        let aligned = align_closes(&holdings, history)?;
        if aligned.len() < 3 {
            return Err(PortfolioError::RiskCalculation(format!(
                "Need at least 3 common history points, got {}",
                aligned.len()
            )));
        }

        let values: Vec<f64> = aligned
            .values()
            .map(|closes| holdings.values().zip(closes).map(|(h, c)| h.quantity * c).sum::<f64>())
            .collect();
        let returns = RiskEngine::simple_returns(&values);
        // Annualise at the spacing the shared timestamps actually have
        let engine = match bar_periods_per_year(aligned.keys()) {
            Some(ppy) => self.risk_engine.clone().with_periods_per_year(ppy),
            None => self.risk_engine.clone(),
        };

        let volatility = engine.annualized_volatility(&returns)?;
        let drift = returns.iter().sum::<f64>() / returns.len() as f64 * engine.periods_per_year();
        let simulated_var_1d = engine.simulate_risk(total_value, volatility, drift).ok().map(|r| r.var);

        Ok(RiskMetrics {
            observations: values.len(),
            volatility,
            var_1d: engine.calculate_var(&returns)? * total_value,
            expected_shortfall_1d: engine.calculate_expected_shortfall(&returns)? * total_value,
            simulated_var_1d,
            parametric_var_1d: self.parametric_var(&holdings, &aligned, total_value).ok(),
            sharpe_ratio: engine.sharpe_ratio(&returns, 0.0),
            sortino_ratio: engine.sortino_ratio(&returns),
            max_drawdown_pct: RiskEngine::max_drawdown(&values).max_drawdown_pct,
        })
    }

    fn parametric_var(
        &self,
        holdings: &BTreeMap<String, Holding>,
        aligned: &BTreeMap<DateTime<Utc>, Vec<f64>>,
        total_value: f64,
    ) -> Result<f64> {
        let latest = aligned
            .values()
            .next_back()
            .ok_or_else(|| PortfolioError::RiskCalculation("Empty history".to_string()))?;
        let weights: Vec<f64> = holdings
            .values()
            .zip(latest)
            .map(|(h, price)| if total_value != 0.0 { h.quantity * price / total_value } else { 0.0 })
            .collect();

        let per_symbol: Vec<Vec<f64>> = (0..holdings.len())
            .map(|i| {
                let closes: Vec<f64> = aligned.values().map(|row| row[i]).collect();
                RiskEngine::simple_returns(&closes)
            })
            .collect();
        let volatilities = per_symbol
            .iter()
            .map(|r| self.risk_engine.calculate_volatility(r))
            .collect::<Result<Vec<f64>>>()?;
        let correlation = self.risk_engine.calculate_correlation_matrix(&per_symbol)?;

        self.risk_engine
            .calculate_portfolio_var(&weights, &volatilities, &correlation, total_value)
    }
}

/// Closes of every held symbol on the timestamps they all share, one
/// column per holding in `holdings` order.
fn align_closes(
    holdings: &BTreeMap<String, Holding>,
    history: &HashMap<String, Vec<Candle>>,
) -> Result<BTreeMap<DateTime<Utc>, Vec<f64>>> {
    let mut aligned: BTreeMap<DateTime<Utc>, Vec<f64>> = BTreeMap::new();
    for (i, symbol) in holdings.keys().enumerate() {
        let candles = history
            .get(symbol)
            .ok_or_else(|| PortfolioError::RiskCalculation(format!("No history for {symbol}")))?;
        if i == 0 {
            aligned = candles.iter().map(|c| (c.timestamp, vec![c.close])).collect();
            continue;
        }
        let closes: HashMap<DateTime<Utc>, f64> = candles.iter().map(|c| (c.timestamp, c.close)).collect();
        aligned.retain(|ts, row| match closes.get(ts) {
            Some(close) => {
                row.push(*close);
                true
            }
            None => false,
        });
    }
    Ok(aligned)
}

/// Bars per year implied by the median gap between consecutive timestamps.
fn bar_periods_per_year<'a>(timestamps: impl Iterator<Item = &'a DateTime<Utc>>) -> Option<f64> {
    let timestamps: Vec<&DateTime<Utc>> = timestamps.collect();
    let mut gaps: Vec<i64> = timestamps
        .windows(2)
        .map(|w| (*w[1] - *w[0]).num_seconds())
        .filter(|gap| *gap > 0)
        .collect();
    if gaps.is_empty() {
        return None;
    }
    gaps.sort_unstable();
    let median = gaps[gaps.len() / 2];
    Some(DAYS_PER_YEAR * 86_400.0 / median as f64)
}

fn calculate_performance(positions: &[PositionValuation]) -> Option<PortfolioPerformance> {
    let mut total_cost = 0.0;
    let mut total_value = 0.0;
    for position in positions {
        let pnl = position.pnl?;
        total_value += position.market_value;
        total_cost += position.market_value - pnl;
    }

    if positions.is_empty() || total_cost == 0.0 {
        return None;
    }

    let total_return = total_value - total_cost;
    Some(PortfolioPerformance {
        total_return,
        total_return_percentage: total_return / total_cost * 100.0,
    })
}

impl Default for PortfolioValuationService {
    fn default() -> Self {
        Self::new(RiskEngine::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn history(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Candle::new(start + Duration::days(i as i64), *c, *c, *c, *c, 1.0))
            .collect()
    }

    fn sample() -> Portfolio {
        let mut portfolio = Portfolio::new("Crypto".into(), "USDT".into());
        portfolio.add_position("BTC/USDT".into(), "binance".into(), 0.5, Some(40000.0));
        portfolio.add_position("BTC/USDT".into(), "ledger".into(), 0.5, Some(20000.0));
        portfolio.add_position("ETH/USDT".into(), "binance".into(), 2.0, None);
        portfolio
    }

    #[test]
    fn aggregates_across_exchanges() {
        let holdings = sample().aggregate_by_symbol();
        let btc = &holdings["BTC/USDT"];
        assert_eq!(btc.quantity, 1.0);
        assert_eq!(btc.cost_basis, Some(30000.0));
        assert_eq!(btc.exchanges, vec!["binance", "ledger"]);
        assert_eq!(holdings["ETH/USDT"].cost_basis, None);
    }

    #[test]
    fn update_and_remove_unknown_position_fail() {
        let mut portfolio = sample();
        assert!(portfolio.update_position("missing", 1.0).is_err());
        assert!(portfolio.remove_position("missing").is_err());
        let id = portfolio.positions[0].id.clone();
        portfolio.update_position(&id, 2.0).unwrap();
        assert_eq!(portfolio.positions[0].quantity, 2.0);
        portfolio.remove_position(&id).unwrap();
        assert_eq!(portfolio.positions.len(), 2);
    }

    #[test]
    fn values_positions_and_weights() {
        let portfolio = sample();
        let prices = HashMap::from([("BTC/USDT".to_string(), 50000.0), ("ETH/USDT".to_string(), 2500.0)]);
        let valuation = PortfolioValuationService::default()
            .value_portfolio(&portfolio, &prices, &HashMap::new())
            .unwrap();

        assert_eq!(valuation.total_value, 55000.0);
        let weights: f64 = valuation.positions.iter().map(|p| p.weight).sum();
        assert!((weights - 100.0).abs() < 1e-9);
        assert_eq!(valuation.positions[0].pnl, Some(5000.0));
        // ETH has no cost, so overall performance is unknown
        assert!(valuation.performance.is_none());
        assert!(valuation.risk_metrics.is_none());
    }

    #[test]
    fn missing_price_is_an_error() {
        let prices = HashMap::from([("BTC/USDT".to_string(), 50000.0)]);
        let result = PortfolioValuationService::default().value_portfolio(&sample(), &prices, &HashMap::new());
        assert!(matches!(result, Err(PortfolioError::Portfolio(_))));
    }

    #[test]
    fn risk_metrics_from_aligned_history() {
        let portfolio = sample();
        let prices = HashMap::from([("BTC/USDT".to_string(), 50000.0), ("ETH/USDT".to_string(), 2500.0)]);
        let btc: Vec<f64> = (0..30).map(|i| 45000.0 + (i as f64 * 0.9).sin() * 2000.0).collect();
        let eth: Vec<f64> = (0..25).map(|i| 2400.0 + (i as f64 * 1.3).cos() * 150.0).collect();
        let history = HashMap::from([
            ("BTC/USDT".to_string(), history(&btc)),
            ("ETH/USDT".to_string(), history(&eth)),
        ]);

        let service = PortfolioValuationService::new(RiskEngine::default().with_seed(1));
        let valuation = service.value_portfolio(&portfolio, &prices, &history).unwrap();
        let risk = valuation.risk_metrics.unwrap();
        assert_eq!(risk.observations, 25);
        assert!(risk.volatility > 0.0);
        assert!(risk.expected_shortfall_1d >= risk.var_1d);
        assert!(risk.parametric_var_1d.unwrap() > 0.0);
        assert!(risk.max_drawdown_pct > 0.0);
    }

    #[test]
    fn mixed_timeframes_annualise_at_the_shared_spacing() {
        let portfolio = sample();
        let prices = HashMap::from([("BTC/USDT".to_string(), 50000.0), ("ETH/USDT".to_string(), 2500.0)]);
        let btc_daily: Vec<f64> = (0..30).map(|i| 45000.0 + (i as f64 * 0.9).sin() * 2000.0).collect();
        let eth: Vec<f64> = (0..30).map(|i| 2400.0 + (i as f64 * 1.3).cos() * 150.0).collect();

        // hourly BTC candles, flat within each day
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let btc_hourly: Vec<Candle> = (0..30 * 24)
            .map(|h| {
                let c = btc_daily[h / 24];
                Candle::new(start + Duration::hours(h as i64), c, c, c, c, 1.0)
            })
            .collect();

        let daily = HashMap::from([
            ("BTC/USDT".to_string(), history(&btc_daily)),
            ("ETH/USDT".to_string(), history(&eth)),
        ]);
        let mixed = HashMap::from([
            ("BTC/USDT".to_string(), btc_hourly),
            ("ETH/USDT".to_string(), history(&eth)),
        ]);

        let expected = PortfolioValuationService::default()
            .value_portfolio(&portfolio, &prices, &daily)
            .unwrap()
            .risk_metrics
            .unwrap();
        // configured for hourly bars, but the shared timestamps are daily
        let hourly_engine = RiskEngine::default().with_periods_per_year(DAYS_PER_YEAR * 24.0);
        let risk = PortfolioValuationService::new(hourly_engine)
            .value_portfolio(&portfolio, &prices, &mixed)
            .unwrap()
            .risk_metrics
            .unwrap();

        assert_eq!(risk.observations, 30);
        assert!((risk.volatility - expected.volatility).abs() < 1e-12);
        assert!((risk.sharpe_ratio - expected.sharpe_ratio).abs() < 1e-12);
        assert!((risk.sortino_ratio - expected.sortino_ratio).abs() < 1e-12);
    }

    #[test]
    fn spacing_uses_median_gap() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let stamps = [0, 1, 2, 5, 6].map(|d| start + Duration::days(d));
        assert_eq!(bar_periods_per_year(stamps.iter()), Some(DAYS_PER_YEAR));
        assert_eq!(bar_periods_per_year(stamps[..1].iter()), None);
    }
}
