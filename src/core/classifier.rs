//! Regularised logistic regression for the next-bar direction.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::storage;
use crate::{PortfolioError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    pub learning_rate: f64,
    pub iterations: usize,
    /// L2 penalty on the weights, not on the bias.
    pub l2: f64,
    pub threshold: f64,
    pub test_size: f64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            iterations: 2000,
            l2: 0.01,
            threshold: 0.5,
            test_size: 0.2,
        }
    }
}

/// A fitted model with the standardisation it was trained under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub feature_names: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub weights: Vec<f64>,
    pub bias: f64,
    pub params: TrainingParams,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn check_finite(rows: &[Vec<f64>]) -> Result<()> {
    for (i, row) in rows.iter().enumerate() {
        if row.iter().any(|v| !v.is_finite()) {
            return Err(PortfolioError::Model(format!("Row {i} contains a non-finite value")));
        }
    }
    Ok(())
}

impl LogisticRegression {
    pub fn fit(feature_names: Vec<String>, x: &[Vec<f64>], y: &[u8], params: TrainingParams) -> Result<Self> {
        let n = x.len();
        let d = feature_names.len();
        if d == 0 {
            return Err(PortfolioError::Model("No feature columns".to_string()));
        }
        if n < 2 {
            return Err(PortfolioError::Model(format!("Need at least 2 training rows, got {n}")));
        }
        if y.len() != n {
            return Err(PortfolioError::Model(format!(
                "{} feature rows but {} labels",
                n,
                y.len()
            )));
        }
        if let Some(row) = x.iter().find(|r| r.len() != d) {
            return Err(PortfolioError::Model(format!(
                "Expected {} features per row, found {}",
                d,
                row.len()
            )));
        }
        let positives = y.iter().filter(|&&v| v == 1).count();
        if positives == 0 || positives == n {
            return Err(PortfolioError::Model(
                "Training labels contain a single class".to_string(),
            ));
        }
        check_finite(x)?;
        let bad_rate = !params.learning_rate.is_finite() || params.learning_rate <= 0.0;
        if bad_rate || params.iterations == 0 || params.l2 < 0.0 {
            return Err(PortfolioError::Model(format!("Invalid training parameters: {params:?}")));
        }

        let mut means = vec![0.0; d];
        let mut scales = vec![1.0; d];
        for j in 0..d {
            let mean = x.iter().map(|r| r[j]).sum::<f64>() / n as f64;
            let var = x.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / n as f64;
            means[j] = mean;
            if var.sqrt() > 1e-12 {
                scales[j] = var.sqrt();
            }
        }

        let design = DMatrix::from_fn(n, d, |i, j| (x[i][j] - means[j]) / scales[j]);
        let labels = DVector::from_iterator(n, y.iter().map(|&v| f64::from(v)));
        let mut w = DVector::<f64>::zeros(d);
        let mut b = 0.0;
        let inv_n = 1.0 / n as f64;

        for iter in 0..params.iterations {
            let probs = (&design * &w).add_scalar(b).map(sigmoid);
            let err = probs - &labels;
            let grad_w = design.tr_mul(&err) * inv_n + &w * params.l2;
            let grad_b = err.sum() * inv_n;
            w -= &grad_w * params.learning_rate;
            b -= grad_b * params.learning_rate;

            if iter % 500 == 0 {
                debug!("iteration {}: |grad| = {:.6}", iter, grad_w.norm());
            }
        }

        info!("Fitted logistic regression on {} rows x {} features", n, d);
        Ok(Self {
            feature_names,
            means,
            scales,
            weights: w.iter().copied().collect(),
            bias: b,
            params,
        })
    }

    /// Probability that the row belongs to class 1.
    pub fn predict_proba(&self, row: &[f64]) -> Result<f64> {
        if row.len() != self.weights.len() {
            return Err(PortfolioError::Model(format!(
                "Model expects {} features, got {}",
                self.weights.len(),
                row.len()
            )));
        }
        let z = row
            .iter()
            .zip(self.means.iter().zip(&self.scales))
            .zip(&self.weights)
            .map(|((v, (m, s)), w)| (v - m) / s * w)
            .sum::<f64>()
            + self.bias;
        Ok(sigmoid(z))
    }

    pub fn predict(&self, row: &[f64]) -> Result<u8> {
        Ok(u8::from(self.predict_proba(row)? >= self.params.threshold))
    }

    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<u8>> {
        rows.iter().map(|r| self.predict(r)).collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        storage::write_json(path, self)?;
        info!("Model saved to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let model: Self = storage::read_json(path)?;
        let d = model.feature_names.len();
        if model.weights.len() != d || model.means.len() != d || model.scales.len() != d {
            return Err(PortfolioError::Model(format!(
                "{} is inconsistent: {} features but {} weights",
                path.display(),
                d,
                model.weights.len()
            )));
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{i}")).collect()
    }

    #[test]
    fn separates_linearly_separable_data() {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, 7.0]).collect();
        let y: Vec<u8> = (0..40).map(|i| u8::from(i >= 20)).collect();
        let model = LogisticRegression::fit(names(2), &x, &y, TrainingParams::default()).unwrap();

        assert_eq!(model.predict(&[2.0, 7.0]).unwrap(), 0);
        assert_eq!(model.predict(&[37.0, 7.0]).unwrap(), 1);
        // constant column keeps unit scale and gets no weight from the data
        assert_eq!(model.scales[1], 1.0);
        assert!(model.weights[1].abs() < 1e-9);
    }

    #[test]
    fn rejects_single_class_and_tiny_sets() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0]];
        assert!(LogisticRegression::fit(names(1), &x, &[1, 1, 1], TrainingParams::default()).is_err());
        assert!(LogisticRegression::fit(names(1), &x[..1], &[1], TrainingParams::default()).is_err());
    }

    #[test]
    fn rejects_wrong_width() {
        let x = vec![vec![1.0], vec![2.0]];
        let model = LogisticRegression::fit(names(1), &x, &[0, 1], TrainingParams::default()).unwrap();
        assert!(model.predict_proba(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn training_is_deterministic() {
        let x: Vec<Vec<f64>> = (0..30).map(|i| vec![(i as f64).sin(), i as f64 % 3.0]).collect();
        let y: Vec<u8> = (0..30).map(|i| u8::from(i % 2 == 0)).collect();
        let a = LogisticRegression::fit(names(2), &x, &y, TrainingParams::default()).unwrap();
        let b = LogisticRegression::fit(names(2), &x, &y, TrainingParams::default()).unwrap();
        assert_eq!(a, b);
    }
}
