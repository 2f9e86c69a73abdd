use serde::{Deserialize, Serialize};

use crate::{PortfolioError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    #[serde(rename = "f1-score")]
    pub f1_score: f64,
    pub support: u64,
}

/// Per-class precision, recall and F1 for a binary up/down classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    #[serde(rename = "0")]
    pub down: ClassMetrics,
    #[serde(rename = "1")]
    pub up: ClassMetrics,
    pub accuracy: f64,
    #[serde(rename = "macro avg")]
    pub macro_avg: ClassMetrics,
    #[serde(rename = "weighted avg")]
    pub weighted_avg: ClassMetrics,
}

fn check_lengths(y_true: &[u8], y_pred: &[u8]) -> Result<()> {
    if y_true.len() != y_pred.len() {
        return Err(PortfolioError::Model(format!(
            "{} labels but {} predictions",
            y_true.len(),
            y_pred.len()
        )));
    }
    if y_true.is_empty() {
        return Err(PortfolioError::Model("Nothing to evaluate".to_string()));
    }
    Ok(())
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

pub fn accuracy(y_true: &[u8], y_pred: &[u8]) -> Result<f64> {
    check_lengths(y_true, y_pred)?;
    let hits = y_true.iter().zip(y_pred).filter(|(a, b)| a == b).count() as u64;
    Ok(ratio(hits, y_true.len() as u64))
}

/// Rows are the actual class (0, 1), columns the predicted class.
pub fn confusion_matrix(y_true: &[u8], y_pred: &[u8]) -> Result<[[u64; 2]; 2]> {
    check_lengths(y_true, y_pred)?;
    let mut cm = [[0u64; 2]; 2];
    for (&actual, &predicted) in y_true.iter().zip(y_pred) {
        if actual > 1 || predicted > 1 {
            return Err(PortfolioError::Model(format!(
                "Labels must be 0 or 1, got ({actual}, {predicted})"
            )));
        }
        cm[actual as usize][predicted as usize] += 1;
    }
    Ok(cm)
}

fn class_metrics(cm: &[[u64; 2]; 2], class: usize) -> ClassMetrics {
    let other = 1 - class;
    let tp = cm[class][class];
    let fp = cm[other][class];
    let fn_ = cm[class][other];
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1_score = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    ClassMetrics {
        precision,
        recall,
        f1_score,
        support: tp + fn_,
    }
}

pub fn classification_report(y_true: &[u8], y_pred: &[u8]) -> Result<ClassificationReport> {
    let cm = confusion_matrix(y_true, y_pred)?;
    let down = class_metrics(&cm, 0);
    let up = class_metrics(&cm, 1);
    let total = down.support + up.support;

    let macro_avg = ClassMetrics {
        precision: (down.precision + up.precision) / 2.0,
        recall: (down.recall + up.recall) / 2.0,
        f1_score: (down.f1_score + up.f1_score) / 2.0,
        support: total,
    };
    let weigh = |a: f64, b: f64| (a * down.support as f64 + b * up.support as f64) / total as f64;
    let weighted_avg = ClassMetrics {
        precision: weigh(down.precision, up.precision),
        recall: weigh(down.recall, up.recall),
        f1_score: weigh(down.f1_score, up.f1_score),
        support: total,
    };

    Ok(ClassificationReport {
        down,
        up,
        accuracy: accuracy(y_true, y_pred)?,
        macro_avg,
        weighted_avg,
    })
}
