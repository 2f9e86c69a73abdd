use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::classifier::{LogisticRegression, TrainingParams};
use super::dataset::{default_feature_columns, read_dataset_csv};
use super::evaluation::{accuracy, classification_report, confusion_matrix, ClassificationReport};
use crate::models::DatasetRow;
use crate::storage;
use crate::{PortfolioError, Result};

pub const MODEL_FILE_NAME: &str = "model.json";
pub const METRICS_FILE_NAME: &str = "training_metrics.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub accuracy: f64,
    pub classification_report: ClassificationReport,
    pub confusion_matrix: Vec<Vec<u64>>,
    pub features: Vec<String>,
    pub train_samples: usize,
    pub test_samples: usize,
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: LogisticRegression,
    pub metrics: TrainingMetrics,
}

/// Index where the test set starts. Rows before it train, rows from it on test.
pub fn chronological_split(len: usize, test_size: f64) -> Result<usize> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(PortfolioError::Model(format!(
            "test_size must be in (0, 1), got {test_size}"
        )));
    }
    Ok((len as f64 * (1.0 - test_size)).floor() as usize)
}

pub fn feature_matrix(rows: &[DatasetRow], features: &[String]) -> Result<Vec<Vec<f64>>> {
    rows.iter().map(|r| r.feature_vector(features)).collect()
}

/// Train on the chronological head of the rows and evaluate on the tail.
pub fn train_and_evaluate(rows: &[DatasetRow], params: TrainingParams) -> Result<TrainingOutcome> {
    let split = chronological_split(rows.len(), params.test_size)?;
    let (train, test) = rows.split_at(split);
    let (train_first, train_last, test_first, test_last) =
        match (train.first(), train.last(), test.first(), test.last()) {
            (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
            _ => {
                return Err(PortfolioError::Model(format!(
                    "Split of {} rows leaves {} train and {} test rows",
                    rows.len(),
                    train.len(),
                    test.len()
                )))
            }
        };
    info!(
        "{} train rows ({} to {}), {} test rows ({} to {})",
        train.len(),
        train_first.timestamp,
        train_last.timestamp,
        test.len(),
        test_first.timestamp,
        test_last.timestamp
    );

    let features = default_feature_columns();
    info!("Training on {} features (news columns excluded): {:?}", features.len(), features);

    let x_train = feature_matrix(train, &features)?;
    let y_train: Vec<u8> = train.iter().map(|r| r.target).collect();
    let model = LogisticRegression::fit(features.clone(), &x_train, &y_train, params)?;

    let x_test = feature_matrix(test, &features)?;
    let y_test: Vec<u8> = test.iter().map(|r| r.target).collect();
    let y_pred = model.predict_batch(&x_test)?;

    let cm = confusion_matrix(&y_test, &y_pred)?;
    let metrics = TrainingMetrics {
        accuracy: accuracy(&y_test, &y_pred)?,
        classification_report: classification_report(&y_test, &y_pred)?,
        confusion_matrix: cm.iter().map(|row| row.to_vec()).collect(),
        features,
        train_samples: train.len(),
        test_samples: test.len(),
        train_start: train_first.timestamp,
        train_end: train_last.timestamp,
        test_start: test_first.timestamp,
        test_end: test_last.timestamp,
    };
    info!("Test accuracy: {:.4}", metrics.accuracy);
    info!("Confusion matrix: {:?}", metrics.confusion_matrix);

    Ok(TrainingOutcome { model, metrics })
}

pub fn run_training_pipeline(
    data_path: &Path,
    model_out: &Path,
    metrics_out: &Path,
    params: TrainingParams,
) -> Result<TrainingOutcome> {
    info!("Starting training pipeline with data from {}", data_path.display());
    let rows = read_dataset_csv(data_path)?;
    let outcome = train_and_evaluate(&rows, params)?;

    outcome.model.save(model_out)?;
    storage::write_json(metrics_out, &outcome.metrics)?;
    info!("Metrics saved to {}", metrics_out.display());
    Ok(outcome)
}

pub fn read_training_metrics(path: &Path) -> Result<TrainingMetrics> {
    storage::read_json(path)
}
