//! Fit/score/detect anomaly detectors over numeric feature columns.

mod density;
mod isolation_forest;
mod orchestrator;
mod zscore;

use polars::prelude::*;
use serde::Deserialize;

use crate::columns::{numeric_values, ANOMALY_SCORE_COLUMN, IS_ANOMALY_COLUMN};
use crate::error::{QualityError, Result};

pub use density::{DensityAnomalyDetector, DensityParams};
pub use orchestrator::AnomalyOrchestrator;
pub use zscore::{FeatureStats, ZScoreDetector};

/// A detector learns what normal looks like from a reference batch, then scores other batches.
///
/// `score` appends a Float64 `anomaly_score` column (higher is more anomalous) and must fail
/// with [`QualityError::NotFitted`] until `fit` has succeeded once. Refitting replaces the
/// previous state only when the new fit succeeds.
pub trait AnomalyDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_fitted(&self) -> bool;

    /// Feature columns captured by the last successful fit.
    fn feature_columns(&self) -> &[String];

    fn fit(&mut self, reference: &DataFrame, feature_columns: &[&str]) -> Result<()>;

    fn score(&self, batch: &DataFrame) -> Result<DataFrame>;

    /// Scores the batch and appends `is_anomaly = anomaly_score >= threshold`. A missing score
    /// yields a missing flag.
    fn detect(&self, batch: &DataFrame, threshold: f64) -> Result<DataFrame> {
        if !self.is_fitted() {
            return Err(QualityError::NotFitted {
                detector: self.name(),
                operation: "detect",
            });
        }
        if threshold.is_nan() {
            return Err(QualityError::InvalidConfig(
                "detection threshold must be a number".to_string(),
            ));
        }

        let scored = self.score(batch)?;
        flag_anomalies(scored, threshold)
    }
}

/// Appends `is_anomaly` to a frame that already carries `anomaly_score`.
pub fn flag_anomalies(mut scored: DataFrame, threshold: f64) -> Result<DataFrame> {
    let flags: Vec<Option<bool>> = numeric_values(&scored, ANOMALY_SCORE_COLUMN)?
        .into_iter()
        .map(|score| score.map(|score| score >= threshold))
        .collect();

    scored.with_column(Series::new(IS_ANOMALY_COLUMN.into(), flags))?;
    Ok(scored)
}

/// Checks a reference batch and reads every feature column. Shared by all `fit` implementations.
pub(crate) fn validate_reference(
    reference: &DataFrame,
    feature_columns: &[&str],
) -> Result<Vec<Vec<Option<f64>>>> {
    if reference.height() == 0 {
        return Err(QualityError::EmptyBatch {
            context: "reference batch",
        });
    }
    if feature_columns.is_empty() {
        return Err(QualityError::InvalidConfig(
            "at least one feature column is required".to_string(),
        ));
    }

    feature_columns
        .iter()
        .map(|name| numeric_values(reference, name))
        .collect()
}

/// Reads the fitted feature columns from a batch being scored, column by column.
pub(crate) fn feature_matrix(
    batch: &DataFrame,
    feature_columns: &[String],
) -> Result<Vec<Vec<Option<f64>>>> {
    feature_columns
        .iter()
        .map(|name| numeric_values(batch, name))
        .collect()
}

/// Detector selection as read from a TOML file.
///
/// ```toml
/// kind = "density"
/// n_estimators = 200
/// contamination = 0.02
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorConfig {
    Zscore {
        #[serde(default)]
        component_scores: bool,
    },
    Density(DensityParams),
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig::Zscore {
            component_scores: false,
        }
    }
}

impl DetectorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn build(&self) -> Result<Box<dyn AnomalyDetector>> {
        match self {
            DetectorConfig::Zscore { component_scores } => Ok(Box::new(
                ZScoreDetector::new().with_component_scores(*component_scores),
            )),
            DetectorConfig::Density(params) => {
                Ok(Box::new(DensityAnomalyDetector::new(params.clone())?))
            }
        }
    }
}
