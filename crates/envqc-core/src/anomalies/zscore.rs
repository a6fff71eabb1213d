use polars::prelude::*;
use tracing::info;

use super::{feature_matrix, validate_reference, AnomalyDetector};
use crate::columns::ANOMALY_SCORE_COLUMN;
use crate::error::{QualityError, Result};

/// Below this many observations a sample deviation is too noisy to divide by.
const MIN_OBSERVATIONS_FOR_STD: usize = 3;
const FALLBACK_STD: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureStats {
    pub mean: f64,
    pub std: f64,
}

impl FeatureStats {
    fn from_values(column: &str, values: &[Option<f64>]) -> Result<Self> {
        let observed: Vec<f64> = values
            .iter()
            .flatten()
            .copied()
            .filter(|value| value.is_finite())
            .collect();

        if observed.is_empty() {
            return Err(QualityError::NoObservations {
                column: column.to_string(),
            });
        }

        let n = observed.len() as f64;
        let mean = observed.iter().sum::<f64>() / n;

        let std = if observed.len() < MIN_OBSERVATIONS_FOR_STD {
            FALLBACK_STD
        } else {
            let variance =
                observed.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / (n - 1.0);
            let std = variance.sqrt();
            if std == 0.0 || std.is_nan() {
                FALLBACK_STD
            } else {
                std
            }
        };

        Ok(Self { mean, std })
    }

    pub fn z(&self, value: f64) -> f64 {
        (value - self.mean) / self.std
    }
}

/// Mean absolute z-score across features, against the reference batch's mean and sample
/// standard deviation. Scores depend only on the fitted state, so they are comparable across
/// calls.
#[derive(Debug, Clone, Default)]
pub struct ZScoreDetector {
    feature_columns: Vec<String>,
    stats: Vec<FeatureStats>,
    emit_component_scores: bool,
}

impl ZScoreDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also emit a signed `z_<column>` per feature when scoring.
    pub fn with_component_scores(mut self, enabled: bool) -> Self {
        self.emit_component_scores = enabled;
        self
    }

    pub fn feature_stats(&self, column: &str) -> Option<FeatureStats> {
        self.feature_columns
            .iter()
            .position(|name| name == column)
            .map(|idx| self.stats[idx])
    }
}

impl AnomalyDetector for ZScoreDetector {
    fn name(&self) -> &'static str {
        "ZScoreDetector"
    }

    fn is_fitted(&self) -> bool {
        !self.stats.is_empty()
    }

    fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    fn fit(&mut self, reference: &DataFrame, feature_columns: &[&str]) -> Result<()> {
        let columns = validate_reference(reference, feature_columns)?;
        let stats = feature_columns
            .iter()
            .zip(&columns)
            .map(|(name, values)| FeatureStats::from_values(name, values))
            .collect::<Result<Vec<_>>>()?;

        for (name, fitted) in feature_columns.iter().zip(&stats) {
            info!(
                feature = *name,
                mean = fitted.mean,
                std = fitted.std,
                "Fitted z-score feature"
            );
        }

        self.feature_columns = feature_columns.iter().map(|name| name.to_string()).collect();
        self.stats = stats;
        Ok(())
    }

    fn score(&self, batch: &DataFrame) -> Result<DataFrame> {
        if !self.is_fitted() {
            return Err(QualityError::NotFitted {
                detector: self.name(),
                operation: "score",
            });
        }

        let columns = feature_matrix(batch, &self.feature_columns)?;

        let component_scores: Vec<Vec<Option<f64>>> = columns
            .iter()
            .zip(&self.stats)
            .map(|(values, fitted)| {
                values
                    .iter()
                    .map(|value| value.filter(|v| v.is_finite()).map(|v| fitted.z(v)))
                    .collect()
            })
            .collect();

        let scores: Vec<Option<f64>> = (0..batch.height())
            .map(|row| {
                let (sum, count) = component_scores
                    .iter()
                    .filter_map(|z| z[row])
                    .fold((0.0, 0usize), |(sum, count), z| (sum + z.abs(), count + 1));
                (count > 0).then(|| sum / count as f64)
            })
            .collect();

        let mut out = batch.clone();
        if self.emit_component_scores {
            for (name, z) in self.feature_columns.iter().zip(component_scores) {
                out.with_column(Series::new(format!("z_{name}").into(), z))?;
            }
        }
        out.with_column(Series::new(ANOMALY_SCORE_COLUMN.into(), scores))?;

        Ok(out)
    }
}
