use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::isolation_forest::IsolationForest;
use super::{feature_matrix, validate_reference, AnomalyDetector};
use crate::columns::ANOMALY_SCORE_COLUMN;
use crate::error::{QualityError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityParams {
    pub n_estimators: usize,
    /// Rows drawn (without replacement) to grow each tree; capped at the reference size.
    pub max_samples: usize,
    /// Expected share of anomalies in the reference batch, in `(0, 0.5]`.
    pub contamination: f64,
    pub seed: u64,
}

impl Default for DensityParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.01,
            seed: 42,
        }
    }
}

impl DensityParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(QualityError::InvalidConfig(
                "n_estimators must be at least 1".to_string(),
            ));
        }
        if self.max_samples == 0 {
            return Err(QualityError::InvalidConfig(
                "max_samples must be at least 1".to_string(),
            ));
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(QualityError::InvalidConfig(format!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct FittedForest {
    forest: IsolationForest,
    training_offset: f64,
}

/// Isolation-forest detector.
///
/// Scores are min-max normalized to `[0, 1]` within each `score` call: the most anomalous row
/// of a batch is always 1 and the least anomalous always 0. A score therefore ranks rows inside
/// one batch and is not comparable across batches. For a batch-independent cut-off compare
/// [`DensityAnomalyDetector::raw_scores`] against [`DensityAnomalyDetector::training_offset`].
///
/// Rows with a missing or non-finite feature value are skipped when fitting and get a missing
/// score.
#[derive(Debug, Clone)]
pub struct DensityAnomalyDetector {
    params: DensityParams,
    feature_columns: Vec<String>,
    fitted: Option<FittedForest>,
}

impl Default for DensityAnomalyDetector {
    fn default() -> Self {
        Self {
            params: DensityParams::default(),
            feature_columns: Vec::new(),
            fitted: None,
        }
    }
}

impl DensityAnomalyDetector {
    pub fn new(params: DensityParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            ..Self::default()
        })
    }

    pub fn params(&self) -> &DensityParams {
        &self.params
    }

    /// Raw score at the `contamination` quantile of the reference batch: that share of
    /// reference rows scored below it.
    pub fn training_offset(&self) -> Option<f64> {
        self.fitted.as_ref().map(|fitted| fitted.training_offset)
    }

    /// Unnormalized outlier measure per row, `-(2^(-E[h(x)]/c(ψ)))`. More negative is more
    /// anomalous.
    pub fn raw_scores(&self, batch: &DataFrame) -> Result<Vec<Option<f64>>> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| QualityError::NotFitted {
                detector: self.name(),
                operation: "raw_scores",
            })?;

        let columns = feature_matrix(batch, &self.feature_columns)?;
        Ok(complete_rows(&columns, batch.height())
            .into_iter()
            .map(|row| row.map(|values| fitted.forest.score_sample(&values)))
            .collect())
    }
}

impl AnomalyDetector for DensityAnomalyDetector {
    fn name(&self) -> &'static str {
        "DensityAnomalyDetector"
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    fn fit(&mut self, reference: &DataFrame, feature_columns: &[&str]) -> Result<()> {
        let columns = validate_reference(reference, feature_columns)?;
        let rows: Vec<Vec<f64>> = complete_rows(&columns, reference.height())
            .into_iter()
            .flatten()
            .collect();

        if rows.is_empty() {
            return Err(QualityError::NoCompleteRows {
                columns: feature_columns.join(", "),
            });
        }

        let forest = IsolationForest::fit(
            &rows,
            self.params.n_estimators,
            self.params.max_samples,
            self.params.seed,
        );

        let mut training_scores: Vec<f64> =
            rows.iter().map(|row| forest.score_sample(row)).collect();
        training_scores.sort_by(f64::total_cmp);
        let training_offset = quantile(&training_scores, self.params.contamination);

        info!(
            detector = self.name(),
            rows = rows.len(),
            skipped = reference.height() - rows.len(),
            trees = forest.n_trees(),
            training_offset,
            "Fitted isolation forest"
        );

        self.feature_columns = feature_columns.iter().map(|name| name.to_string()).collect();
        self.fitted = Some(FittedForest {
            forest,
            training_offset,
        });
        Ok(())
    }

    fn score(&self, batch: &DataFrame) -> Result<DataFrame> {
        if !self.is_fitted() {
            return Err(QualityError::NotFitted {
                detector: self.name(),
                operation: "score",
            });
        }

        let outlier_measure: Vec<Option<f64>> = self
            .raw_scores(batch)?
            .into_iter()
            .map(|raw| raw.map(|raw| -raw))
            .collect();
        let scores = min_max_normalize(&outlier_measure);

        debug!(
            rows = batch.height(),
            scored = scores.iter().flatten().count(),
            "Scored batch with isolation forest"
        );

        let mut out = batch.clone();
        out.with_column(Series::new(ANOMALY_SCORE_COLUMN.into(), scores))?;
        Ok(out)
    }
}

/// Row-major view of column-major feature values; `None` for rows with any missing or
/// non-finite value.
fn complete_rows(columns: &[Vec<Option<f64>>], height: usize) -> Vec<Option<Vec<f64>>> {
    (0..height)
        .map(|row| {
            columns
                .iter()
                .map(|values| values[row].filter(|value| value.is_finite()))
                .collect::<Option<Vec<f64>>>()
        })
        .collect()
}

/// Linear-interpolated quantile of an ascending slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let position = q * (n - 1) as f64;
            let lower = position.floor() as usize;
            let upper = position.ceil() as usize;
            let fraction = position - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
        }
    }
}

fn min_max_normalize(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let min = values
        .iter()
        .flatten()
        .copied()
        .fold(f64::INFINITY, f64::min);
    if !min.is_finite() {
        return values.to_vec();
    }

    let shifted: Vec<Option<f64>> = values.iter().map(|v| v.map(|v| v - min)).collect();
    let max = shifted.iter().flatten().copied().fold(0.0, f64::max);
    if max > 0.0 {
        shifted.into_iter().map(|v| v.map(|v| v / max)).collect()
    } else {
        shifted
    }
}
