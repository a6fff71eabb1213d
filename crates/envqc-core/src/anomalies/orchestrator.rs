use polars::prelude::*;
use tracing::info;

use super::AnomalyDetector;
use crate::columns::IS_ANOMALY_COLUMN;
use crate::error::Result;

/// Fits one detector on a reference batch and runs detection on target batches.
pub struct AnomalyOrchestrator {
    detector: Box<dyn AnomalyDetector>,
}

impl AnomalyOrchestrator {
    pub fn new(detector: Box<dyn AnomalyDetector>) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &dyn AnomalyDetector {
        self.detector.as_ref()
    }

    pub fn fit_on_reference(
        &mut self,
        reference: &DataFrame,
        feature_columns: &[&str],
    ) -> Result<()> {
        info!(
            detector = self.detector.name(),
            rows = reference.height(),
            features = ?feature_columns,
            "Fitting detector on reference batch"
        );
        self.detector.fit(reference, feature_columns)
    }

    pub fn run_detection(&self, target: &DataFrame, threshold: f64) -> Result<DataFrame> {
        let detected = self.detector.detect(target, threshold)?;

        let flagged = flagged_count(&detected);
        info!(
            detector = self.detector.name(),
            rows = detected.height(),
            flagged,
            threshold,
            "Detection finished"
        );

        Ok(detected)
    }
}

fn flagged_count(detected: &DataFrame) -> usize {
    detected
        .column(IS_ANOMALY_COLUMN)
        .ok()
        .and_then(|column| column.bool().ok().map(|flags| flags.num_trues()))
        .unwrap_or_default()
}
