//! The fixed-order preprocessing chain and the per-dataset profiles that plug policy into it.

mod policies;
mod registry;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::columns::{is_timestamp_column, TIMESTAMP_COLUMN};
use crate::error::{QualityError, Result};

pub use policies::{
    ColumnSelection, FinalizePolicy, MissingValuePolicy, RangeRule, RangeValidation,
    TimestampPolicy, UnitNormalization,
};
pub use registry::{DatasetId, DatasetProfile, PreprocessingOrchestrator, PreprocessorRegistry};

/// One slot in the preprocessing chain. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SelectColumns,
    ResolveTimestamps,
    NormalizeUnits,
    ValidateRanges,
    HandleMissing,
    Finalize,
}

impl Stage {
    pub const ORDER: [Stage; 6] = [
        Stage::SelectColumns,
        Stage::ResolveTimestamps,
        Stage::NormalizeUnits,
        Stage::ValidateRanges,
        Stage::HandleMissing,
        Stage::Finalize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::SelectColumns => "select_columns",
            Stage::ResolveTimestamps => "resolve_timestamps",
            Stage::NormalizeUnits => "normalize_units",
            Stage::ValidateRanges => "validate_ranges",
            Stage::HandleMissing => "handle_missing",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stage implementation: reads the current batch, returns the next one.
pub type StageFn = Arc<dyn Fn(&DataFrame) -> Result<DataFrame> + Send + Sync>;

/// Per-dataset stage table. Stages without an entry run as identity.
#[derive(Clone, Default)]
pub struct StageOverrides {
    stages: HashMap<Stage, StageFn>,
}

impl StageOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, stage: Stage, run: F) -> Self
    where
        F: Fn(&DataFrame) -> Result<DataFrame> + Send + Sync + 'static,
    {
        self.set(stage, run);
        self
    }

    pub fn set<F>(&mut self, stage: Stage, run: F)
    where
        F: Fn(&DataFrame) -> Result<DataFrame> + Send + Sync + 'static,
    {
        self.stages.insert(stage, Arc::new(run));
    }

    pub fn get(&self, stage: Stage) -> Option<&StageFn> {
        self.stages.get(&stage)
    }

    /// Overridden stages, in execution order.
    pub fn overridden(&self) -> Vec<Stage> {
        Stage::ORDER
            .into_iter()
            .filter(|stage| self.stages.contains_key(stage))
            .collect()
    }
}

impl fmt::Debug for StageOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageOverrides")
            .field("stages", &self.overridden())
            .finish()
    }
}

/// Runs [`Stage::ORDER`] over a batch. The order is owned here; profiles can only replace what
/// a stage does, never where it runs.
///
/// Any stage error aborts the chain and is reported as [`QualityError::Stage`]. After each
/// overridden stage the output is checked against the chain contract: a stage may not discard
/// every column, and once the canonical `timestamp` column has been resolved no later stage may
/// drop it or change its type.
#[derive(Debug, Clone, Default)]
pub struct StepChainPreprocessor {
    overrides: StageOverrides,
}

impl StepChainPreprocessor {
    pub fn new(overrides: StageOverrides) -> Self {
        Self { overrides }
    }

    pub fn stages(&self) -> [Stage; 6] {
        Stage::ORDER
    }

    pub fn overrides(&self) -> &StageOverrides {
        &self.overrides
    }

    pub fn preprocess(&self, batch: &DataFrame) -> Result<DataFrame> {
        let mut current = batch.clone();
        let mut timestamp_resolved = false;

        for stage in Stage::ORDER {
            debug!(
                stage = stage.name(),
                rows = current.height(),
                columns = current.width(),
                "Entering preprocessing stage"
            );

            if let Some(run) = self.overrides.get(stage) {
                let next = run(&current).map_err(|source| QualityError::Stage {
                    stage,
                    source: Box::new(source),
                })?;
                check_contract(stage, &current, &next, timestamp_resolved)?;
                current = next;
            }

            if stage >= Stage::ResolveTimestamps && has_resolved_timestamp(&current) {
                timestamp_resolved = true;
            }

            debug!(
                stage = stage.name(),
                rows = current.height(),
                columns = current.width(),
                "Exiting preprocessing stage"
            );
        }

        Ok(current)
    }
}

fn has_resolved_timestamp(df: &DataFrame) -> bool {
    df.column(TIMESTAMP_COLUMN)
        .map(is_timestamp_column)
        .unwrap_or(false)
}

fn check_contract(
    stage: Stage,
    input: &DataFrame,
    output: &DataFrame,
    timestamp_resolved: bool,
) -> Result<()> {
    if input.width() > 0 && output.width() == 0 {
        return Err(QualityError::Contract {
            stage,
            message: "stage discarded every column".to_string(),
        });
    }

    if timestamp_resolved && !has_resolved_timestamp(output) {
        return Err(QualityError::Contract {
            stage,
            message: format!(
                "resolved '{TIMESTAMP_COLUMN}' column was dropped or is no longer a datetime"
            ),
        });
    }

    Ok(())
}
