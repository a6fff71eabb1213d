// crates/envqc/src/commands/detect.rs

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use envqc_core::columns::{ANOMALY_SCORE_COLUMN, IS_ANOMALY_COLUMN, TIMESTAMP_COLUMN};
use envqc_core::{AnomalyOrchestrator, RollingWindowFeaturizer, TimeFeatureDeriver};
use polars::prelude::*;
use tracing::info;

use super::render_rows;
use crate::input::{parse_dataset, Settings};

#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Dataset id both files belong to
    #[arg(long)]
    dataset: String,

    /// Mostly-normal batch the detector is fitted on
    #[arg(long)]
    reference: PathBuf,

    /// Batch to flag
    #[arg(long)]
    target: PathBuf,

    /// Feature columns, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    features: Vec<String>,

    /// Rows scoring at or above this value are flagged. Z-scores are in standard deviations,
    /// density scores in [0, 1]
    #[arg(long, default_value_t = 3.0)]
    threshold: f64,

    /// Add hour, weekday, month, year, weekend and season columns and use them as features
    #[arg(long)]
    time_features: bool,

    /// Add trailing mean/std columns over this window (e.g. 1h, 30m) and use them as features
    #[arg(long)]
    rolling_window: Vec<String>,

    /// Flagged rows to print
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

const TIME_FEATURES: [&str; 3] = ["hour", "day_of_week", "is_weekend"];

pub fn run(settings: &Settings, args: DetectArgs) -> Result<()> {
    let dataset = parse_dataset(&args.dataset)?;
    let orchestrator = settings.orchestrator();

    let reference = orchestrator
        .preprocess(dataset, &settings.read_csv(&args.reference)?)
        .context("preprocessing the reference batch failed")?;
    let target = orchestrator
        .preprocess(dataset, &settings.read_csv(&args.target)?)
        .context("preprocessing the target batch failed")?;

    let mut features = args.features.clone();
    let reference = derive_features(&reference, &args, &mut features)?;
    let target = derive_features(&target, &args, &mut Vec::new())?;
    // The derived frame carries `is_weekend` as a boolean; detectors read numbers only.
    let reference = numeric_flags(reference)?;
    let target = numeric_flags(target)?;

    let feature_refs: Vec<&str> = features.iter().map(String::as_str).collect();
    let mut detector = AnomalyOrchestrator::new(settings.detector.build()?);
    detector
        .fit_on_reference(&reference, &feature_refs)
        .context("fitting the detector failed")?;
    let detected = detector
        .run_detection(&target, args.threshold)
        .context("detection failed")?;

    let flagged = detected.filter(detected.column(IS_ANOMALY_COLUMN)?.bool()?)?;
    info!(
        dataset = dataset.code(),
        rows = detected.height(),
        flagged = flagged.height(),
        "Detection summary"
    );
    println!(
        "{} of {} target rows flagged by {} at threshold {}",
        flagged.height(),
        detected.height(),
        detector.detector().name(),
        args.threshold
    );

    if flagged.height() > 0 && args.limit > 0 {
        let mut columns = Vec::new();
        if flagged.get_column_index(TIMESTAMP_COLUMN).is_some() {
            columns.push(TIMESTAMP_COLUMN.to_string());
        }
        columns.extend(args.features.iter().cloned());
        columns.push(ANOMALY_SCORE_COLUMN.to_string());
        println!("{}", render_rows(&flagged, &columns, args.limit)?);
    }
    Ok(())
}

fn derive_features(
    df: &DataFrame,
    args: &DetectArgs,
    features: &mut Vec<String>,
) -> Result<DataFrame> {
    let mut out = df.clone();

    if args.time_features {
        out = TimeFeatureDeriver::new()
            .add_time_features(&out)
            .context("deriving time features failed")?;
        features.extend(TIME_FEATURES.iter().map(|name| name.to_string()));
    }

    if !args.rolling_window.is_empty() {
        let base: Vec<&str> = args.features.iter().map(String::as_str).collect();
        let windows: Vec<&str> = args.rolling_window.iter().map(String::as_str).collect();
        out = RollingWindowFeaturizer::new()
            .add_rolling_features(&out, &base, &windows)
            .context("deriving rolling features failed")?;
        for name in &args.features {
            for window in &args.rolling_window {
                features.push(format!("{name}_roll_mean_{window}"));
                features.push(format!("{name}_roll_std_{window}"));
            }
        }
    }

    Ok(out)
}

fn numeric_flags(mut df: DataFrame) -> Result<DataFrame> {
    let numeric = match df.column("is_weekend") {
        Ok(column) if column.dtype() == &DataType::Boolean => Some(column.cast(&DataType::Int32)?),
        _ => None,
    };
    if let Some(numeric) = numeric {
        df.with_column(numeric)?;
    }
    Ok(df)
}
