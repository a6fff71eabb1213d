//! Column names shared across the pipeline and the typed accessors every component reads
//! feature data through.

use polars::prelude::*;

use crate::error::{QualityError, Result};

/// Canonical name of the resolved timestamp column.
pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const ANOMALY_SCORE_COLUMN: &str = "anomaly_score";
pub const IS_ANOMALY_COLUMN: &str = "is_anomaly";

/// Physical dtype the resolver emits for every timestamp column.
pub const TIMESTAMP_DTYPE: DataType = DataType::Datetime(TimeUnit::Milliseconds, None);

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_index(name).is_some()
}

pub fn column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column> {
    df.column(name)
        .map_err(|_| QualityError::missing_column(name))
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Reads a column as `f64` values after checking that it exists and is numeric. Never coerces
/// strings or booleans.
pub fn numeric_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let source = column(df, name)?;
    if !is_numeric_dtype(source.dtype()) {
        return Err(QualityError::NonNumericColumn {
            column: name.to_string(),
            dtype: source.dtype().clone(),
        });
    }

    let values = source.cast(&DataType::Float64)?;
    Ok(values.f64()?.into_iter().collect())
}

/// Milliseconds since the epoch for every row of an already-resolved timestamp series.
pub fn timestamp_millis(series: &Series) -> Result<Vec<Option<i64>>> {
    let physical = series.cast(&TIMESTAMP_DTYPE)?.cast(&DataType::Int64)?;
    Ok(physical.i64()?.into_iter().collect())
}

pub fn is_timestamp_column(column: &Column) -> bool {
    matches!(column.dtype(), DataType::Datetime(_, _))
}
