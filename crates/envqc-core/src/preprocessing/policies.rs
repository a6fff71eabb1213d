use std::collections::{BTreeMap, HashSet};

use chrono_tz::Tz;
use polars::prelude::*;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::columns::{
    column, column_names, has_column, is_numeric_dtype, is_timestamp_column, numeric_values,
    timestamp_millis, TIMESTAMP_COLUMN, TIMESTAMP_DTYPE,
};
use crate::error::{QualityError, Result};
use crate::timestamp_resolver::TimestampResolver;

/// Keeps an explicit allow-list and drops raw or diagnostic channels by name prefix.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnSelection {
    /// Columns to keep. Empty keeps everything not dropped by prefix.
    pub keep: Vec<String>,
    pub drop_prefixes: Vec<String>,
    /// Columns that must be present; they are always kept.
    pub required: Vec<String>,
}

impl ColumnSelection {
    pub fn apply(&self, df: &DataFrame) -> Result<DataFrame> {
        if let Some(missing) = self.required.iter().find(|name| !has_column(df, name)) {
            return Err(QualityError::missing_column(missing.as_str()));
        }

        let selected: Vec<String> = column_names(df)
            .into_iter()
            .filter(|name| {
                if self.required.contains(name) {
                    return true;
                }
                let allowed = self.keep.is_empty() || self.keep.contains(name);
                let dropped = self
                    .drop_prefixes
                    .iter()
                    .any(|prefix| name.starts_with(prefix.as_str()));
                allowed && !dropped
            })
            .collect();

        debug!(
            kept = selected.len(),
            dropped = df.width() - selected.len(),
            "Selected columns"
        );

        Ok(df.select(selected)?)
    }
}

/// Resolves the canonical `timestamp` column from an ordered list of candidate source columns.
/// When several candidates are present, each row takes the first candidate that resolves.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimestampPolicy {
    pub candidates: Vec<String>,
    /// Fail instead of passing the batch through when no candidate column is present.
    pub required: bool,
    /// IANA zone naive text timestamps are recorded in, e.g. `Europe/Berlin`.
    pub timezone: Option<String>,
}

impl TimestampPolicy {
    pub fn resolver(&self) -> Result<TimestampResolver> {
        match &self.timezone {
            None => Ok(TimestampResolver::new()),
            Some(name) => name
                .parse::<Tz>()
                .map(TimestampResolver::with_source_timezone)
                .map_err(|_| QualityError::InvalidConfig(format!("unknown time zone '{name}'"))),
        }
    }

    pub fn apply(&self, df: &DataFrame) -> Result<DataFrame> {
        let present: Vec<&String> = self
            .candidates
            .iter()
            .filter(|name| has_column(df, name))
            .collect();

        if present.is_empty() {
            if self.required {
                return Err(QualityError::missing_column(self.candidates.join(" | ")));
            }
            return Ok(df.clone());
        }

        let resolver = self.resolver()?;
        let mut merged: Vec<Option<i64>> = vec![None; df.height()];
        for name in present {
            let resolved = resolver.resolve(column(df, name)?)?;
            let millis = timestamp_millis(&resolved)?;
            for (slot, value) in merged.iter_mut().zip(millis) {
                if slot.is_none() {
                    *slot = value;
                }
            }
        }

        let unresolved = merged.iter().filter(|value| value.is_none()).count();
        if unresolved > 0 {
            warn!(unresolved, "Some timestamps could not be resolved");
        }

        let timestamp = Series::new(TIMESTAMP_COLUMN.into(), merged).cast(&TIMESTAMP_DTYPE)?;
        let mut out = df.clone();
        out.with_column(timestamp)?;
        Ok(out)
    }
}

/// Renames vendor field names to canonical names and optionally coerces measurement columns to
/// `Float64`. Coercion is per value: text that is not a number becomes missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnitNormalization {
    /// Vendor name → canonical name.
    pub renames: BTreeMap<String, String>,
    pub coerce_numeric: bool,
    /// Columns left untouched by coercion. Datetime columns are never coerced.
    pub coerce_exclude: Vec<String>,
}

impl UnitNormalization {
    pub fn apply(&self, df: &DataFrame) -> Result<DataFrame> {
        let existing = column_names(df);
        let mut columns: Vec<Column> = Vec::with_capacity(df.width());
        let mut seen: HashSet<String> = HashSet::with_capacity(df.width());

        for source in df.get_columns() {
            let name = source.name().to_string();
            let mut series = source.as_materialized_series().clone();

            if let Some(canonical) = self.renames.get(&name) {
                if canonical != &name
                    && existing.contains(canonical)
                    && !self.renames.contains_key(canonical)
                {
                    return Err(QualityError::DuplicateColumn {
                        from: name,
                        to: canonical.clone(),
                    });
                }
                series.rename(canonical.as_str().into());
            }

            let final_name = series.name().to_string();
            if !seen.insert(final_name.clone()) {
                return Err(QualityError::DuplicateColumn {
                    from: name,
                    to: final_name,
                });
            }

            let coerce = self.coerce_numeric
                && !self.coerce_exclude.contains(&final_name)
                && !self.coerce_exclude.contains(&name)
                && final_name != TIMESTAMP_COLUMN
                && !is_timestamp_column(source)
                && series.dtype() != &DataType::Float64;
            if coerce {
                series = series.cast(&DataType::Float64)?;
            }

            columns.push(series.into());
        }

        Ok(DataFrame::new(columns)?)
    }
}

/// Physical bounds for one column. Missing bounds are open.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeRule {
    pub column: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default = "inclusive")]
    pub min_inclusive: bool,
    #[serde(default = "inclusive")]
    pub max_inclusive: bool,
}

fn inclusive() -> bool {
    true
}

impl RangeRule {
    /// `[min, max]` inclusive on both ends.
    pub fn closed(column: &str, min: f64, max: f64) -> Self {
        Self {
            column: column.to_string(),
            min: Some(min),
            max: Some(max),
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    /// `(min, max)` exclusive on both ends.
    pub fn open(column: &str, min: f64, max: f64) -> Self {
        Self {
            min_inclusive: false,
            max_inclusive: false,
            ..Self::closed(column, min, max)
        }
    }

    pub fn at_least(column: &str, min: f64) -> Self {
        Self {
            column: column.to_string(),
            min: Some(min),
            max: None,
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        let above = match self.min {
            None => true,
            Some(min) if self.min_inclusive => value >= min,
            Some(min) => value > min,
        };
        let below = match self.max {
            None => true,
            Some(max) if self.max_inclusive => value <= max,
            Some(max) => value < max,
        };
        above && below
    }

    fn validate(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(QualityError::InvalidConfig(format!(
                    "range for '{}' has min {min} above max {max}",
                    self.column
                )));
            }
        }
        Ok(())
    }
}

/// Drops rows outside physical ranges. Columns flagged do-not-use are blanked to missing
/// instead; that is the only place the pipeline substitutes values on its own.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RangeValidation {
    pub rules: Vec<RangeRule>,
    pub do_not_use: Vec<String>,
}

impl RangeValidation {
    pub fn validate(&self) -> Result<()> {
        self.rules.iter().try_for_each(RangeRule::validate)
    }

    pub fn apply(&self, df: &DataFrame) -> Result<DataFrame> {
        let mut out = df.clone();

        for name in &self.do_not_use {
            if let Ok(existing) = out.column(name) {
                let blank = Series::full_null(name.as_str().into(), out.height(), existing.dtype());
                out.with_column(blank)?;
                debug!(column = name.as_str(), "Blanked do-not-use column");
            }
        }

        let mut keep = vec![true; out.height()];
        for rule in &self.rules {
            if !has_column(&out, &rule.column) || self.do_not_use.contains(&rule.column) {
                continue;
            }
            let values = numeric_values(&out, &rule.column)?;
            for (flag, value) in keep.iter_mut().zip(values) {
                if let Some(value) = value {
                    if !rule.contains(value) {
                        *flag = false;
                    }
                }
            }
        }

        let dropped = keep.iter().filter(|flag| !**flag).count();
        if dropped == 0 {
            return Ok(out);
        }

        warn!(dropped, rows = out.height(), "Range validation dropped rows");
        let mask = BooleanChunked::from_slice("keep".into(), &keep);
        Ok(out.filter(&mask)?)
    }
}

/// What to do with rows that carry missing values after range validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum MissingValuePolicy {
    #[default]
    Keep,
    /// Drop rows missing a value in any listed column. Absent columns are ignored.
    DropRows { columns: Vec<String> },
    /// Drop rows missing a value in any numeric column.
    DropRowsAnyNumeric,
}

impl MissingValuePolicy {
    pub fn apply(&self, df: &DataFrame) -> Result<DataFrame> {
        let targets: Vec<&Column> = match self {
            MissingValuePolicy::Keep => return Ok(df.clone()),
            MissingValuePolicy::DropRows { columns } => columns
                .iter()
                .filter_map(|name| df.column(name).ok())
                .collect(),
            MissingValuePolicy::DropRowsAnyNumeric => df
                .get_columns()
                .iter()
                .filter(|column| is_numeric_dtype(column.dtype()))
                .collect(),
        };

        let mut keep = vec![true; df.height()];
        for target in targets {
            for (flag, is_null) in keep.iter_mut().zip(target.is_null().into_iter()) {
                if is_null.unwrap_or(false) {
                    *flag = false;
                }
            }
        }

        let dropped = keep.iter().filter(|flag| !**flag).count();
        if dropped == 0 {
            return Ok(df.clone());
        }

        debug!(dropped, "Dropped rows with missing values");
        let mask = BooleanChunked::from_slice("keep".into(), &keep);
        Ok(df.filter(&mask)?)
    }
}

/// Last tidy-up: rows without a resolved timestamp, ordering by time.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FinalizePolicy {
    pub drop_missing_timestamps: bool,
    pub sort_by_timestamp: bool,
}

impl FinalizePolicy {
    pub fn apply(&self, df: &DataFrame) -> Result<DataFrame> {
        if !has_column(df, TIMESTAMP_COLUMN) {
            return Ok(df.clone());
        }

        let mut out = if self.drop_missing_timestamps {
            MissingValuePolicy::DropRows {
                columns: vec![TIMESTAMP_COLUMN.to_string()],
            }
            .apply(df)?
        } else {
            df.clone()
        };

        if self.sort_by_timestamp {
            out = out.sort(
                [TIMESTAMP_COLUMN],
                SortMultipleOptions::default().with_maintain_order(true),
            )?;
        }

        Ok(out)
    }
}
