use polars::prelude::*;
use tracing::debug;

use crate::columns::{column, numeric_values, timestamp_millis, TIMESTAMP_COLUMN};
use crate::error::{QualityError, Result};
use crate::timestamp_resolver::TimestampResolver;

const MILLIS_PER_SECOND: i64 = 1_000;
const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;
const MILLIS_PER_WEEK: i64 = 7 * MILLIS_PER_DAY;

/// Parses a window such as `2h`, `30m` or `1h30m` into milliseconds.
/// Units: `ms`, `s`, `m`, `h`, `d`, `w`.
pub fn parse_window(window: &str) -> Result<i64> {
    let invalid = |reason: &str| QualityError::InvalidWindow {
        window: window.to_string(),
        reason: reason.to_string(),
    };

    let text = window.trim();
    if text.is_empty() {
        return Err(invalid("empty window"));
    }

    let mut total: i64 = 0;
    let mut rest = text;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return Err(invalid("expected a number"));
        }
        let amount: i64 = rest[..digits_end]
            .parse()
            .map_err(|_| invalid("number out of range"))?;
        rest = &rest[digits_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = match &rest[..unit_end] {
            "ms" => 1,
            "s" => MILLIS_PER_SECOND,
            "m" => MILLIS_PER_MINUTE,
            "h" => MILLIS_PER_HOUR,
            "d" => MILLIS_PER_DAY,
            "w" => MILLIS_PER_WEEK,
            "" => return Err(invalid("missing unit")),
            other => return Err(invalid(&format!("unknown unit '{other}'"))),
        };
        rest = &rest[unit_end..];

        total = amount
            .checked_mul(unit)
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| invalid("duration out of range"))?;
    }

    if total <= 0 {
        return Err(invalid("window must be positive"));
    }
    Ok(total)
}

/// Trailing time-window mean and standard deviation per (feature, window) pair.
///
/// The window of a row at time `t` covers every row with a timestamp in `(t - window, t]`, so
/// the first row's mean is its own value. Rows are ordered by timestamp internally and the
/// output keeps the input row order. Missing values are skipped; the standard deviation is the
/// sample deviation and is missing for single-observation windows.
///
/// Adds `<col>_roll_mean_<window>` and `<col>_roll_std_<window>` for every pair.
#[derive(Debug, Clone)]
pub struct RollingWindowFeaturizer {
    timestamp_column: String,
}

impl Default for RollingWindowFeaturizer {
    fn default() -> Self {
        Self {
            timestamp_column: TIMESTAMP_COLUMN.to_string(),
        }
    }
}

impl RollingWindowFeaturizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timestamp_column(name: impl Into<String>) -> Self {
        Self {
            timestamp_column: name.into(),
        }
    }

    pub fn add_rolling_features(
        &self,
        df: &DataFrame,
        feature_columns: &[&str],
        windows: &[&str],
    ) -> Result<DataFrame> {
        if df.height() == 0 {
            return Ok(df.clone());
        }

        let resolved = TimestampResolver::new().resolve(column(df, &self.timestamp_column)?)?;
        let timestamps = timestamp_millis(&resolved)?;

        let windows: Vec<(&str, i64)> = windows
            .iter()
            .map(|label| parse_window(label).map(|width| (*label, width)))
            .collect::<Result<_>>()?;

        let features: Vec<(&str, Vec<Option<f64>>)> = feature_columns
            .iter()
            .map(|name| numeric_values(df, name).map(|values| (*name, values)))
            .collect::<Result<_>>()?;

        let order = time_order(&timestamps);

        let mut out = df.clone();
        out.with_column(resolved)?;

        for (name, values) in &features {
            for (label, width) in &windows {
                let (means, stds) = trailing_window_stats(&timestamps, values, &order, *width);
                out.with_column(Series::new(
                    format!("{name}_roll_mean_{label}").into(),
                    means,
                ))?;
                out.with_column(Series::new(format!("{name}_roll_std_{label}").into(), stds))?;
            }
        }

        debug!(
            rows = df.height(),
            features = features.len(),
            windows = windows.len(),
            "Added rolling window features"
        );

        Ok(out)
    }
}

/// Row indices with a timestamp, stably sorted by time.
fn time_order(timestamps: &[Option<i64>]) -> Vec<(usize, i64)> {
    let mut order: Vec<(usize, i64)> = timestamps
        .iter()
        .enumerate()
        .filter_map(|(row, ts)| ts.map(|ts| (row, ts)))
        .collect();
    order.sort_by_key(|&(_, ts)| ts);
    order
}

/// Running sums over a sliding window. Values are shifted by the first observation to keep the
/// sum of squares well conditioned.
#[derive(Default)]
struct WindowAccumulator {
    shift: Option<f64>,
    count: usize,
    sum: f64,
    sum_sq: f64,
}

impl WindowAccumulator {
    fn push(&mut self, value: f64) {
        let shift = *self.shift.get_or_insert(value);
        let shifted = value - shift;
        self.count += 1;
        self.sum += shifted;
        self.sum_sq += shifted * shifted;
    }

    fn pop(&mut self, value: f64) {
        let shifted = value - self.shift.unwrap_or(value);
        self.count -= 1;
        self.sum -= shifted;
        self.sum_sq -= shifted * shifted;
    }

    fn mean(&self) -> Option<f64> {
        let shift = self.shift?;
        (self.count > 0).then(|| shift + self.sum / self.count as f64)
    }

    fn std(&self) -> Option<f64> {
        if self.count < 2 {
            return None;
        }
        let n = self.count as f64;
        let variance = (self.sum_sq - self.sum * self.sum / n) / (n - 1.0);
        Some(variance.max(0.0).sqrt())
    }
}

fn observation(values: &[Option<f64>], row: usize) -> Option<f64> {
    values[row].filter(|value| value.is_finite())
}

fn trailing_window_stats(
    timestamps: &[Option<i64>],
    values: &[Option<f64>],
    order: &[(usize, i64)],
    width: i64,
) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let mut means = vec![None; timestamps.len()];
    let mut stds = vec![None; timestamps.len()];
    let mut window = WindowAccumulator::default();
    let (mut start, mut end) = (0usize, 0usize);

    for &(row, ts) in order {
        while end < order.len() && order[end].1 <= ts {
            if let Some(value) = observation(values, order[end].0) {
                window.push(value);
            }
            end += 1;
        }
        while order[start].1 <= ts.saturating_sub(width) {
            if let Some(value) = observation(values, order[start].0) {
                window.pop(value);
            }
            start += 1;
        }

        means[row] = window.mean();
        stds[row] = window.std();
    }

    (means, stds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_and_compound_windows() {
        assert_eq!(parse_window("2h").unwrap(), 2 * MILLIS_PER_HOUR);
        assert_eq!(parse_window("30m").unwrap(), 30 * MILLIS_PER_MINUTE);
        assert_eq!(
            parse_window("1h30m").unwrap(),
            MILLIS_PER_HOUR + 30 * MILLIS_PER_MINUTE
        );
        assert_eq!(parse_window("250ms").unwrap(), 250);
        assert_eq!(parse_window("1w").unwrap(), MILLIS_PER_WEEK);
    }

    #[test]
    fn rejects_malformed_windows() {
        for window in ["", "h", "10", "5x", "0h", "-1h"] {
            assert!(parse_window(window).is_err(), "{window} should be rejected");
        }
    }

    #[test]
    fn window_accumulator_matches_direct_computation() {
        let mut acc = WindowAccumulator::default();
        for value in [1012.0, 1013.5, 1011.0] {
            acc.push(value);
        }
        acc.pop(1012.0);
        let mean = acc.mean().unwrap();
        let std = acc.std().unwrap();
        assert!((mean - 1012.25).abs() < 1e-9);
        assert!((std - (2.0f64 * 1.25f64.powi(2)).sqrt()).abs() < 1e-9);
    }
}
