use chrono::offset::LocalResult;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone as _, Utc};
use chrono_tz::Tz;
use polars::prelude::*;
use tracing::debug;

use crate::columns::{is_numeric_dtype, TIMESTAMP_DTYPE};
use crate::error::{QualityError, Result};

/// Epoch magnitudes at or above this value are read as milliseconds, anything smaller as
/// seconds. 1e11 seconds lies in the year 5138 while 1e11 milliseconds is March 1973, so the
/// two readings only collide for data neither encoding produces in practice.
pub const EPOCH_MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

const MILLIS_PER_SECOND: f64 = 1_000.0;

const NAIVE_DATETIME_FORMATS: [&str; 7] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d.%m.%Y"];
/// `20240115`. Only tried on exactly eight digits so epoch text never reads as a date.
const COMPACT_DATE_FORMAT: &str = "%Y%m%d";

/// Turns a raw timestamp column (human-readable text, epoch seconds, or epoch milliseconds)
/// into a `Datetime(ms)` column. Resolution is per value and best effort: anything that
/// matches neither reading becomes missing.
///
/// Text that parses as a date wins outright over a numeric reading of the same text, because
/// source files mix encodings per file rather than per row.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampResolver {
    source_timezone: Option<Tz>,
}

impl TimestampResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Naive text timestamps are read as wall-clock time in `tz` and converted to UTC.
    /// Epoch numbers are always UTC.
    pub fn with_source_timezone(tz: Tz) -> Self {
        Self {
            source_timezone: Some(tz),
        }
    }

    pub fn source_timezone(&self) -> Option<Tz> {
        self.source_timezone
    }

    /// Resolves a whole column. The output keeps the input's name and row count.
    pub fn resolve(&self, raw: &Column) -> Result<Series> {
        let name = raw.name().clone();

        let millis: Vec<Option<i64>> = match raw.dtype() {
            DataType::Datetime(_, _) | DataType::Date => {
                let resolved = raw.cast(&TIMESTAMP_DTYPE)?;
                return Ok(resolved.as_materialized_series().clone().with_name(name));
            }
            DataType::String => raw
                .str()?
                .into_iter()
                .map(|value| value.and_then(|text| self.resolve_text(text)))
                .collect(),
            dtype if is_numeric_dtype(dtype) => raw
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .map(|value| value.and_then(epoch_to_millis))
                .collect(),
            other => {
                return Err(QualityError::UnsupportedTimestampType {
                    column: name.to_string(),
                    dtype: other.clone(),
                })
            }
        };

        let unresolved = millis.iter().filter(|value| value.is_none()).count();
        debug!(
            column = name.as_str(),
            rows = millis.len(),
            unresolved,
            "Resolved timestamp column"
        );

        Ok(Series::new(name, millis).cast(&TIMESTAMP_DTYPE)?)
    }

    /// Resolves one text value to epoch milliseconds.
    pub fn resolve_text(&self, raw: &str) -> Option<i64> {
        let text = raw.trim();
        if text.is_empty() {
            return None;
        }

        if let Some(millis) = self.parse_datetime_text(text) {
            return Some(millis);
        }

        text.parse::<f64>().ok().and_then(epoch_to_millis)
    }

    fn parse_datetime_text(&self, text: &str) -> Option<i64> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.timestamp_millis());
        }

        let naive = NAIVE_DATETIME_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
            .or_else(|| {
                DATE_FORMATS
                    .iter()
                    .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                    .or_else(|| parse_compact_date(text))
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })?;

        self.localize(naive)
    }

    fn localize(&self, naive: NaiveDateTime) -> Option<i64> {
        let Some(tz) = self.source_timezone else {
            return Some(naive.and_utc().timestamp_millis());
        };

        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Some(dt.timestamp_millis()),
            // Repeated wall-clock hour: take the earlier instant (the larger UTC offset).
            LocalResult::Ambiguous(a, b) => Some(a.timestamp_millis().min(b.timestamp_millis())),
            LocalResult::None => None,
        }
    }
}

fn parse_compact_date(text: &str) -> Option<NaiveDate> {
    if text.len() != 8 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(text, COMPACT_DATE_FORMAT).ok()
}

/// Interprets a numeric epoch count, picking the unit by magnitude. Fractional seconds keep
/// millisecond precision.
pub fn epoch_to_millis(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }

    let millis = if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        value
    } else {
        value * MILLIS_PER_SECOND
    }
    .round();

    if millis < i64::MIN as f64 || millis > i64::MAX as f64 {
        return None;
    }

    DateTime::<Utc>::from_timestamp_millis(millis as i64).map(|dt| dt.timestamp_millis())
}

/// Shorthand for [`TimestampResolver::resolve`] without a source time zone.
pub fn resolve(raw: &Column) -> Result<Series> {
    TimestampResolver::default().resolve(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_boundary_switches_units() {
        let below = EPOCH_MILLIS_THRESHOLD - 1.0;
        assert_eq!(epoch_to_millis(below), Some(99_999_999_999_000));
        assert_eq!(
            epoch_to_millis(EPOCH_MILLIS_THRESHOLD),
            Some(100_000_000_000)
        );
    }

    #[test]
    fn non_finite_numbers_are_missing() {
        assert_eq!(epoch_to_millis(f64::NAN), None);
        assert_eq!(epoch_to_millis(f64::INFINITY), None);
    }

    #[test]
    fn compact_dates_need_exactly_eight_digits() {
        assert_eq!(
            parse_compact_date("20240115"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(parse_compact_date("20241315"), None);
        assert_eq!(parse_compact_date("1700000000"), None);
        assert_eq!(parse_compact_date("2024-1-15"), None);
    }

    #[test]
    fn blank_text_is_missing() {
        let resolver = TimestampResolver::new();
        assert_eq!(resolver.resolve_text("   "), None);
        assert_eq!(resolver.resolve_text("not a time"), None);
    }
}

