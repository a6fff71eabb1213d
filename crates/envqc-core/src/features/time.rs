use chrono::{DateTime, Datelike, Timelike, Utc};
use polars::prelude::*;

use crate::columns::{column, timestamp_millis, TIMESTAMP_COLUMN};
use crate::error::Result;
use crate::timestamp_resolver::TimestampResolver;

/// Meteorological season: 0 winter (Dec–Feb), 1 spring (Mar–May), 2 summer (Jun–Aug), 3 fall.
pub fn season_of_month(month: u32) -> i32 {
    match month {
        12 | 1 | 2 => 0,
        3..=5 => 1,
        6..=8 => 2,
        _ => 3,
    }
}

/// Adds calendar features derived from the resolved timestamp:
/// `hour`, `day_of_week` (0 = Monday), `month`, `year`, `is_weekend`, `season`.
///
/// A text timestamp column is resolved first and replaced by its datetime form. Rows with a
/// missing timestamp get missing features.
#[derive(Debug, Clone)]
pub struct TimeFeatureDeriver {
    timestamp_column: String,
}

impl Default for TimeFeatureDeriver {
    fn default() -> Self {
        Self {
            timestamp_column: TIMESTAMP_COLUMN.to_string(),
        }
    }
}

impl TimeFeatureDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timestamp_column(name: impl Into<String>) -> Self {
        Self {
            timestamp_column: name.into(),
        }
    }

    pub fn add_time_features(&self, df: &DataFrame) -> Result<DataFrame> {
        let resolved = TimestampResolver::new().resolve(column(df, &self.timestamp_column)?)?;
        let millis = timestamp_millis(&resolved)?;

        let len = millis.len();
        let mut hour = Vec::with_capacity(len);
        let mut day_of_week = Vec::with_capacity(len);
        let mut month = Vec::with_capacity(len);
        let mut year = Vec::with_capacity(len);
        let mut is_weekend = Vec::with_capacity(len);
        let mut season = Vec::with_capacity(len);

        for value in millis {
            let Some(dt) = value.and_then(DateTime::<Utc>::from_timestamp_millis) else {
                hour.push(None);
                day_of_week.push(None);
                month.push(None);
                year.push(None);
                is_weekend.push(None);
                season.push(None);
                continue;
            };

            let weekday = dt.weekday().num_days_from_monday() as i32;
            hour.push(Some(dt.hour() as i32));
            day_of_week.push(Some(weekday));
            month.push(Some(dt.month() as i32));
            year.push(Some(dt.year()));
            is_weekend.push(Some(weekday >= 5));
            season.push(Some(season_of_month(dt.month())));
        }

        let mut out = df.clone();
        out.with_column(resolved)?;
        for series in [
            Series::new("hour".into(), hour),
            Series::new("day_of_week".into(), day_of_week),
            Series::new("month".into(), month),
            Series::new("year".into(), year),
            Series::new("is_weekend".into(), is_weekend),
            Series::new("season".into(), season),
        ] {
            out.with_column(series)?;
        }

        Ok(out)
    }
}
