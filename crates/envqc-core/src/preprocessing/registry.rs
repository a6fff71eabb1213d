use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use polars::prelude::DataFrame;
use serde::Deserialize;
use tracing::info;

use super::policies::{
    ColumnSelection, FinalizePolicy, MissingValuePolicy, RangeRule, RangeValidation,
    TimestampPolicy, UnitNormalization,
};
use super::{Stage, StageOverrides, StepChainPreprocessor};
use crate::columns::TIMESTAMP_COLUMN;
use crate::error::{QualityError, Result};

/// Logical dataset identifiers known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DatasetId {
    AirQualityReference,
    AirQualityRaw,
    AirQualityCalibrated,
    NoiseRaw,
    NoiseCalibrated,
    WeatherRaw,
    WeatherCalibrated,
    LubwMinute,
    AirupSontA,
    AirupSontC,
}

impl DatasetId {
    pub const ALL: [DatasetId; 10] = [
        DatasetId::AirQualityReference,
        DatasetId::AirQualityRaw,
        DatasetId::AirQualityCalibrated,
        DatasetId::NoiseRaw,
        DatasetId::NoiseCalibrated,
        DatasetId::WeatherRaw,
        DatasetId::WeatherCalibrated,
        DatasetId::LubwMinute,
        DatasetId::AirupSontA,
        DatasetId::AirupSontC,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            DatasetId::AirQualityReference => "air_quality_reference",
            DatasetId::AirQualityRaw => "air_quality_raw",
            DatasetId::AirQualityCalibrated => "air_quality_calibrated",
            DatasetId::NoiseRaw => "noise_raw",
            DatasetId::NoiseCalibrated => "noise_calibrated",
            DatasetId::WeatherRaw => "weather_raw",
            DatasetId::WeatherCalibrated => "weather_calibrated",
            DatasetId::LubwMinute => "lubw_minute_data",
            DatasetId::AirupSontA => "airup_sont_a_minute",
            DatasetId::AirupSontC => "airup_sont_c_minute",
        }
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for DatasetId {
    type Err = QualityError;

    fn from_str(s: &str) -> Result<Self> {
        DatasetId::ALL
            .into_iter()
            .find(|id| id.code() == s)
            .ok_or_else(|| QualityError::UnknownDataset(s.to_string()))
    }
}

/// Declarative stage policies for one dataset. Every `None` stage runs as identity.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetProfile {
    pub select_columns: Option<ColumnSelection>,
    pub resolve_timestamps: Option<TimestampPolicy>,
    pub normalize_units: Option<UnitNormalization>,
    pub validate_ranges: Option<RangeValidation>,
    pub handle_missing: Option<MissingValuePolicy>,
    pub finalize: Option<FinalizePolicy>,
}

impl DatasetProfile {
    /// Checks everything that can be checked without data: time zone names and range bounds.
    pub fn validate(&self) -> Result<()> {
        if let Some(policy) = &self.resolve_timestamps {
            policy.resolver()?;
        }
        if let Some(policy) = &self.validate_ranges {
            policy.validate()?;
        }
        Ok(())
    }

    pub fn overrides(&self) -> StageOverrides {
        let mut overrides = StageOverrides::new();

        if let Some(policy) = self.select_columns.clone() {
            overrides.set(Stage::SelectColumns, move |df| policy.apply(df));
        }
        if let Some(policy) = self.resolve_timestamps.clone() {
            overrides.set(Stage::ResolveTimestamps, move |df| policy.apply(df));
        }
        if let Some(policy) = self.normalize_units.clone() {
            overrides.set(Stage::NormalizeUnits, move |df| policy.apply(df));
        }
        if let Some(policy) = self.validate_ranges.clone() {
            overrides.set(Stage::ValidateRanges, move |df| policy.apply(df));
        }
        if let Some(policy) = self.handle_missing.clone() {
            overrides.set(Stage::HandleMissing, move |df| policy.apply(df));
        }
        if let Some(policy) = self.finalize.clone() {
            overrides.set(Stage::Finalize, move |df| policy.apply(df));
        }

        overrides
    }

    pub fn preprocessor(&self) -> Result<StepChainPreprocessor> {
        self.validate()?;
        Ok(StepChainPreprocessor::new(self.overrides()))
    }

    /// Synthetic Heilbronn exports: ISO text or epoch timestamps, otherwise already clean.
    pub fn synthetic() -> Self {
        Self {
            resolve_timestamps: Some(TimestampPolicy {
                candidates: vec![TIMESTAMP_COLUMN.to_string()],
                ..TimestampPolicy::default()
            }),
            ..Self::default()
        }
    }

    /// LUBW reference station minute data. German field abbreviations are mapped to the names
    /// the low-cost sensor datasets use so both can be compared column by column.
    pub fn lubw_minute() -> Self {
        let renames = [
            ("PM10", "pm10"),
            ("PM2p5", "pm25"),
            ("TEMP", "temperature"),
            ("RLF", "humidity"),
            ("p-Luft", "pressure"),
            ("NSCH", "precipitation"),
            ("WIR", "wind_direction"),
            ("WIV", "wind_speed"),
        ]
        .into_iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();

        Self {
            select_columns: None,
            resolve_timestamps: Some(TimestampPolicy {
                candidates: vec![
                    TIMESTAMP_COLUMN.to_string(),
                    "datetime".to_string(),
                    "Hour".to_string(),
                ],
                required: true,
                timezone: None,
            }),
            normalize_units: Some(UnitNormalization {
                renames,
                coerce_numeric: true,
                coerce_exclude: vec![
                    "datetime".to_string(),
                    "Hour".to_string(),
                    "flag".to_string(),
                ],
            }),
            validate_ranges: Some(RangeValidation {
                rules: vec![
                    RangeRule::at_least("NO2", 0.0),
                    RangeRule::at_least("O3", 0.0),
                    RangeRule::at_least("pm10", 0.0),
                    RangeRule::at_least("pm25", 0.0),
                    RangeRule::open("temperature", -50.0, 80.0),
                    RangeRule::closed("humidity", 0.0, 100.0),
                    RangeRule {
                        min_inclusive: false,
                        ..RangeRule::at_least("pressure", 0.0)
                    },
                    RangeRule::at_least("precipitation", 0.0),
                    RangeRule::closed("wind_direction", 0.0, 360.0),
                    RangeRule::at_least("wind_speed", 0.0),
                ],
                do_not_use: Vec::new(),
            }),
            handle_missing: Some(MissingValuePolicy::DropRowsAnyNumeric),
            finalize: Some(FinalizePolicy {
                drop_missing_timestamps: true,
                sort_by_timestamp: true,
            }),
        }
    }

    /// AirUp low-cost sensor logs. Raw optical/ADC channels and hardware diagnostics are
    /// dropped; the uncalibrated CO cell is blanked.
    pub fn airup() -> Self {
        let renames = [("sht_humid", "humidity"), ("sht_temp", "temperature")]
            .into_iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();

        Self {
            select_columns: Some(ColumnSelection {
                keep: Vec::new(),
                drop_prefixes: ["RAW_OPC", "RAW_ADC", "Laser", "Heater", "Fan"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                required: Vec::new(),
            }),
            resolve_timestamps: Some(TimestampPolicy {
                candidates: vec![
                    "timestamp_gps".to_string(),
                    "timestamp_hr".to_string(),
                    TIMESTAMP_COLUMN.to_string(),
                ],
                required: true,
                timezone: None,
            }),
            normalize_units: Some(UnitNormalization {
                renames,
                coerce_numeric: false,
                coerce_exclude: Vec::new(),
            }),
            validate_ranges: Some(RangeValidation {
                rules: vec![
                    RangeRule::at_least("NO", 0.0),
                    RangeRule::at_least("NO2", 0.0),
                    RangeRule::at_least("O3", 0.0),
                    RangeRule::open("temperature", -50.0, 80.0),
                    RangeRule::closed("humidity", 0.0, 100.0),
                ],
                do_not_use: vec!["CO".to_string()],
            }),
            handle_missing: None,
            finalize: Some(FinalizePolicy {
                drop_missing_timestamps: true,
                sort_by_timestamp: true,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileFile {
    #[serde(default)]
    datasets: BTreeMap<String, DatasetProfile>,
}

/// Explicit dataset → preprocessing chain table. Built by the caller and handed to a
/// [`PreprocessingOrchestrator`]; there is no global instance.
#[derive(Debug, Clone, Default)]
pub struct PreprocessorRegistry {
    chains: HashMap<DatasetId, StepChainPreprocessor>,
}

impl PreprocessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in profiles for every known dataset.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for id in DatasetId::ALL {
            let profile = match id {
                DatasetId::LubwMinute => DatasetProfile::lubw_minute(),
                DatasetId::AirupSontA | DatasetId::AirupSontC => DatasetProfile::airup(),
                _ => DatasetProfile::synthetic(),
            };
            registry
                .chains
                .insert(id, StepChainPreprocessor::new(profile.overrides()));
        }
        registry
    }

    /// Reads profiles from TOML of the form
    ///
    /// ```toml
    /// [datasets.airup_sont_a_minute.resolve_timestamps]
    /// candidates = ["timestamp_hr"]
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ProfileFile = toml::from_str(content)?;
        let mut registry = Self::new();
        for (code, profile) in file.datasets {
            let id = code.parse::<DatasetId>()?;
            registry.register_profile(id, &profile)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, id: DatasetId, chain: StepChainPreprocessor) {
        self.chains.insert(id, chain);
    }

    pub fn register_profile(&mut self, id: DatasetId, profile: &DatasetProfile) -> Result<()> {
        let chain = profile.preprocessor()?;
        self.register(id, chain);
        Ok(())
    }

    /// Entries of `other` replace entries with the same id.
    pub fn extend(&mut self, other: PreprocessorRegistry) {
        self.chains.extend(other.chains);
    }

    pub fn get(&self, id: DatasetId) -> Option<&StepChainPreprocessor> {
        self.chains.get(&id)
    }

    pub fn dataset_ids(&self) -> Vec<DatasetId> {
        let mut ids: Vec<DatasetId> = self.chains.keys().copied().collect();
        ids.sort();
        ids
    }
}

/// Routes a batch to the chain registered for its dataset.
#[derive(Debug, Clone)]
pub struct PreprocessingOrchestrator {
    registry: PreprocessorRegistry,
}

impl PreprocessingOrchestrator {
    pub fn new(registry: PreprocessorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PreprocessorRegistry {
        &self.registry
    }

    pub fn preprocess(&self, dataset_id: DatasetId, batch: &DataFrame) -> Result<DataFrame> {
        let chain = self
            .registry
            .get(dataset_id)
            .ok_or_else(|| QualityError::UnknownDataset(dataset_id.code().to_string()))?;

        info!(
            dataset = dataset_id.code(),
            rows = batch.height(),
            columns = batch.width(),
            "Preprocessing dataset"
        );

        let output = chain.preprocess(batch)?;

        info!(
            dataset = dataset_id.code(),
            rows = output.height(),
            columns = output.width(),
            "Preprocessing complete"
        );

        Ok(output)
    }
}
