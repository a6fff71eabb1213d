// crates/envqc/src/input.rs

use std::fs;
use std::io::Cursor;
use std::path::Path;

use anyhow::{bail, Context, Result};
use envqc_core::{DatasetId, DetectorConfig, PreprocessingOrchestrator, PreprocessorRegistry};
use polars::prelude::*;
use tracing::info;

/// Everything the global flags configure.
pub struct Settings {
    pub registry: PreprocessorRegistry,
    pub detector: DetectorConfig,
    separator: u8,
}

impl Settings {
    pub fn load(
        profiles: Option<&Path>,
        detector_config: Option<&Path>,
        separator: char,
    ) -> Result<Self> {
        if !separator.is_ascii() {
            bail!("separator must be a single ASCII character, got '{separator}'");
        }

        let mut registry = PreprocessorRegistry::standard();
        if let Some(path) = profiles {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read profiles from {}", path.display()))?;
            let custom = PreprocessorRegistry::from_toml_str(&content)
                .with_context(|| format!("invalid profiles in {}", path.display()))?;
            info!(
                path = %path.display(),
                datasets = custom.dataset_ids().len(),
                "Loaded dataset profiles"
            );
            registry.extend(custom);
        }

        let detector = match detector_config {
            None => DetectorConfig::default(),
            Some(path) => {
                let content = fs::read_to_string(path).with_context(|| {
                    format!("failed to read detector config from {}", path.display())
                })?;
                DetectorConfig::from_toml_str(&content)
                    .with_context(|| format!("invalid detector config in {}", path.display()))?
            }
        };

        Ok(Self {
            registry,
            detector,
            separator: separator as u8,
        })
    }

    pub fn orchestrator(&self) -> PreprocessingOrchestrator {
        PreprocessingOrchestrator::new(self.registry.clone())
    }

    pub fn read_csv(&self, path: &Path) -> Result<DataFrame> {
        let content =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;

        let parse_options = CsvParseOptions::default().with_separator(self.separator);
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(1000))
            .with_parse_options(parse_options)
            .into_reader_with_file_handle(Cursor::new(content))
            .finish()
            .with_context(|| format!("failed to parse {} as CSV", path.display()))?;

        info!(
            path = %path.display(),
            rows = df.height(),
            columns = df.width(),
            "Read CSV"
        );
        Ok(df)
    }
}

pub fn parse_dataset(code: &str) -> Result<DatasetId> {
    code.parse::<DatasetId>()
        .with_context(|| format!("known datasets: {}", known_codes()))
}

fn known_codes() -> String {
    DatasetId::ALL
        .iter()
        .map(DatasetId::code)
        .collect::<Vec<_>>()
        .join(", ")
}
