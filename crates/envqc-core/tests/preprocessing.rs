use std::sync::{Arc, Mutex};

use envqc_core::columns::TIMESTAMP_COLUMN;
use envqc_core::preprocessing::UnitNormalization;
use envqc_core::{
    DatasetId, DatasetProfile, ErrorKind, PreprocessingOrchestrator, PreprocessorRegistry,
    QualityError, Stage, StageOverrides, StepChainPreprocessor,
};
use polars::prelude::*;

fn f64_values(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
    df.column(name).unwrap().f64().unwrap().into_iter().collect()
}

fn small_batch() -> DataFrame {
    df!(
        "timestamp" => &["2024-03-01 00:00:00", "2024-03-01 00:01:00"],
        "pm25" => &[4.0f64, 5.0f64],
    )
    .unwrap()
}

#[test]
fn stages_run_in_fixed_order() {
    let calls: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    // Registered in reverse to show the chain owns the order.
    let mut overrides = StageOverrides::new();
    for stage in Stage::ORDER.into_iter().rev() {
        let calls = Arc::clone(&calls);
        overrides.set(stage, move |df| {
            calls.lock().unwrap().push(stage.name());
            Ok(df.clone())
        });
    }

    let chain = StepChainPreprocessor::new(overrides);
    let out = chain.preprocess(&small_batch()).unwrap();

    assert_eq!(out.shape(), (2, 2));
    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            "select_columns",
            "resolve_timestamps",
            "normalize_units",
            "validate_ranges",
            "handle_missing",
            "finalize",
        ]
    );
}

#[test]
fn chain_without_overrides_is_identity() {
    let batch = small_batch();
    let out = StepChainPreprocessor::default().preprocess(&batch).unwrap();
    assert!(out.equals(&batch));
}

#[test]
fn stage_failure_is_wrapped_with_stage_name() {
    let chain = StepChainPreprocessor::new(StageOverrides::new().with(
        Stage::ValidateRanges,
        |_| Err(QualityError::InvalidConfig("boom".to_string())),
    ));

    let err = chain.preprocess(&small_batch()).unwrap_err();

    match &err {
        QualityError::Stage { stage, source } => {
            assert_eq!(*stage, Stage::ValidateRanges);
            assert!(matches!(**source, QualityError::InvalidConfig(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn stage_discarding_every_column_breaks_contract() {
    let chain = StepChainPreprocessor::new(
        StageOverrides::new().with(Stage::SelectColumns, |_| Ok(DataFrame::empty())),
    );

    let err = chain.preprocess(&small_batch()).unwrap_err();

    assert!(matches!(
        err,
        QualityError::Contract {
            stage: Stage::SelectColumns,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Contract);
}

#[test]
fn dropping_resolved_timestamp_breaks_contract() {
    let profile = DatasetProfile::synthetic();
    let overrides = profile
        .overrides()
        .with(Stage::HandleMissing, |df| Ok(df.drop(TIMESTAMP_COLUMN)?));

    let err = StepChainPreprocessor::new(overrides)
        .preprocess(&small_batch())
        .unwrap_err();

    assert!(matches!(
        err,
        QualityError::Contract {
            stage: Stage::HandleMissing,
            ..
        }
    ));
}

#[test]
fn lubw_drops_negative_and_incomplete_rows() {
    let raw = df!(
        "datetime" => &[
            "2024-01-01 00:02:00",
            "2024-01-01 00:00:00",
            "2024-01-01 00:01:00",
            "2024-01-01 00:03:00",
        ],
        "NO2" => &[Some(12.0f64), Some(-3.0), Some(15.0), None],
        "PM10" => &["20.5", "18.0", "21.0", "19.0"],
        "TEMP" => &[4.5f64, 4.0, 4.2, 4.1],
    )
    .unwrap();

    let orchestrator = PreprocessingOrchestrator::new(PreprocessorRegistry::standard());
    let out = orchestrator.preprocess(DatasetId::LubwMinute, &raw).unwrap();

    assert_eq!(out.height(), 2);
    assert!(matches!(
        out.column(TIMESTAMP_COLUMN).unwrap().dtype(),
        DataType::Datetime(_, _)
    ));
    assert_eq!(f64_values(&out, "NO2"), vec![Some(15.0), Some(12.0)]);
    assert_eq!(f64_values(&out, "pm10"), vec![Some(21.0), Some(20.5)]);
    assert!(out.column("TEMP").is_err());
    assert_eq!(f64_values(&out, "temperature"), vec![Some(4.2), Some(4.5)]);
}

#[test]
fn lubw_requires_a_timestamp_candidate() {
    let raw = df!("NO2" => &[1.0f64]).unwrap();

    let err = PreprocessingOrchestrator::new(PreprocessorRegistry::standard())
        .preprocess(DatasetId::LubwMinute, &raw)
        .unwrap_err();

    assert!(matches!(
        err,
        QualityError::Stage {
            stage: Stage::ResolveTimestamps,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

fn airup_batch() -> DataFrame {
    df!(
        "timestamp_gps" => &[None, Some("2024-06-01T10:01:00Z"), Some("2024-06-01T10:00:00Z")],
        "timestamp_hr" => &["2024-06-01 10:02:00", "garbled", "garbled"],
        "RAW_OPC_bin0" => &[1i64, 2, 3],
        "Laser_current" => &[0.1f64, 0.1, 0.1],
        "sht_temp" => &[21.0f64, 22.0, 23.0],
        "sht_humid" => &[40.0f64, 41.0, 42.0],
        "NO" => &[1.0f64, 2.0, 3.0],
        "NO2" => &[5.0f64, 6.0, 7.0],
        "O3" => &[30.0f64, 31.0, 32.0],
        "CO" => &[0.4f64, 0.5, 0.6],
    )
    .unwrap()
}

#[test]
fn airup_selects_renames_and_blanks() {
    let orchestrator = PreprocessingOrchestrator::new(PreprocessorRegistry::standard());
    let out = orchestrator
        .preprocess(DatasetId::AirupSontA, &airup_batch())
        .unwrap();

    assert_eq!(out.height(), 3);
    assert!(out.column("RAW_OPC_bin0").is_err());
    assert!(out.column("Laser_current").is_err());
    assert!(out.column("sht_temp").is_err());

    // Sorted by the coalesced timestamp: gps for the last two rows, hr for the first.
    assert_eq!(
        f64_values(&out, "temperature"),
        vec![Some(23.0), Some(22.0), Some(21.0)]
    );
    assert_eq!(
        f64_values(&out, "humidity"),
        vec![Some(42.0), Some(41.0), Some(40.0)]
    );
    assert_eq!(out.column("CO").unwrap().null_count(), 3);
}

#[test]
fn airup_drops_out_of_range_humidity() {
    let mut batch = airup_batch();
    batch
        .with_column(Series::new("sht_humid".into(), &[40.0f64, 120.0, 42.0]))
        .unwrap();

    let out = PreprocessingOrchestrator::new(PreprocessorRegistry::standard())
        .preprocess(DatasetId::AirupSontC, &batch)
        .unwrap();

    assert_eq!(f64_values(&out, "humidity"), vec![Some(42.0), Some(40.0)]);
}

const NOISE_PROFILE: &str = r#"
[datasets.noise_raw.resolve_timestamps]
candidates = ["time"]
required = true

[datasets.noise_raw.validate_ranges]
rules = [{ column = "level_db", min = 0.0, max = 140.0 }]

[datasets.noise_raw.handle_missing]
strategy = "drop_rows"
columns = ["level_db"]

[datasets.noise_raw.finalize]
sort_by_timestamp = true
"#;

#[test]
fn profiles_load_from_toml() {
    let mut registry = PreprocessorRegistry::standard();
    registry.extend(PreprocessorRegistry::from_toml_str(NOISE_PROFILE).unwrap());

    let raw = df!(
        "time" => &[1_700_000_120i64, 1_700_000_000, 1_700_000_060, 1_700_000_180],
        "level_db" => &[Some(55.0f64), Some(52.0), None, Some(180.0)],
    )
    .unwrap();

    let out = PreprocessingOrchestrator::new(registry)
        .preprocess(DatasetId::NoiseRaw, &raw)
        .unwrap();

    assert_eq!(f64_values(&out, "level_db"), vec![Some(52.0), Some(55.0)]);
    assert!(out.column(TIMESTAMP_COLUMN).is_ok());
}

#[test]
fn bad_profiles_are_rejected() {
    let unknown = PreprocessorRegistry::from_toml_str("[datasets.not_a_dataset]\n").unwrap_err();
    assert!(matches!(unknown, QualityError::UnknownDataset(_)));

    let bad_zone = PreprocessorRegistry::from_toml_str(
        "[datasets.weather_raw.resolve_timestamps]\ncandidates = [\"t\"]\ntimezone = \"Mars/Olympus\"\n",
    )
    .unwrap_err();
    assert!(matches!(bad_zone, QualityError::InvalidConfig(_)));

    let inverted = PreprocessorRegistry::from_toml_str(
        "[datasets.weather_raw.validate_ranges]\nrules = [{ column = \"t\", min = 5.0, max = 1.0 }]\n",
    )
    .unwrap_err();
    assert_eq!(inverted.kind(), ErrorKind::Validation);

    let typo = PreprocessorRegistry::from_toml_str(
        "[datasets.weather_raw.finalize]\nsort_by_timestmap = true\n",
    )
    .unwrap_err();
    assert!(matches!(typo, QualityError::Toml(_)));
}

#[test]
fn renames_onto_one_canonical_name_are_rejected() {
    let batch = df!(
        "PM2_5" => &[4.0f64],
        "pm2.5" => &[5.0f64],
    )
    .unwrap();
    let normalization = UnitNormalization {
        renames: [("PM2_5", "pm25"), ("pm2.5", "pm25")]
            .into_iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect(),
        ..UnitNormalization::default()
    };

    let err = normalization.apply(&batch).unwrap_err();

    assert!(matches!(
        &err,
        QualityError::DuplicateColumn { to, .. } if to == "pm25"
    ));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn unregistered_dataset_is_a_validation_error() {
    let orchestrator = PreprocessingOrchestrator::new(PreprocessorRegistry::new());

    let err = orchestrator
        .preprocess(DatasetId::WeatherRaw, &small_batch())
        .unwrap_err();

    assert!(matches!(err, QualityError::UnknownDataset(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn dataset_codes_round_trip() {
    for id in DatasetId::ALL {
        assert_eq!(id.code().parse::<DatasetId>().unwrap(), id);
    }
    assert!("airup".parse::<DatasetId>().is_err());
    assert_eq!(
        PreprocessorRegistry::standard().dataset_ids(),
        DatasetId::ALL.to_vec()
    );
}
