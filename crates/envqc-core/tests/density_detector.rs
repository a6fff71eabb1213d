use envqc_core::columns::ANOMALY_SCORE_COLUMN;
use envqc_core::{
    AnomalyDetector, DensityAnomalyDetector, DensityParams, ErrorKind, QualityError,
};
use polars::prelude::*;

fn scores(df: &DataFrame) -> Vec<Option<f64>> {
    df.column(ANOMALY_SCORE_COLUMN)
        .unwrap()
        .f64()
        .unwrap()
        .into_iter()
        .collect()
}

/// A tight cluster of humidity/temperature pairs.
fn reference() -> DataFrame {
    let humidity: Vec<f64> = (0..300).map(|i| 50.0 + (i % 17) as f64 * 0.3).collect();
    let temperature: Vec<f64> = (0..300).map(|i| 18.0 + (i % 11) as f64 * 0.2).collect();
    df!("humidity" => humidity, "temperature" => temperature).unwrap()
}

fn fitted(params: DensityParams) -> DensityAnomalyDetector {
    let mut detector = DensityAnomalyDetector::new(params).unwrap();
    detector
        .fit(&reference(), &["humidity", "temperature"])
        .unwrap();
    detector
}

#[test]
fn outlier_gets_the_top_score() {
    let detector = fitted(DensityParams::default());

    let target = df!(
        "humidity" => &[51.2f64, 52.0, 98.0, 50.6],
        "temperature" => &[18.4f64, 19.0, -5.0, 18.8],
    )
    .unwrap();
    let scored = scores(&detector.score(&target).unwrap());

    assert_eq!(scored[2], Some(1.0));
    for score in scored.iter().flatten() {
        assert!((0.0..=1.0).contains(score));
    }
    assert!(scored.contains(&Some(0.0)));
}

#[test]
fn incomplete_rows_get_no_score() {
    let detector = fitted(DensityParams::default());

    let target = df!(
        "humidity" => &[Some(51.0f64), None, Some(90.0)],
        "temperature" => &[Some(18.5f64), Some(18.0), Some(30.0)],
    )
    .unwrap();
    let scored = scores(&detector.score(&target).unwrap());

    assert_eq!(scored[1], None);
    assert_eq!(scored[0], Some(0.0));
    assert_eq!(scored[2], Some(1.0));
}

#[test]
fn single_row_batch_scores_zero() {
    let detector = fitted(DensityParams::default());

    let target = df!("humidity" => &[99.0f64], "temperature" => &[40.0f64]).unwrap();

    assert_eq!(scores(&detector.score(&target).unwrap()), vec![Some(0.0)]);
}

#[test]
fn training_offset_splits_reference_by_contamination() {
    let detector = fitted(DensityParams {
        contamination: 0.1,
        ..DensityParams::default()
    });

    let offset = detector.training_offset().unwrap();
    let raw = detector.raw_scores(&reference()).unwrap();
    let below = raw.iter().flatten().filter(|score| **score < offset).count();

    assert!(offset < 0.0 && offset > -1.0);
    assert!((below as f64 / raw.len() as f64 - 0.1).abs() < 0.02);
}

#[test]
fn same_seed_gives_same_scores() {
    let target = df!(
        "humidity" => &[51.0f64, 60.0, 75.0],
        "temperature" => &[18.5f64, 21.0, 25.0],
    )
    .unwrap();

    let a = scores(&fitted(DensityParams::default()).score(&target).unwrap());
    let b = scores(&fitted(DensityParams::default()).score(&target).unwrap());
    assert_eq!(a, b);
}

#[test]
fn rows_with_missing_features_are_left_out_of_training() {
    let mut detector = DensityAnomalyDetector::new(DensityParams::default()).unwrap();
    let reference = df!(
        "humidity" => &[None, Some(50.0f64), Some(51.0)],
        "temperature" => &[Some(18.0f64), None, Some(18.2)],
    )
    .unwrap();

    detector
        .fit(&reference, &["humidity", "temperature"])
        .unwrap();
    assert!(detector.is_fitted());

    let only_gaps = df!(
        "humidity" => &[None, Some(50.0f64)],
        "temperature" => &[Some(18.0f64), None],
    )
    .unwrap();
    let mut fresh = DensityAnomalyDetector::default();
    let err = fresh
        .fit(&only_gaps, &["humidity", "temperature"])
        .unwrap_err();
    assert!(matches!(err, QualityError::NoCompleteRows { .. }));
    assert!(!fresh.is_fitted());
}

#[test]
fn params_are_validated() {
    for contamination in [0.0, -0.1, 0.51, f64::NAN] {
        let err = DensityAnomalyDetector::new(DensityParams {
            contamination,
            ..DensityParams::default()
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    assert!(DensityAnomalyDetector::new(DensityParams {
        contamination: 0.5,
        ..DensityParams::default()
    })
    .is_ok());
    assert!(DensityAnomalyDetector::new(DensityParams {
        n_estimators: 0,
        ..DensityParams::default()
    })
    .is_err());
}

#[test]
fn raw_scores_need_a_fit() {
    let err = DensityAnomalyDetector::default()
        .raw_scores(&reference())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(matches!(
        err,
        QualityError::NotFitted {
            detector: "DensityAnomalyDetector",
            operation: "raw_scores",
        }
    ));
}

#[test]
fn extreme_finite_values_fit_and_score() {
    let reference = df!("x" => &[-1e308f64, 0.0, 1e308, 5.0]).unwrap();
    let mut detector = DensityAnomalyDetector::default();

    detector.fit(&reference, &["x"]).unwrap();

    let scored = scores(&detector.score(&reference).unwrap());
    assert_eq!(scored.len(), 4);
    for score in &scored {
        assert!(score.is_some_and(|s| (0.0..=1.0).contains(&s)));
    }
}
