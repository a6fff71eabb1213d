pub mod anomalies;
pub mod columns;
pub mod error;
pub mod features;
pub mod preprocessing;
pub mod timestamp_resolver;

pub use anomalies::{
    AnomalyDetector, AnomalyOrchestrator, DensityAnomalyDetector, DensityParams, DetectorConfig,
    ZScoreDetector,
};
pub use error::{ErrorKind, QualityError, Result};
pub use features::{RollingWindowFeaturizer, TimeFeatureDeriver};
pub use preprocessing::{
    DatasetId, DatasetProfile, PreprocessingOrchestrator, PreprocessorRegistry, Stage,
    StageOverrides, StepChainPreprocessor,
};
pub use timestamp_resolver::TimestampResolver;
