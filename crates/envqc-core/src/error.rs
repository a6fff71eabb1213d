// crates/envqc-core/src/error.rs

use polars::prelude::{DataType, PolarsError};
use thiserror::Error;

use crate::preprocessing::Stage;

/// Coarse classification callers branch on; every [`QualityError`] maps to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Empty or missing input, missing required column, wrong column type, bad configuration.
    Validation,
    /// The operation needs a prior `fit` that never happened.
    State,
    /// A stage handed back a batch that breaks the chain's structural contract.
    Contract,
    /// Failure inside polars itself.
    Internal,
}

#[derive(Error, Debug)]
pub enum QualityError {
    #[error("{context}: batch is empty")]
    EmptyBatch { context: &'static str },

    #[error("column '{column}' not found")]
    MissingColumn { column: String },

    #[error("column '{column}' must be numeric, found {dtype}")]
    NonNumericColumn { column: String, dtype: DataType },

    #[error("column '{column}' has dtype {dtype}, which cannot hold timestamps")]
    UnsupportedTimestampType { column: String, dtype: DataType },

    #[error("column '{column}' has no non-missing values")]
    NoObservations { column: String },

    #[error("no row has a value for every feature column ({columns})")]
    NoCompleteRows { columns: String },

    #[error("renaming '{from}' to '{to}' would duplicate an existing column")]
    DuplicateColumn { from: String, to: String },

    #[error("invalid rolling window '{window}': {reason}")]
    InvalidWindow { window: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no preprocessor registered for dataset '{0}'")]
    UnknownDataset(String),

    #[error("{detector} must be fitted before calling '{operation}'")]
    NotFitted {
        detector: &'static str,
        operation: &'static str,
    },

    #[error("stage '{stage}' broke the batch contract: {message}")]
    Contract { stage: Stage, message: String },

    #[error("preprocessing stage '{stage}' failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<QualityError>,
    },

    #[error("failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

impl QualityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QualityError::EmptyBatch { .. }
            | QualityError::MissingColumn { .. }
            | QualityError::NonNumericColumn { .. }
            | QualityError::UnsupportedTimestampType { .. }
            | QualityError::NoObservations { .. }
            | QualityError::NoCompleteRows { .. }
            | QualityError::DuplicateColumn { .. }
            | QualityError::InvalidWindow { .. }
            | QualityError::InvalidConfig(_)
            | QualityError::UnknownDataset(_)
            | QualityError::Toml(_) => ErrorKind::Validation,
            QualityError::NotFitted { .. } => ErrorKind::State,
            QualityError::Contract { .. } => ErrorKind::Contract,
            QualityError::Stage { source, .. } => source.kind(),
            QualityError::Polars(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn missing_column(column: impl Into<String>) -> Self {
        QualityError::MissingColumn {
            column: column.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, QualityError>;
