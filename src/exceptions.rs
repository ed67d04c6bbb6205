//! ## Custom Errors for Housing Prep
//!
//! This module defines the error type shared by every stage of the data preparation pipeline.
//! It uses the `thiserror` crate to derive the `Error` trait. Each variant belongs to one
//! category of the error taxonomy (see [`ErrorKind`]) so callers can react to the kind of
//! failure without matching on every variant:
//!
//! - **Schema**: a required column is missing.
//! - **State**: transform before fit, refit, unsupported policy or model name, incompatible artifact.
//! - **Io**: unreadable or unwritable paths, unsupported file formats.
//! - **Validation**: malformed configuration or parameters.
//! - **Engine**: failures raised by DataFusion, Arrow, Parquet or the model fitting backend.
//!
//! The `HousingPrepResult` type alias is used for all fallible operations in the crate.
//!
//! ### Example
//!
//! ```rust
//! use housing_prep::exceptions::{ErrorKind, HousingPrepError, HousingPrepResult};
//!
//! fn check() -> HousingPrepResult<()> {
//!     Err(HousingPrepError::MissingColumns(vec!["price".into()]))
//! }
//!
//! assert_eq!(check().unwrap_err().kind(), ErrorKind::Schema);
//! ```

use std::fmt;
use thiserror::Error;

/// The pipeline steps an orchestrator reports when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Load,
    Validate,
    Impute,
    Outliers,
    DeriveFeatures,
    Transform,
    Split,
    Fit,
    Evaluate,
    Save,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStep::Load => "load",
            PipelineStep::Validate => "validate",
            PipelineStep::Impute => "impute",
            PipelineStep::Outliers => "outliers",
            PipelineStep::DeriveFeatures => "derive_features",
            PipelineStep::Transform => "transform",
            PipelineStep::Split => "split",
            PipelineStep::Fit => "fit",
            PipelineStep::Evaluate => "evaluate",
            PipelineStep::Save => "save",
        };
        f.write_str(name)
    }
}

/// Coarse classification of [`HousingPrepError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Schema,
    State,
    Io,
    Validation,
    Engine,
}

/// Errors specific to the Housing Prep library.
#[derive(Debug, Error)]
pub enum HousingPrepError {
    /// Wraps underlying I/O errors.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Wraps errors from DataFusion.
    #[error("DataFusion error: {0}")]
    DataFusionError(#[from] datafusion::error::DataFusionError),

    /// Wraps errors from Arrow.
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Wraps errors from Parquet.
    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    /// A JSON artifact could not be serialized or parsed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A YAML configuration file could not be parsed.
    #[error("Config error: {0}")]
    ConfigError(#[from] serde_yaml::Error),

    /// An invalid parameter was provided (e.g. a non-positive IQR multiplier).
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The file extension does not name a supported tabular format.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// One or more required columns do not exist in the dataset.
    #[error("Missing required columns: {0:?}")]
    MissingColumns(Vec<String>),

    /// The transform method was called before fit on a stateful transformer.
    #[error("Transform called before fit for stateful transformer")]
    FitNotCalled,

    /// Fit was called on a transformer whose state is already frozen.
    #[error("Transformer is already fitted; build a new one to refit")]
    AlreadyFitted,

    /// The outlier policy name is not one of filter, clip or none.
    #[error("Unsupported outlier policy: {0}")]
    UnsupportedPolicy(String),

    /// The estimator name is not one of the supported kinds.
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    /// A persisted artifact was written with a different encoding scheme.
    #[error("Incompatible artifact: expected {expected} version {expected_version}, found {found} version {found_version}")]
    IncompatibleArtifact {
        expected: String,
        expected_version: u32,
        found: String,
        found_version: u32,
    },

    /// The estimator backend failed to fit or predict.
    #[error("Model error: {0}")]
    ModelError(String),

    /// An orchestrator step failed; `source` holds the original error.
    #[error("Step '{step}' failed: {source}")]
    StepFailed {
        step: PipelineStep,
        #[source]
        source: Box<HousingPrepError>,
    },
}

impl HousingPrepError {
    /// Wraps this error with the pipeline step that produced it.
    pub fn at_step(self, step: PipelineStep) -> Self {
        HousingPrepError::StepFailed {
            step,
            source: Box::new(self),
        }
    }

    /// The taxonomy category of this error. A step failure reports the kind of its source.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HousingPrepError::MissingColumns(_) => ErrorKind::Schema,
            HousingPrepError::FitNotCalled
            | HousingPrepError::AlreadyFitted
            | HousingPrepError::UnsupportedPolicy(_)
            | HousingPrepError::UnsupportedModel(_)
            | HousingPrepError::IncompatibleArtifact { .. } => ErrorKind::State,
            HousingPrepError::IoError(_) | HousingPrepError::UnsupportedFormat(_) => ErrorKind::Io,
            HousingPrepError::InvalidParameter(_)
            | HousingPrepError::ConfigError(_)
            | HousingPrepError::SerializationError(_) => ErrorKind::Validation,
            HousingPrepError::DataFusionError(_)
            | HousingPrepError::ArrowError(_)
            | HousingPrepError::ParquetError(_)
            | HousingPrepError::ModelError(_) => ErrorKind::Engine,
            HousingPrepError::StepFailed { source, .. } => source.kind(),
        }
    }

    /// The step that failed, if this error came out of an orchestrator.
    pub fn failed_step(&self) -> Option<PipelineStep> {
        match self {
            HousingPrepError::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// A convenient result type for Housing Prep operations.
pub type HousingPrepResult<T> = std::result::Result<T, HousingPrepError>;
