//! ## Errors for the preprocessing engine
//!
//! This module defines the error type of the crate, derived with `thiserror`.
//! Only genuinely fatal conditions are errors: calling a transform before its fit,
//! an unsupported configuration, or a failure in DataFusion/Arrow itself.
//! Schema drift, unseen categories and degenerate columns are not errors; they are
//! reported as [`PreprocessingWarning`](crate::diagnostics::PreprocessingWarning)s.
//!
//! ### Example
//!
//! ```rust
//! use insider_preprocessing::exceptions::{PreprocessingError, PreprocessingResult};
//!
//! fn pick_method(name: &str) -> PreprocessingResult<()> {
//!     Err(PreprocessingError::ConfigurationError(format!("unknown method '{}'", name)))
//! }
//! ```

use thiserror::Error;

/// Errors raised by the preprocessing engine.
#[derive(Debug, Error)]
pub enum PreprocessingError {
    /// Wraps underlying I/O errors (loading or saving fitted state).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Wraps errors from DataFusion.
    #[error("DataFusion error: {0}")]
    DataFusionError(#[from] datafusion::error::DataFusionError),

    /// Wraps errors from Arrow.
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Wraps errors from serializing or deserializing fitted state.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// An argument is outside its valid range (negative threshold, empty frame, ...).
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// An unsupported method name or an inconsistent set of settings.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A column that is strictly required is absent.
    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// A transform was called before the matching fit.
    #[error("Transform called before fit for '{0}'")]
    FitNotCalled(String),

    /// A pipeline stage failed; carries the stage name and the underlying error.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: Box<PreprocessingError>,
    },
}

impl PreprocessingError {
    /// Wraps an error with the name of the pipeline stage that raised it.
    pub fn in_stage(self, stage: &str) -> Self {
        match self {
            already @ PreprocessingError::StageFailed { .. } => already,
            other => PreprocessingError::StageFailed {
                stage: stage.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Returns true if this error (or the error it wraps) is a `FitNotCalled`.
    pub fn is_not_fitted(&self) -> bool {
        match self {
            PreprocessingError::FitNotCalled(_) => true,
            PreprocessingError::StageFailed { source, .. } => source.is_not_fitted(),
            _ => false,
        }
    }
}

/// A convenient result type for preprocessing operations.
pub type PreprocessingResult<T> = std::result::Result<T, PreprocessingError>;
