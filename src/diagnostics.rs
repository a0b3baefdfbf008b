//! ## Non-fatal diagnostics
//!
//! Conditions that must never abort a transform are reported as [`PreprocessingWarning`]s.
//! Components return them from their `plan` methods; the plain `transform` entry points
//! log them through `tracing::warn!` and move on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A recoverable condition met while fitting or transforming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreprocessingWarning {
    /// A column known at fit time is absent (or unusable) at transform time.
    SchemaDrift {
        stage: String,
        column: String,
        detail: String,
    },
    /// Values of a categorical column that were never observed during fit.
    UnseenCategory {
        column: String,
        categories: Vec<String>,
        rows: u64,
    },
    /// A column cannot support a derived feature (zero variance, all missing, too few values).
    DegenerateColumn {
        stage: String,
        column: String,
        reason: String,
    },
}

impl PreprocessingWarning {
    pub fn schema_drift(stage: &str, column: &str, detail: impl Into<String>) -> Self {
        PreprocessingWarning::SchemaDrift {
            stage: stage.to_string(),
            column: column.to_string(),
            detail: detail.into(),
        }
    }

    pub fn degenerate(stage: &str, column: &str, reason: impl Into<String>) -> Self {
        PreprocessingWarning::DegenerateColumn {
            stage: stage.to_string(),
            column: column.to_string(),
            reason: reason.into(),
        }
    }

    /// Column the warning refers to.
    pub fn column(&self) -> &str {
        match self {
            PreprocessingWarning::SchemaDrift { column, .. }
            | PreprocessingWarning::UnseenCategory { column, .. }
            | PreprocessingWarning::DegenerateColumn { column, .. } => column,
        }
    }

    pub fn is_schema_drift(&self) -> bool {
        matches!(self, PreprocessingWarning::SchemaDrift { .. })
    }
}

impl fmt::Display for PreprocessingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreprocessingWarning::SchemaDrift {
                stage,
                column,
                detail,
            } => write!(f, "[{}] schema drift on '{}': {}", stage, column, detail),
            PreprocessingWarning::UnseenCategory {
                column,
                categories,
                rows,
            } => write!(
                f,
                "unseen categories {:?} in '{}' ({} rows use the fallback encoding)",
                categories, column, rows
            ),
            PreprocessingWarning::DegenerateColumn {
                stage,
                column,
                reason,
            } => write!(f, "[{}] degenerate column '{}': {}", stage, column, reason),
        }
    }
}

/// Logs every warning at `WARN` level.
pub fn emit(warnings: &[PreprocessingWarning]) {
    for warning in warnings {
        tracing::warn!(column = warning.column(), "{}", warning);
    }
}
