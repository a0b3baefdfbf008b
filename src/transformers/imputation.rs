//! ## Missing value imputation
//!
//! [`MissingValueImputer`] learns one [`ImputeSpec`] per column from the training frame:
//!
//! - A fixed set of known-problematic columns gets a domain constant regardless of the data
//!   (zero for day counts and presence minutes, a "no travel" category for the travel
//!   country, a minimal timestamp sentinel for entry/exit times).
//! - Derived entry/exit time columns are always registered for zero filling, so a frame that
//!   already carries them is filled even when the training frame did not.
//! - Every other numeric column with missing values gets its training median.
//! - Every other text or boolean column with missing values gets its training mode
//!   (smallest value on ties, `"Unknown"` when the column is entirely empty).
//!
//! Transform fills the remaining missing values of learned columns with the stored value.
//! Columns that were not learned are left untouched, and nothing is recomputed from the
//! data being transformed.

use crate::diagnostics::{self, PreprocessingWarning};
use crate::exceptions::{PreprocessingError, PreprocessingResult};
use crate::frame::{self, column, is_numeric_type, is_temporal_type, is_text_type};
use crate::impl_transformer;
use crate::settings::{ColumnRoles, ImputerSettings};
use crate::stats;
use datafusion::arrow::datatypes::{DataType, TimeUnit};
use datafusion::logical_expr::{cast, lit, Case as DFCase, Expr};
use datafusion::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const STAGE: &str = "impute";

/// How the missing values of one column are filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "value", rename_all = "snake_case")]
pub enum ImputeSpec {
    Zero,
    /// A fixed category such as `No_Travel`.
    Constant(String),
    /// A minimal timestamp marking "never happened".
    TimestampSentinel(String),
    Median(f64),
    Mode(String),
}

impl fmt::Display for ImputeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImputeSpec::Zero => write!(f, "zero"),
            ImputeSpec::Constant(v) => write!(f, "constant '{}'", v),
            ImputeSpec::TimestampSentinel(v) => write!(f, "timestamp sentinel '{}'", v),
            ImputeSpec::Median(v) => write!(f, "median {}", v),
            ImputeSpec::Mode(v) => write!(f, "mode '{}'", v),
        }
    }
}

/// `CASE WHEN base IS NOT NULL THEN base ELSE fallback END`
fn coalesce_expr_for(base: Expr, fallback: Expr) -> Expr {
    Expr::Case(DFCase {
        expr: None,
        when_then_expr: vec![(Box::new(base.clone().is_not_null()), Box::new(base))],
        else_expr: Some(Box::new(fallback)),
    })
}

/// Builds the fill expression of `spec` for a column of type `dt`, or `None` when the
/// stored value cannot be expressed in that type.
fn fill_expr_for(name: &str, dt: &DataType, spec: &ImputeSpec) -> Option<Expr> {
    let base = column(name);
    let numeric = is_numeric_type(dt);
    let text = is_text_type(dt);
    let as_float = || cast(column(name), DataType::Float64);
    let filled = match spec {
        ImputeSpec::Zero if numeric => coalesce_expr_for(base, cast(lit(0_i64), dt.clone())),
        ImputeSpec::Zero if text => coalesce_expr_for(base, lit("0")),
        ImputeSpec::Constant(v) | ImputeSpec::Mode(v) if text => {
            coalesce_expr_for(base, lit(v.clone()))
        }
        ImputeSpec::Constant(v) | ImputeSpec::Mode(v) if numeric => {
            let parsed = v.trim().parse::<f64>().ok()?;
            coalesce_expr_for(as_float(), lit(parsed))
        }
        ImputeSpec::Mode(v) if dt == &DataType::Boolean => {
            let flag = v.trim().to_ascii_lowercase().parse::<bool>().ok()?;
            coalesce_expr_for(base, lit(flag))
        }
        ImputeSpec::TimestampSentinel(v) if text => coalesce_expr_for(base, lit(v.clone())),
        ImputeSpec::TimestampSentinel(v) if is_temporal_type(dt) => {
            let sentinel = cast(lit(v.clone()), DataType::Timestamp(TimeUnit::Nanosecond, None));
            coalesce_expr_for(base, cast(sentinel, dt.clone()))
        }
        ImputeSpec::Median(m) if numeric => coalesce_expr_for(as_float(), lit(*m)),
        _ => return None,
    };
    Some(filled.alias(name))
}

/// Learns and applies per-column fill values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissingValueImputer {
    settings: ImputerSettings,
    roles: ColumnRoles,
    /// Learned fill value per column.
    pub fill_values: BTreeMap<String, ImputeSpec>,
    fitted: bool,
    #[serde(skip)]
    fit_warnings: Vec<PreprocessingWarning>,
}

impl MissingValueImputer {
    pub fn new(settings: ImputerSettings, roles: ColumnRoles) -> Self {
        Self {
            settings,
            roles,
            ..Default::default()
        }
    }

    fn fixed_rule(&self, name: &str) -> Option<ImputeSpec> {
        let s = &self.settings;
        if s.zero_fill.iter().any(|c| c == name) || self.is_derived(name) {
            Some(ImputeSpec::Zero)
        } else if s.no_travel.iter().any(|c| c == name) {
            Some(ImputeSpec::Constant(s.no_travel_label.clone()))
        } else if s.timestamp_sentinel.iter().any(|c| c == name) {
            Some(ImputeSpec::TimestampSentinel(
                s.timestamp_sentinel_value.clone(),
            ))
        } else {
            None
        }
    }

    fn is_derived(&self, name: &str) -> bool {
        self.settings.derived_zero_fill.iter().any(|c| c == name)
    }

    /// Learns the fill value of every column that needs one.
    pub async fn fit(&mut self, df: &DataFrame) -> PreprocessingResult<()> {
        let fields = frame::fields(df);
        let names: Vec<String> = fields.iter().map(|(n, _)| n.clone()).collect();
        let (rows, non_null) = frame::non_null_counts(df, &names).await?;

        let mut fill_values = BTreeMap::new();
        let mut warnings = Vec::new();
        let mut needs_median = Vec::new();

        for ((name, dt), present) in fields.iter().zip(non_null) {
            if let Some(spec) = self.fixed_rule(name) {
                fill_values.insert(name.clone(), spec);
                continue;
            }
            if present == rows || self.roles.is_passthrough(name) {
                continue;
            }
            if is_numeric_type(dt) {
                if present == 0 {
                    warnings.push(PreprocessingWarning::degenerate(
                        STAGE,
                        name,
                        "all values missing in training, filling with zero",
                    ));
                    fill_values.insert(name.clone(), ImputeSpec::Zero);
                } else {
                    needs_median.push(name.clone());
                }
            } else if is_text_type(dt) || dt == &DataType::Boolean {
                let counts = frame::value_counts(df, name).await?;
                match counts.mode() {
                    Some(mode) => {
                        fill_values.insert(name.clone(), ImputeSpec::Mode(mode.to_string()));
                    }
                    None if dt == &DataType::Boolean => {
                        warnings.push(PreprocessingWarning::degenerate(
                            STAGE,
                            name,
                            "all values missing in training, left as is",
                        ));
                    }
                    None => {
                        fill_values.insert(
                            name.clone(),
                            ImputeSpec::Mode(self.settings.unknown_label.clone()),
                        );
                    }
                }
            }
        }

        for name in &self.settings.derived_zero_fill {
            fill_values
                .entry(name.clone())
                .or_insert(ImputeSpec::Zero);
        }

        let columns = frame::collect_numeric(df, &needs_median).await?;
        for (name, values) in needs_median.iter().zip(columns) {
            let sorted = stats::sorted_values(&values);
            match stats::median(&sorted) {
                Some(m) => {
                    fill_values.insert(name.clone(), ImputeSpec::Median(m));
                }
                None => {
                    warnings.push(PreprocessingWarning::degenerate(
                        STAGE,
                        name,
                        "no finite values in training, filling with zero",
                    ));
                    fill_values.insert(name.clone(), ImputeSpec::Zero);
                }
            }
        }

        tracing::debug!(columns = fill_values.len(), "fitted missing value imputer");
        diagnostics::emit(&warnings);
        self.fill_values = fill_values;
        self.fit_warnings = warnings;
        self.fitted = true;
        Ok(())
    }

    /// Builds the filling plan and reports columns whose stored fill cannot be applied.
    pub fn plan(
        &self,
        df: DataFrame,
    ) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
        if !self.fitted {
            return Err(PreprocessingError::FitNotCalled(
                "MissingValueImputer".to_string(),
            ));
        }
        let mut warnings = Vec::new();
        let mut exprs = Vec::new();
        for (name, dt) in frame::fields(&df) {
            let expr = match self.fill_values.get(&name) {
                None => column(&name),
                Some(spec) => fill_expr_for(&name, &dt, spec).unwrap_or_else(|| {
                    warnings.push(PreprocessingWarning::schema_drift(
                        STAGE,
                        &name,
                        format!("cannot apply {} fill to a {} column", spec, dt),
                    ));
                    column(&name)
                }),
            };
            exprs.push(expr);
        }
        for name in self.fill_values.keys() {
            if !frame::has_column(&df, name) && !self.is_derived(name) {
                warnings.push(PreprocessingWarning::schema_drift(
                    STAGE,
                    name,
                    "column seen during fit is absent, skipped",
                ));
            }
        }
        Ok((df.select(exprs)?, warnings))
    }

    pub fn transform(&self, df: DataFrame) -> PreprocessingResult<DataFrame> {
        let (df, warnings) = self.plan(df)?;
        diagnostics::emit(&warnings);
        Ok(df)
    }

    /// Fits on `df` and returns it with missing values filled.
    pub async fn fit_handle_missing_values(
        &mut self,
        df: &DataFrame,
    ) -> PreprocessingResult<DataFrame> {
        self.fit(df).await?;
        self.transform(df.clone())
    }

    pub fn transform_handle_missing_values(&self, df: DataFrame) -> PreprocessingResult<DataFrame> {
        self.transform(df)
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn fit_warnings(&self) -> &[PreprocessingWarning] {
        &self.fit_warnings
    }

    fn inherent_is_stateful(&self) -> bool {
        true
    }
}

impl_transformer!(MissingValueImputer);
