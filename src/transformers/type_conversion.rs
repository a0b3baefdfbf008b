//! ## Type normalization
//!
//! [`DataTypeConverter`] decides, once on the training frame, how each column is
//! normalized before features are derived:
//!
//! - date and raw timestamp text columns become `Timestamp` (unparsable values become missing),
//! - `Boolean` columns and boolean flag columns stored as text become `0/1` integers,
//! - remaining text columns whose values all parse as numbers become `Float64`.
//!
//! Every planned conversion is a total function: values that fail to convert become
//! missing, and the number of such values seen on the training frame is recorded in a
//! [`ConversionOutcome`] and reported as a schema drift warning instead of being dropped
//! silently.

use crate::diagnostics::{self, PreprocessingWarning};
use crate::exceptions::{PreprocessingError, PreprocessingResult};
use crate::frame::{self, column, is_numeric_type, is_temporal_type, is_text_type};
use crate::impl_transformer;
use crate::settings::ColumnRoles;
use datafusion::arrow::array::{Array, AsArray};
use datafusion::arrow::datatypes::{DataType, Int64Type, TimeUnit};
use datafusion::functions_aggregate::expr_fn::count;
use datafusion::logical_expr::{cast, try_cast, Expr};
use datafusion::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const STAGE: &str = "convert_types";

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Nanosecond, None)
}

/// Conversion planned for one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conversion {
    ToTimestamp,
    BooleanToInt,
    FlagTextToInt,
    TextToFloat,
}

impl Conversion {
    fn target_type(&self) -> DataType {
        match self {
            Conversion::ToTimestamp => timestamp_type(),
            Conversion::BooleanToInt | Conversion::FlagTextToInt => DataType::Int64,
            Conversion::TextToFloat => DataType::Float64,
        }
    }

    /// Expression converting `name` (currently of type `dt`), or `None` if the column no
    /// longer has a type this conversion accepts.
    fn expr_for(&self, name: &str, dt: &DataType) -> Option<Expr> {
        let base = column(name);
        let expr = match self {
            Conversion::ToTimestamp if is_text_type(dt) => try_cast(base, timestamp_type()),
            Conversion::ToTimestamp if is_temporal_type(dt) => base,
            Conversion::BooleanToInt | Conversion::FlagTextToInt if dt == &DataType::Boolean => {
                cast(base, DataType::Int64)
            }
            Conversion::BooleanToInt | Conversion::FlagTextToInt if is_text_type(dt) => {
                cast(try_cast(base, DataType::Boolean), DataType::Int64)
            }
            Conversion::BooleanToInt | Conversion::FlagTextToInt if is_numeric_type(dt) => base,
            Conversion::TextToFloat if is_text_type(dt) => try_cast(base, DataType::Float64),
            Conversion::TextToFloat if is_numeric_type(dt) => cast(base, DataType::Float64),
            _ => return None,
        };
        Some(expr.alias(name))
    }
}

/// Result of a planned conversion on the training frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOutcome {
    pub conversion: Conversion,
    /// Non-missing training values that did not convert.
    pub failed_values: i64,
}

impl ConversionOutcome {
    pub fn succeeded(&self) -> bool {
        self.failed_values == 0
    }
}

/// Counts the non-missing values of `name` and how many of them survive `converted`.
async fn conversion_counts(
    df: &DataFrame,
    name: &str,
    converted: Expr,
) -> PreprocessingResult<(i64, i64)> {
    let agg = df.clone().aggregate(
        vec![],
        vec![
            count(column(name)).alias("present"),
            count(converted).alias("converted"),
        ],
    )?;
    let batches = agg.collect().await?;
    let mut totals = (0, 0);
    for batch in batches.iter().filter(|b| b.num_rows() > 0) {
        let present = batch.column(0).as_primitive_opt::<Int64Type>();
        let converted = batch.column(1).as_primitive_opt::<Int64Type>();
        if let (Some(p), Some(c)) = (present, converted) {
            if !p.is_null(0) && !c.is_null(0) {
                totals.0 += p.value(0);
                totals.1 += c.value(0);
            }
        }
    }
    Ok(totals)
}

/// Plans and applies column type normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataTypeConverter {
    roles: ColumnRoles,
    /// Planned conversion and training outcome per column.
    pub outcomes: BTreeMap<String, ConversionOutcome>,
    fitted: bool,
    #[serde(skip)]
    fit_warnings: Vec<PreprocessingWarning>,
}

impl DataTypeConverter {
    pub fn new(roles: ColumnRoles) -> Self {
        Self {
            roles,
            ..Default::default()
        }
    }

    fn candidate(&self, name: &str, dt: &DataType) -> Option<Conversion> {
        let temporal_role = self.roles.is_date(name) || self.roles.is_raw_timestamp(name);
        if temporal_role {
            return is_text_type(dt).then_some(Conversion::ToTimestamp);
        }
        if dt == &DataType::Boolean {
            return Some(Conversion::BooleanToInt);
        }
        if !is_text_type(dt) {
            return None;
        }
        if self.roles.is_boolean_flag(name) || self.roles.is_label(name) {
            Some(Conversion::FlagTextToInt)
        } else if self.roles.is_identifier(name) {
            None
        } else {
            Some(Conversion::TextToFloat)
        }
    }

    pub async fn fit(&mut self, df: &DataFrame) -> PreprocessingResult<()> {
        let mut outcomes = BTreeMap::new();
        let mut warnings = Vec::new();
        for (name, dt) in frame::fields(df) {
            let Some(conversion) = self.candidate(&name, &dt) else {
                continue;
            };
            let Some(expr) = conversion.expr_for(&name, &dt) else {
                continue;
            };
            let (present, converted) = conversion_counts(df, &name, expr).await?;
            let failed_values = present - converted;
            if conversion == Conversion::TextToFloat && (present == 0 || failed_values > 0) {
                // A genuine categorical column.
                continue;
            }
            if failed_values > 0 {
                warnings.push(PreprocessingWarning::schema_drift(
                    STAGE,
                    &name,
                    format!(
                        "{} of {} values could not be converted to {} and are treated as missing",
                        failed_values,
                        present,
                        conversion.target_type()
                    ),
                ));
            }
            outcomes.insert(
                name,
                ConversionOutcome {
                    conversion,
                    failed_values,
                },
            );
        }
        tracing::debug!(columns = outcomes.len(), "fitted data type converter");
        diagnostics::emit(&warnings);
        self.outcomes = outcomes;
        self.fit_warnings = warnings;
        self.fitted = true;
        Ok(())
    }

    pub fn plan(
        &self,
        df: DataFrame,
    ) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
        if !self.fitted {
            return Err(PreprocessingError::FitNotCalled(
                "DataTypeConverter".to_string(),
            ));
        }
        let mut warnings = Vec::new();
        let mut exprs = Vec::new();
        for (name, dt) in frame::fields(&df) {
            let expr = match self.outcomes.get(&name) {
                None => column(&name),
                Some(outcome) => outcome.conversion.expr_for(&name, &dt).unwrap_or_else(|| {
                    warnings.push(PreprocessingWarning::schema_drift(
                        STAGE,
                        &name,
                        format!("cannot convert a {} column to {}", dt, outcome.conversion.target_type()),
                    ));
                    column(&name)
                }),
            };
            exprs.push(expr);
        }
        for name in self.outcomes.keys() {
            if !frame::has_column(&df, name) {
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

impl_transformer!(DataTypeConverter);
