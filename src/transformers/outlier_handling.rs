//! ## Outlier handling
//!
//! [`OutlierCapper`] learns Tukey fences per numeric column on the training frame:
//! `lower = Q1 - 1.5 * IQR`, `upper = Q3 + 1.5 * IQR`, with quantiles interpolated linearly.
//! At transform time out-of-fence values are either clipped to the fence
//! ([`OutlierMethod::Cap`]) or replaced by a missing value ([`OutlierMethod::Remove`]).
//! Rows are never dropped.
//!
//! Outlier handling is optional: transforming with an unfitted capper leaves the frame
//! unchanged and logs a warning.

use crate::diagnostics::{self, PreprocessingWarning};
use crate::exceptions::PreprocessingResult;
use crate::frame::{self, column, is_numeric_type};
use crate::impl_transformer;
use crate::settings::{ColumnRoles, OutlierMethod};
use crate::stats;
use datafusion::arrow::datatypes::DataType;
use datafusion::logical_expr::{cast, lit, Case as DFCase, Expr};
use datafusion::prelude::DataFrame;
use datafusion::scalar::ScalarValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const STAGE: &str = "cap_outliers";

/// Interquartile fences of one column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IqrBounds {
    pub q1: f64,
    pub q3: f64,
    pub lower: f64,
    pub upper: f64,
}

impl IqrBounds {
    /// Fences of the non-missing values, or `None` if there are none.
    pub fn from_values(values: &[Option<f64>]) -> Option<Self> {
        let sorted = stats::sorted_values(values);
        let q1 = stats::quantile(&sorted, 0.25)?;
        let q3 = stats::quantile(&sorted, 0.75)?;
        let iqr = q3 - q1;
        Some(Self {
            q1,
            q3,
            lower: q1 - 1.5 * iqr,
            upper: q3 + 1.5 * iqr,
        })
    }
}

/// `CASE WHEN x < lower THEN lower WHEN x > upper THEN upper ELSE x END`
fn cap_expr_for(name: &str, bounds: &IqrBounds) -> Expr {
    let base = cast(column(name), DataType::Float64);
    Expr::Case(DFCase {
        expr: None,
        when_then_expr: vec![
            (
                Box::new(base.clone().lt(lit(bounds.lower))),
                Box::new(lit(bounds.lower)),
            ),
            (
                Box::new(base.clone().gt(lit(bounds.upper))),
                Box::new(lit(bounds.upper)),
            ),
        ],
        else_expr: Some(Box::new(base)),
    })
}

/// `CASE WHEN x < lower OR x > upper THEN NULL ELSE x END`
fn null_out_expr_for(name: &str, bounds: &IqrBounds) -> Expr {
    let base = cast(column(name), DataType::Float64);
    Expr::Case(DFCase {
        expr: None,
        when_then_expr: vec![(
            Box::new(
                base.clone()
                    .lt(lit(bounds.lower))
                    .or(base.clone().gt(lit(bounds.upper))),
            ),
            Box::new(lit(ScalarValue::Float64(None))),
        )],
        else_expr: Some(Box::new(base)),
    })
}

/// Learns IQR fences and caps (or nulls out) values beyond them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutlierCapper {
    roles: ColumnRoles,
    pub method: OutlierMethod,
    pub bounds: BTreeMap<String, IqrBounds>,
    fitted: bool,
    #[serde(skip)]
    fit_warnings: Vec<PreprocessingWarning>,
}

impl OutlierCapper {
    pub fn new(method: OutlierMethod, roles: ColumnRoles) -> Self {
        Self {
            roles,
            method,
            ..Default::default()
        }
    }

    fn excluded(&self, name: &str) -> bool {
        self.roles.is_reserved(name)
    }

    /// Learns the fences; the data is not changed.
    pub async fn fit(&mut self, df: &DataFrame) -> PreprocessingResult<()> {
        let names: Vec<String> = frame::fields(df)
            .into_iter()
            .filter(|(n, dt)| is_numeric_type(dt) && !self.excluded(n))
            .map(|(n, _)| n)
            .collect();
        let columns = frame::collect_numeric(df, &names).await?;
        let mut bounds = BTreeMap::new();
        let mut warnings = Vec::new();
        for (name, values) in names.into_iter().zip(columns) {
            match IqrBounds::from_values(&values) {
                Some(b) => {
                    if b.q3 == b.q1 {
                        warnings.push(PreprocessingWarning::degenerate(
                            STAGE,
                            &name,
                            format!("zero interquartile range, values are held to {}", b.q1),
                        ));
                    }
                    bounds.insert(name, b);
                }
                None => warnings.push(PreprocessingWarning::degenerate(
                    STAGE,
                    &name,
                    "all values missing, no bounds",
                )),
            }
        }
        tracing::debug!(columns = bounds.len(), method = %self.method, "fitted outlier capper");
        diagnostics::emit(&warnings);
        self.bounds = bounds;
        self.fit_warnings = warnings;
        self.fitted = true;
        Ok(())
    }

    pub fn plan(
        &self,
        df: DataFrame,
    ) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
        if !self.fitted {
            tracing::warn!("outlier bounds were never fitted, frame left unchanged");
            return Ok((df, Vec::new()));
        }
        let mut warnings = Vec::new();
        let mut exprs = Vec::new();
        for (name, dt) in frame::fields(&df) {
            let expr = match self.bounds.get(&name) {
                Some(b) if is_numeric_type(&dt) && !self.excluded(&name) => match self.method {
                    OutlierMethod::Cap => cap_expr_for(&name, b).alias(&name),
                    OutlierMethod::Remove => null_out_expr_for(&name, b).alias(&name),
                },
                Some(_) if !self.excluded(&name) => {
                    warnings.push(PreprocessingWarning::schema_drift(
                        STAGE,
                        &name,
                        format!("expected a numeric column, found {}", dt),
                    ));
                    column(&name)
                }
                _ => column(&name),
            };
            exprs.push(expr);
        }
        for name in self.bounds.keys() {
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

    /// Learns fences for `method` and returns `df` unchanged.
    pub async fn fit_handle_outliers(
        &mut self,
        df: &DataFrame,
        method: OutlierMethod,
    ) -> PreprocessingResult<DataFrame> {
        self.method = method;
        self.fit(df).await?;
        Ok(df.clone())
    }

    pub fn transform_handle_outliers(&self, df: DataFrame) -> PreprocessingResult<DataFrame> {
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

impl_transformer!(OutlierCapper);

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_iqr_bounds_with_single_outlier() {
        let values = [20.0, 21.0, 22.0, 23.0, 24.0, 1000.0].map(Some);
        let b = IqrBounds::from_values(&values).unwrap();
        assert_relative_eq!(b.q1, 21.25);
        assert_relative_eq!(b.q3, 23.75);
        assert_relative_eq!(b.lower, 17.5);
        assert_relative_eq!(b.upper, 27.5);
    }

    #[test]
    fn test_iqr_bounds_without_values() {
        assert!(IqrBounds::from_values(&[None, None]).is_none());
    }
}
