//! ## Feature normalization
//!
//! [`FeatureNormalizer`] fits a single scaler over the numeric, non-reserved columns of the
//! training frame and applies it as `(x - center) / scale`:
//!
//! | method     | center | scale                          |
//! |------------|--------|--------------------------------|
//! | `standard` | mean   | population standard deviation  |
//! | `minmax`   | min    | max - min                      |
//! | `robust`   | median | Q3 - Q1                        |
//!
//! A zero scale is replaced by one, so constant columns are only shifted. The method is
//! chosen once; switching methods requires fitting again.

use crate::diagnostics::{self, PreprocessingWarning};
use crate::exceptions::{PreprocessingError, PreprocessingResult};
use crate::frame::{self, column, is_numeric_type};
use crate::impl_transformer;
use crate::settings::{ColumnRoles, NormalizationMethod};
use crate::stats;
use datafusion::arrow::datatypes::DataType;
use datafusion::logical_expr::{cast, lit};
use datafusion::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const STAGE: &str = "normalize";

/// Affine parameters of one column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingParams {
    pub center: f64,
    pub scale: f64,
}

impl ScalingParams {
    pub fn fit(method: NormalizationMethod, values: &[Option<f64>]) -> Option<Self> {
        let sorted = stats::sorted_values(values);
        let (center, scale) = match method {
            NormalizationMethod::Standard => {
                (stats::mean(&sorted)?, stats::std_dev(&sorted, 0)?)
            }
            NormalizationMethod::MinMax => {
                let (min, max) = (*sorted.first()?, *sorted.last()?);
                (min, max - min)
            }
            NormalizationMethod::Robust => (
                stats::median(&sorted)?,
                stats::quantile(&sorted, 0.75)? - stats::quantile(&sorted, 0.25)?,
            ),
        };
        let scale = if stats::is_constant(&sorted) || scale == 0.0 || !scale.is_finite() {
            1.0
        } else {
            scale
        };
        Some(Self { center, scale })
    }

    pub fn apply(&self, x: f64) -> f64 {
        (x - self.center) / self.scale
    }
}

/// Learns one scaler over the surviving numeric columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureNormalizer {
    roles: ColumnRoles,
    pub method: NormalizationMethod,
    /// Columns the scaler was fitted on, in training frame order.
    pub columns: Vec<String>,
    pub params: BTreeMap<String, ScalingParams>,
    fitted: bool,
    #[serde(skip)]
    fit_warnings: Vec<PreprocessingWarning>,
}

impl FeatureNormalizer {
    pub fn new(method: NormalizationMethod, roles: ColumnRoles) -> Self {
        Self {
            roles,
            method,
            ..Default::default()
        }
    }

    pub async fn fit(&mut self, df: &DataFrame) -> PreprocessingResult<()> {
        let names: Vec<String> = frame::fields(df)
            .into_iter()
            .filter(|(n, dt)| is_numeric_type(dt) && !self.roles.is_reserved(n))
            .map(|(n, _)| n)
            .collect();
        let values = frame::collect_numeric(df, &names).await?;
        let mut params = BTreeMap::new();
        let mut columns = Vec::new();
        let mut warnings = Vec::new();
        for (name, values) in names.into_iter().zip(values) {
            match ScalingParams::fit(self.method, &values) {
                Some(p) => {
                    params.insert(name.clone(), p);
                    columns.push(name);
                }
                None => warnings.push(PreprocessingWarning::degenerate(
                    STAGE,
                    &name,
                    "all values missing, not scaled",
                )),
            }
        }
        tracing::debug!(columns = columns.len(), method = %self.method, "fitted feature normalizer");
        diagnostics::emit(&warnings);
        self.columns = columns;
        self.params = params;
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
                "FeatureNormalizer".to_string(),
            ));
        }
        let mut warnings = Vec::new();
        let mut exprs = Vec::new();
        for (name, dt) in frame::fields(&df) {
            let expr = match self.params.get(&name) {
                Some(p) if is_numeric_type(&dt) => ((cast(column(&name), DataType::Float64)
                    - lit(p.center))
                    / lit(p.scale))
                .alias(&name),
                Some(_) => {
                    warnings.push(PreprocessingWarning::schema_drift(
                        STAGE,
                        &name,
                        format!("expected a numeric column, found {}", dt),
                    ));
                    column(&name)
                }
                None => column(&name),
            };
            exprs.push(expr);
        }
        for name in &self.columns {
            if !frame::has_column(&df, name) {
                warnings.push(PreprocessingWarning::schema_drift(
                    STAGE,
                    name,
                    "normalized column is absent, skipped",
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

    /// Fits the scaler named by `method` ("standard", "minmax" or "robust") and returns `df`
    /// unchanged.
    pub async fn fit_normalize_features(
        &mut self,
        df: &DataFrame,
        method: &str,
    ) -> PreprocessingResult<DataFrame> {
        self.method = method.parse()?;
        self.fit(df).await?;
        Ok(df.clone())
    }

    pub fn transform_normalize_features(&self, df: DataFrame) -> PreprocessingResult<DataFrame> {
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

impl_transformer!(FeatureNormalizer);
