//! ## Statistical feature synthesis
//!
//! [`StatisticalFeatureSynthesizer`] profiles every numeric, non-reserved column of the
//! training frame once and derives, at transform time and from that profile only:
//!
//! - `<col>_log` = `ln(1 + x)` and `<col>_sqrt` = `sqrt(x)` when the column was non-negative
//!   in training (negative transform-time values are clamped at zero),
//! - `<col>_zscore` = `(x - mean) / std` with the training scaler, when the column varied,
//! - `<col>_above_mean` = `1` if `x` exceeds the training mean, else `0`,
//! - `<col>_quartile` = bucket `0..=3` against the training quartile cut points
//!   (right-inclusive, open-ended tails), or a `0/1` median split when the cut points
//!   collapse. Columns with fewer than four distinct training values get no bucket.
//!
//! Using training cut points keeps bucket membership comparable across partitions.

use crate::diagnostics::{self, PreprocessingWarning};
use crate::exceptions::{PreprocessingError, PreprocessingResult};
use crate::frame::{self, column, is_numeric_type};
use crate::impl_transformer;
use crate::settings::ColumnRoles;
use crate::stats;
use datafusion::arrow::datatypes::DataType;
use datafusion::prelude::DataFrame;
use datafusion::scalar::ScalarValue;
use datafusion_expr::{cast, lit, Case as DFCase, Expr};
use datafusion_functions::math;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

const STAGE: &str = "synthesize";

/// Standard scaler fitted on one column (population standard deviation).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: f64,
    pub scale: f64,
}

/// Training cut points for the `_quartile` feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuartileCuts {
    /// Strictly increasing Q1, Q2, Q3.
    Quartiles { q1: f64, q2: f64, q3: f64 },
    /// Cut points collapsed; `x <= median` is bucket 0, otherwise 1.
    MedianSplit { median: f64 },
}

/// Everything learned about one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub non_negative: bool,
    /// Sample standard deviation.
    pub std: f64,
    pub scaler: Option<StandardScaler>,
    pub mean: f64,
    pub unique_values: usize,
    pub min: f64,
    pub max: f64,
    pub quartiles: Option<QuartileCuts>,
}

impl ColumnProfile {
    fn from_values(values: &[Option<f64>]) -> Option<Self> {
        let sorted = stats::sorted_values(values);
        let (min, max) = (*sorted.first()?, *sorted.last()?);
        let mean = stats::mean(&sorted)?;
        let std = stats::std_dev(&sorted, 1).unwrap_or(0.0);
        let scaler = (min < max && std > 0.0)
            .then(|| stats::std_dev(&sorted, 0))
            .flatten()
            .filter(|s| *s > 0.0)
            .map(|scale| StandardScaler { mean, scale });
        let unique_values = stats::distinct_count(&sorted);
        let quartiles = if unique_values >= 4 {
            let q1 = stats::quantile(&sorted, 0.25)?;
            let q2 = stats::quantile(&sorted, 0.5)?;
            let q3 = stats::quantile(&sorted, 0.75)?;
            Some(if q1 < q2 && q2 < q3 {
                QuartileCuts::Quartiles { q1, q2, q3 }
            } else {
                QuartileCuts::MedianSplit { median: q2 }
            })
        } else {
            None
        };
        Some(Self {
            non_negative: min >= 0.0,
            std,
            scaler,
            mean,
            unique_values,
            min,
            max,
            quartiles,
        })
    }
}

/// `max(x, 0)`
fn clamped(x: Expr) -> Expr {
    Expr::Case(DFCase {
        expr: None,
        when_then_expr: vec![(Box::new(x.clone().lt(lit(0.0))), Box::new(lit(0.0)))],
        else_expr: Some(Box::new(x)),
    })
}

fn bucket_expr(x: Expr, cuts: &QuartileCuts) -> Expr {
    let mut when_then_expr = vec![(
        Box::new(x.clone().is_null()),
        Box::new(lit(ScalarValue::Int64(None))),
    )];
    let (edges, top): (Vec<f64>, i64) = match cuts {
        QuartileCuts::Quartiles { q1, q2, q3 } => (vec![*q1, *q2, *q3], 3),
        QuartileCuts::MedianSplit { median } => (vec![*median], 1),
    };
    for (bucket, edge) in edges.into_iter().enumerate() {
        when_then_expr.push((
            Box::new(x.clone().lt_eq(lit(edge))),
            Box::new(lit(bucket as i64)),
        ));
    }
    Expr::Case(DFCase {
        expr: None,
        when_then_expr,
        else_expr: Some(Box::new(lit(top))),
    })
}

/// Derives log, sqrt, z-score, above-mean and quartile features from training statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatisticalFeatureSynthesizer {
    roles: ColumnRoles,
    pub profiles: BTreeMap<String, ColumnProfile>,
    fitted: bool,
    #[serde(skip)]
    fit_warnings: Vec<PreprocessingWarning>,
}

impl StatisticalFeatureSynthesizer {
    pub fn new(roles: ColumnRoles) -> Self {
        Self {
            roles,
            ..Default::default()
        }
    }

    /// Profiles the training columns. The data itself is not changed.
    pub async fn fit(&mut self, df: &DataFrame) -> PreprocessingResult<()> {
        let names: Vec<String> = frame::fields(df)
            .into_iter()
            .filter(|(n, dt)| is_numeric_type(dt) && !self.roles.is_reserved(n))
            .map(|(n, _)| n)
            .collect();
        let columns = frame::collect_numeric(df, &names).await?;

        let mut profiles = BTreeMap::new();
        let mut warnings = Vec::new();
        for (name, values) in names.into_iter().zip(columns) {
            let Some(profile) = ColumnProfile::from_values(&values) else {
                warnings.push(PreprocessingWarning::degenerate(
                    STAGE,
                    &name,
                    "all values missing, no statistical features",
                ));
                continue;
            };
            if profile.scaler.is_none() {
                warnings.push(PreprocessingWarning::degenerate(
                    STAGE,
                    &name,
                    "no variance, z-score skipped",
                ));
            }
            if profile.quartiles.is_none() {
                warnings.push(PreprocessingWarning::degenerate(
                    STAGE,
                    &name,
                    format!(
                        "{} distinct values, quartile bucket skipped",
                        profile.unique_values
                    ),
                ));
            }
            profiles.insert(name, profile);
        }
        tracing::debug!(columns = profiles.len(), "fitted statistical feature synthesizer");
        diagnostics::emit(&warnings);
        self.profiles = profiles;
        self.fit_warnings = warnings;
        self.fitted = true;
        Ok(())
    }

    fn derived_exprs(name: &str, profile: &ColumnProfile) -> Vec<(String, Expr)> {
        let x = cast(column(name), DataType::Float64);
        let mut out = Vec::new();
        if profile.non_negative {
            out.push((
                format!("{}_log", name),
                math::ln().call(vec![clamped(x.clone()) + lit(1.0)]),
            ));
            out.push((
                format!("{}_sqrt", name),
                math::sqrt().call(vec![clamped(x.clone())]),
            ));
        }
        if let Some(scaler) = profile.scaler {
            out.push((
                format!("{}_zscore", name),
                (x.clone() - lit(scaler.mean)) / lit(scaler.scale),
            ));
        }
        out.push((
            format!("{}_above_mean", name),
            Expr::Case(DFCase {
                expr: None,
                when_then_expr: vec![(
                    Box::new(x.clone().gt(lit(profile.mean))),
                    Box::new(lit(1_i64)),
                )],
                else_expr: Some(Box::new(lit(0_i64))),
            }),
        ));
        if let Some(cuts) = &profile.quartiles {
            out.push((format!("{}_quartile", name), bucket_expr(x, cuts)));
        }
        out
    }

    pub fn plan(
        &self,
        df: DataFrame,
    ) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
        if !self.fitted {
            return Err(PreprocessingError::FitNotCalled(
                "StatisticalFeatureSynthesizer".to_string(),
            ));
        }
        let mut warnings = Vec::new();
        let fields = frame::fields(&df);
        let mut taken: HashSet<String> = fields.iter().map(|(n, _)| n.clone()).collect();
        let mut exprs = frame::passthrough(&df);
        for (name, dt) in &fields {
            let Some(profile) = self.profiles.get(name) else {
                continue;
            };
            if !is_numeric_type(dt) {
                warnings.push(PreprocessingWarning::schema_drift(
                    STAGE,
                    name,
                    format!("expected a numeric column, found {}", dt),
                ));
                continue;
            }
            for (derived, expr) in Self::derived_exprs(name, profile) {
                if taken.insert(derived.clone()) {
                    exprs.push(expr.alias(derived));
                }
            }
        }
        for name in self.profiles.keys() {
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

    /// Adds the derived columns.
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

impl_transformer!(StatisticalFeatureSynthesizer);
