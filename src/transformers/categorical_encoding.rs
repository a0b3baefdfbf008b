//! # Categorical Encoding
//!
//! [`CategoricalEncoder`] picks one [`EncodingStrategy`] per categorical column from the
//! column's training cardinality `u` (missing values count as the category `"missing"`):
//!
//! | `u`                               | strategy            | output columns                 |
//! |-----------------------------------|---------------------|--------------------------------|
//! | 0 or 1                            | skip                | none                           |
//! | 2                                 | binary              | `<col>_binary`                 |
//! | `3..=onehot_max`                  | one-hot             | `<col>_cat_<value>` per value  |
//! | `onehot_max+1..=detailed_max`     | target + frequency  | `<col>_target`, `<col>_freq`   |
//! | above `detailed_max`              | minimal             | `<col>_freq`                   |
//!
//! Before choosing, categories seen fewer than `min_frequency` times are merged into
//! `OTHER_RARE` (for high-cardinality columns, or for every column when configured), and the
//! grouped cardinality re-enters the table above. The choice is frozen at fit time.
//!
//! Values never seen during fit are encoded with a fallback and never raise: the "missing"
//! class for binary, all-zero indicators for one-hot, the training global mean for the
//! target encoding and zero for the frequency encoding. The original categorical columns
//! are always dropped.

use crate::diagnostics::{self, PreprocessingWarning};
use crate::exceptions::{PreprocessingError, PreprocessingResult};
use crate::frame::{self, column, is_numeric_type, is_text_type};
use crate::impl_transformer;
use crate::settings::{ColumnRoles, EncoderSettings, RareGrouping};
use datafusion::arrow::array::{Array, AsArray};
use datafusion::arrow::datatypes::{DataType, Float64Type};
use datafusion::functions_aggregate::expr_fn::avg;
use datafusion::logical_expr::{cast, in_list, lit, Case as DFCase, Expr, Literal};
use datafusion::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

const STAGE: &str = "encode";

/// Category standing for missing values.
pub const MISSING_CATEGORY: &str = "missing";
/// Category that rare training values are grouped into.
pub const RARE_CATEGORY: &str = "OTHER_RARE";

/// Strategy family chosen from a cardinality. Pure function of the training cardinality
/// and the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Skip,
    Binary,
    OneHot,
    TargetFrequency,
    Minimal,
}

impl StrategyKind {
    pub fn for_cardinality(unique: usize, settings: &EncoderSettings) -> Self {
        match unique {
            0 | 1 => StrategyKind::Skip,
            2 => StrategyKind::Binary,
            u if u <= settings.onehot_max => StrategyKind::OneHot,
            u if u <= settings.detailed_max => StrategyKind::TargetFrequency,
            _ => StrategyKind::Minimal,
        }
    }
}

/// Training target mean per category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetMeans {
    pub means: BTreeMap<String, f64>,
    /// Used for categories without a training mean.
    pub global_mean: f64,
}

/// Frozen encoding of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum EncodingStrategy {
    Skip,
    Binary {
        /// Sorted training classes; a class encodes as its index.
        classes: Vec<String>,
        /// Code for unseen values: the "missing" class when it was seen, else 0.
        fallback: i64,
    },
    OneHot {
        /// One indicator per category, "missing" excluded.
        categories: Vec<String>,
    },
    TargetFrequency {
        target: Option<TargetMeans>,
        frequencies: BTreeMap<String, i64>,
    },
    Minimal {
        frequencies: BTreeMap<String, i64>,
    },
}

impl EncodingStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            EncodingStrategy::Skip => StrategyKind::Skip,
            EncodingStrategy::Binary { .. } => StrategyKind::Binary,
            EncodingStrategy::OneHot { .. } => StrategyKind::OneHot,
            EncodingStrategy::TargetFrequency { .. } => StrategyKind::TargetFrequency,
            EncodingStrategy::Minimal { .. } => StrategyKind::Minimal,
        }
    }
}

/// Everything learned for one categorical column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnEncoding {
    /// Training values merged into `OTHER_RARE`.
    pub rare_categories: BTreeSet<String>,
    /// Training categories after grouping.
    pub vocabulary: BTreeSet<String>,
    pub strategy: EncodingStrategy,
}

impl ColumnEncoding {
    /// True if `value` (already rendered as text, `"missing"` for null) was seen in training.
    pub fn knows(&self, value: &str) -> bool {
        self.vocabulary.contains(value) || self.rare_categories.contains(value)
    }
}

/// `'missing'` for null, the value as text otherwise, then rare values as `OTHER_RARE`.
fn normalized_expr(name: &str, rare: &BTreeSet<String>) -> Expr {
    let as_text = Expr::Case(DFCase {
        expr: None,
        when_then_expr: vec![(
            Box::new(column(name).is_null()),
            Box::new(lit(MISSING_CATEGORY)),
        )],
        else_expr: Some(Box::new(cast(column(name), DataType::Utf8))),
    });
    if rare.is_empty() {
        return as_text;
    }
    let rare_list: Vec<Expr> = rare.iter().map(|c| lit(c.clone())).collect();
    Expr::Case(DFCase {
        expr: None,
        when_then_expr: vec![(
            Box::new(in_list(as_text.clone(), rare_list, false)),
            Box::new(lit(RARE_CATEGORY)),
        )],
        else_expr: Some(Box::new(as_text)),
    })
}

/// `CASE WHEN value = category THEN code ... ELSE default END`
fn build_case_expr<T: Clone + Literal>(value: &Expr, mapping: &[(String, T)], default: Expr) -> Expr {
    if mapping.is_empty() {
        return default;
    }
    let when_then_expr = mapping
        .iter()
        .map(|(cat, code)| {
            (
                Box::new(value.clone().eq(lit(cat.clone()))),
                Box::new(lit(code.clone())),
            )
        })
        .collect();
    Expr::Case(DFCase {
        expr: None,
        when_then_expr,
        else_expr: Some(Box::new(default)),
    })
}

fn frequency_expr(value: &Expr, frequencies: &BTreeMap<String, i64>) -> Expr {
    let mapping: Vec<(String, i64)> = frequencies.iter().map(|(k, v)| (k.clone(), *v)).collect();
    build_case_expr(value, &mapping, lit(0_i64))
}

/// Learns cardinality-driven encodings for categorical columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    settings: EncoderSettings,
    roles: ColumnRoles,
    /// Column holding the binary label for target encoding.
    pub target_column: String,
    pub encodings: BTreeMap<String, ColumnEncoding>,
    fitted: bool,
    #[serde(skip)]
    fit_warnings: Vec<PreprocessingWarning>,
}

impl CategoricalEncoder {
    pub fn new(settings: EncoderSettings, roles: ColumnRoles) -> Self {
        let target_column = roles.target.clone();
        Self {
            settings,
            roles,
            target_column,
            ..Default::default()
        }
    }

    /// Text and boolean columns that are not reserved, plus low-cardinality numeric columns
    /// when enabled.
    async fn categorical_columns(&self, df: &DataFrame) -> PreprocessingResult<Vec<String>> {
        let mut out = Vec::new();
        let mut numeric = Vec::new();
        for (name, dt) in frame::fields(df) {
            if self.roles.is_reserved(&name) || name == self.target_column {
                continue;
            }
            if is_text_type(&dt) || dt == DataType::Boolean {
                out.push(name);
            } else if self.settings.low_cardinality_numeric && is_numeric_type(&dt) {
                numeric.push(name);
            }
        }
        if !numeric.is_empty() {
            let (rows, _) = frame::non_null_counts(df, &[]).await?;
            for name in numeric {
                let distinct = frame::value_counts(df, &name).await?.counts.len();
                if distinct <= self.settings.numeric_max_unique && (distinct as f64) < rows as f64 * 0.1 {
                    out.push(name);
                }
            }
        }
        Ok(out)
    }

    async fn target_means(
        &self,
        df: &DataFrame,
        value: Expr,
    ) -> PreprocessingResult<Option<TargetMeans>> {
        let Some(dt) = frame::data_type(df, &self.target_column) else {
            return Ok(None);
        };
        if !(is_numeric_type(&dt) || dt == DataType::Boolean) {
            return Ok(None);
        }
        let target = cast(column(&self.target_column), DataType::Float64);
        let global = df
            .clone()
            .aggregate(vec![], vec![avg(target.clone()).alias("mean")])?
            .collect()
            .await?;
        let global_mean = global
            .iter()
            .filter(|b| b.num_rows() > 0)
            .filter_map(|b| b.column(0).as_primitive_opt::<Float64Type>())
            .find(|a| !a.is_null(0))
            .map(|a| a.value(0));
        let Some(global_mean) = global_mean else {
            return Ok(None);
        };

        let grouped = df
            .clone()
            .aggregate(vec![value.alias("category")], vec![avg(target).alias("mean")])?
            .collect()
            .await?;
        let mut means = BTreeMap::new();
        for batch in &grouped {
            let (Some(categories), Some(values)) = (
                batch.column(0).as_string_opt::<i32>(),
                batch.column(1).as_primitive_opt::<Float64Type>(),
            ) else {
                continue;
            };
            for i in 0..batch.num_rows() {
                if !categories.is_null(i) && !values.is_null(i) {
                    means.insert(categories.value(i).to_string(), values.value(i));
                }
            }
        }
        Ok(Some(TargetMeans { means, global_mean }))
    }

    async fn fit_column(&self, df: &DataFrame, name: &str) -> PreprocessingResult<ColumnEncoding> {
        let raw = frame::value_counts(df, name).await?;
        let mut counts = raw.counts;
        if raw.nulls > 0 {
            *counts.entry(MISSING_CATEGORY.to_string()).or_insert(0) += raw.nulls;
        }

        let wants_grouping = match self.settings.rare_grouping {
            RareGrouping::Always => true,
            RareGrouping::HighCardinality => counts.len() > self.settings.detailed_max,
        };
        let rare: BTreeSet<String> = if wants_grouping {
            counts
                .iter()
                .filter(|(c, n)| c.as_str() != MISSING_CATEGORY && **n < self.settings.min_frequency)
                .map(|(c, _)| c.clone())
                .collect()
        } else {
            BTreeSet::new()
        };
        if !rare.is_empty() {
            let merged: i64 = rare.iter().filter_map(|c| counts.remove(c)).sum();
            *counts.entry(RARE_CATEGORY.to_string()).or_insert(0) += merged;
        }

        let kind = StrategyKind::for_cardinality(counts.len(), &self.settings);
        let strategy = match kind {
            StrategyKind::Skip => EncodingStrategy::Skip,
            StrategyKind::Binary => {
                let classes: Vec<String> = counts.keys().cloned().collect();
                let fallback = classes
                    .iter()
                    .position(|c| c == MISSING_CATEGORY)
                    .unwrap_or(0) as i64;
                EncodingStrategy::Binary { classes, fallback }
            }
            StrategyKind::OneHot => EncodingStrategy::OneHot {
                categories: counts
                    .keys()
                    .filter(|c| c.as_str() != MISSING_CATEGORY)
                    .cloned()
                    .collect(),
            },
            StrategyKind::TargetFrequency => EncodingStrategy::TargetFrequency {
                target: self.target_means(df, normalized_expr(name, &rare)).await?,
                frequencies: counts.clone(),
            },
            StrategyKind::Minimal => EncodingStrategy::Minimal {
                frequencies: counts.clone(),
            },
        };
        tracing::debug!(column = name, unique = counts.len(), rare = rare.len(), strategy = ?kind, "chose encoding");
        Ok(ColumnEncoding {
            rare_categories: rare,
            vocabulary: counts.into_keys().collect(),
            strategy,
        })
    }

    pub async fn fit(&mut self, df: &DataFrame) -> PreprocessingResult<()> {
        let mut encodings = BTreeMap::new();
        let mut warnings = Vec::new();
        for name in self.categorical_columns(df).await? {
            let encoding = self.fit_column(df, &name).await?;
            if encoding.strategy == EncodingStrategy::Skip {
                warnings.push(PreprocessingWarning::degenerate(
                    STAGE,
                    &name,
                    "fewer than two categories in training, column dropped",
                ));
            }
            encodings.insert(name, encoding);
        }
        diagnostics::emit(&warnings);
        self.encodings = encodings;
        self.fit_warnings = warnings;
        self.fitted = true;
        Ok(())
    }

    /// Derived `(name, expression)` pairs for one encoded column.
    fn encoded_exprs(&self, name: &str, encoding: &ColumnEncoding) -> Vec<(String, Expr)> {
        let value = normalized_expr(name, &encoding.rare_categories);
        match &encoding.strategy {
            EncodingStrategy::Skip => Vec::new(),
            EncodingStrategy::Binary { classes, fallback } => {
                let mapping: Vec<(String, i64)> = classes
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (c.clone(), i as i64))
                    .collect();
                vec![(
                    format!("{}_binary", name),
                    build_case_expr(&value, &mapping, lit(*fallback)),
                )]
            }
            EncodingStrategy::OneHot { categories } => categories
                .iter()
                .map(|c| {
                    (
                        format!("{}_cat_{}", name, c),
                        build_case_expr(&value, &[(c.clone(), 1_i64)], lit(0_i64)),
                    )
                })
                .collect(),
            EncodingStrategy::TargetFrequency {
                target,
                frequencies,
            } => {
                let mut out = Vec::new();
                if let Some(t) = target {
                    let mapping: Vec<(String, f64)> =
                        t.means.iter().map(|(k, v)| (k.clone(), *v)).collect();
                    out.push((
                        format!("{}_target", name),
                        build_case_expr(&value, &mapping, lit(t.global_mean)),
                    ));
                }
                out.push((format!("{}_freq", name), frequency_expr(&value, frequencies)));
                out
            }
            EncodingStrategy::Minimal { frequencies } => {
                vec![(format!("{}_freq", name), frequency_expr(&value, frequencies))]
            }
        }
    }

    pub fn plan(
        &self,
        df: DataFrame,
    ) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
        if !self.fitted {
            return Err(PreprocessingError::FitNotCalled(
                "CategoricalEncoder".to_string(),
            ));
        }
        let mut warnings = Vec::new();
        let mut exprs = Vec::new();
        let mut derived = Vec::new();
        let mut names = HashSet::new();
        for (name, _) in frame::fields(&df) {
            match self.encodings.get(&name) {
                Some(encoding) => derived.extend(self.encoded_exprs(&name, encoding)),
                None => {
                    exprs.push(column(&name));
                    names.insert(name);
                }
            }
        }
        for (name, expr) in derived {
            if names.insert(name.clone()) {
                exprs.push(expr.alias(name));
            } else {
                warnings.push(PreprocessingWarning::schema_drift(
                    STAGE,
                    &name,
                    "encoded column name already taken, encoding skipped",
                ));
            }
        }
        for name in self.encodings.keys() {
            if !frame::has_column(&df, name) {
                warnings.push(PreprocessingWarning::schema_drift(
                    STAGE,
                    name,
                    "categorical column seen during fit is absent, its encodings are skipped",
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

    /// Learns the encodings with `target_col` as the label and returns the encoded frame.
    pub async fn fit_encode(
        &mut self,
        df: &DataFrame,
        target_col: &str,
    ) -> PreprocessingResult<DataFrame> {
        self.target_column = target_col.to_string();
        self.fit(df).await?;
        self.transform(df.clone())
    }

    pub fn transform_encode(&self, df: DataFrame) -> PreprocessingResult<DataFrame> {
        self.transform(df)
    }

    /// Reports, per encoded column, the values of `df` that were never seen during fit.
    /// Such values are still encoded with the strategy's fallback.
    pub async fn audit_unseen(
        &self,
        df: &DataFrame,
    ) -> PreprocessingResult<Vec<PreprocessingWarning>> {
        if !self.fitted {
            return Err(PreprocessingError::FitNotCalled(
                "CategoricalEncoder".to_string(),
            ));
        }
        let mut warnings = Vec::new();
        for (name, encoding) in &self.encodings {
            if encoding.strategy == EncodingStrategy::Skip || !frame::has_column(df, name) {
                continue;
            }
            let counts = frame::value_counts(df, name).await?;
            let mut categories = Vec::new();
            let mut rows = 0;
            for (value, n) in &counts.counts {
                if !encoding.knows(value) {
                    categories.push(value.clone());
                    rows += *n as u64;
                }
            }
            if counts.nulls > 0 && !encoding.knows(MISSING_CATEGORY) {
                categories.push(MISSING_CATEGORY.to_string());
                rows += counts.nulls as u64;
            }
            if !categories.is_empty() {
                warnings.push(PreprocessingWarning::UnseenCategory {
                    column: name.clone(),
                    categories,
                    rows,
                });
            }
        }
        Ok(warnings)
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

impl_transformer!(CategoricalEncoder);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_ladder() {
        let s = EncoderSettings::default();
        let kinds: Vec<StrategyKind> = [1, 2, 3, 4, 10, 11]
            .iter()
            .map(|u| StrategyKind::for_cardinality(*u, &s))
            .collect();
        assert_eq!(
            kinds,
            vec![
                StrategyKind::Skip,
                StrategyKind::Binary,
                StrategyKind::OneHot,
                StrategyKind::TargetFrequency,
                StrategyKind::TargetFrequency,
                StrategyKind::Minimal,
            ]
        );
    }

    #[test]
    fn test_knows_rare_values() {
        let encoding = ColumnEncoding {
            rare_categories: ["Ops".to_string()].into_iter().collect(),
            vocabulary: ["HR", "IT", RARE_CATEGORY]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            strategy: EncodingStrategy::Skip,
        };
        assert!(encoding.knows("Ops"));
        assert!(encoding.knows("IT"));
        assert!(!encoding.knows("Legal"));
    }
}
