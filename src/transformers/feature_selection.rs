//! ## Feature Selection
//!
//! - [`SourceColumnDropper`]: removes raw source columns once features have been derived from them.
//! - [`VarianceCorrelationFilter`]: learns, from the training frame only, which columns survive
//!   a variance pass and then a correlation pass, and applies that decision verbatim.
//!
//! Columns whose name carries a protected marker (by default `zscore` and `quartile`) are
//! exempt from both passes. Label, identifier and date columns are never candidates and always
//! pass through, as do non-numeric columns.
//!
//! The correlation pass compares columns block by block (a within-block pass plus a
//! cross-block pass, run in parallel with rayon) and samples rows of very large frames with a
//! seeded RNG. Neither affects which columns survive for a given frame: every pair above the
//! threshold is resolved in column order, and the member with the longer name is dropped
//! (the lexicographically larger one on equal length).

use crate::diagnostics::{self, PreprocessingWarning};
use crate::exceptions::{PreprocessingError, PreprocessingResult};
use crate::frame::{self, column, is_numeric_type};
use crate::impl_transformer;
use crate::settings::{ColumnRoles, CorrelationSettings};
use crate::stats;
use datafusion::dataframe::DataFrame;
use datafusion::logical_expr::Expr;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Removes the specified columns from the DataFrame. Absent columns are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceColumnDropper {
    pub columns: Vec<String>,
}

impl SourceColumnDropper {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub async fn fit(&mut self, _df: &DataFrame) -> PreprocessingResult<()> {
        Ok(())
    }

    pub fn plan(
        &self,
        df: DataFrame,
    ) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
        let available_exprs: Vec<Expr> = df
            .schema()
            .fields()
            .iter()
            .filter(|field| !self.columns.contains(field.name()))
            .map(|field| column(field.name()))
            .collect();

        if available_exprs.is_empty() {
            return Err(PreprocessingError::InvalidParameter(
                "Dropping the source columns would result in an empty DataFrame.".to_string(),
            ));
        }
        Ok((df.select(available_exprs)?, Vec::new()))
    }

    pub fn transform(&self, df: DataFrame) -> PreprocessingResult<DataFrame> {
        let (df, warnings) = self.plan(df)?;
        diagnostics::emit(&warnings);
        Ok(df)
    }

    pub fn is_fitted(&self) -> bool {
        true
    }

    fn inherent_is_stateful(&self) -> bool {
        false
    }
}

impl_transformer!(SourceColumnDropper);

/// Columns kept and dropped by one filtering pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterDecision {
    /// Surviving columns in training frame order.
    pub retained: Vec<String>,
    pub dropped: Vec<String>,
}

/// A training pair above the correlation threshold and how it was resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedPair {
    pub kept: String,
    pub dropped: String,
    pub correlation: f64,
}

/// Which member of a correlated pair goes: the longer name, then the larger one.
fn drop_order(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Pairs `(i, j, |r|)` with `i < j` and `|r| > threshold`, sorted by `(i, j)`.
fn correlated_pairs(
    columns: &[Vec<Option<f64>>],
    threshold: f64,
    chunk_size: usize,
) -> Vec<(usize, usize, f64)> {
    let n = columns.len();
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<(usize, usize)> = (0..n)
        .step_by(chunk_size)
        .map(|start| (start, (start + chunk_size).min(n)))
        .collect();
    // Within-block jobs (p == q) and cross-block jobs (p < q).
    let jobs: Vec<(usize, usize)> = (0..chunks.len())
        .flat_map(|p| (p..chunks.len()).map(move |q| (p, q)))
        .collect();
    let mut pairs: Vec<(usize, usize, f64)> = jobs
        .par_iter()
        .flat_map_iter(|&(p, q)| {
            let (a_start, a_end) = chunks[p];
            let (b_start, b_end) = chunks[q];
            let mut found = Vec::new();
            for i in a_start..a_end {
                let j_start = if p == q { i + 1 } else { b_start };
                for j in j_start..b_end {
                    if let Some(r) = stats::pearson(&columns[i], &columns[j]) {
                        if r.abs() > threshold {
                            found.push((i, j, r.abs()));
                        }
                    }
                }
            }
            found
        })
        .collect();
    pairs.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    pairs
}

/// Row positions to use for the correlation pass.
fn sample_rows(rows: usize, settings: &CorrelationSettings) -> Option<Vec<usize>> {
    if rows <= settings.sample_threshold || settings.sample_size >= rows {
        return None;
    }
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut picked = rand::seq::index::sample(&mut rng, rows, settings.sample_size).into_vec();
    picked.sort_unstable();
    Some(picked)
}

/// Learns and applies the variance and correlation filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VarianceCorrelationFilter {
    roles: ColumnRoles,
    protected_markers: Vec<String>,
    pub correlation_settings: CorrelationSettings,
    /// Threshold used by the `Transformer` entry point.
    pub default_variance_threshold: f64,
    pub variance_threshold: Option<f64>,
    pub variance: Option<FilterDecision>,
    pub correlation_threshold: Option<f64>,
    pub correlation: Option<FilterDecision>,
    pub correlated_pairs: Vec<CorrelatedPair>,
    #[serde(skip)]
    fit_warnings: Vec<PreprocessingWarning>,
}

impl VarianceCorrelationFilter {
    pub fn new(
        roles: ColumnRoles,
        protected_markers: Vec<String>,
        variance_threshold: f64,
        correlation_settings: CorrelationSettings,
    ) -> Self {
        Self {
            roles,
            protected_markers,
            correlation_settings,
            default_variance_threshold: variance_threshold,
            ..Default::default()
        }
    }

    /// Markers match case-insensitively.
    pub fn is_protected(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.protected_markers
            .iter()
            .any(|m| !m.is_empty() && name.contains(&m.to_lowercase()))
    }

    /// Numeric columns subject to filtering.
    fn candidates(&self, df: &DataFrame) -> Vec<String> {
        frame::fields(df)
            .into_iter()
            .filter(|(n, dt)| {
                is_numeric_type(dt) && !self.roles.is_reserved(n) && !self.is_protected(n)
            })
            .map(|(n, _)| n)
            .collect()
    }

    fn decision(df: &DataFrame, dropped: &HashSet<String>) -> FilterDecision {
        let mut decision = FilterDecision::default();
        for (name, _) in frame::fields(df) {
            if dropped.contains(&name) {
                decision.dropped.push(name);
            } else {
                decision.retained.push(name);
            }
        }
        decision
    }

    fn apply(
        decision: &FilterDecision,
        stage: &str,
        df: DataFrame,
    ) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
        let mut warnings = Vec::new();
        let mut exprs = Vec::new();
        for name in &decision.retained {
            if frame::has_column(&df, name) {
                exprs.push(column(name));
            } else {
                warnings.push(PreprocessingWarning::schema_drift(
                    stage,
                    name,
                    "retained column is absent, skipped",
                ));
            }
        }
        if exprs.is_empty() {
            return Err(PreprocessingError::InvalidParameter(format!(
                "None of the columns retained by {} are present.",
                stage
            )));
        }
        Ok((df.select(exprs)?, warnings))
    }

    /// Drops non-protected numeric columns whose population variance is at or below
    /// `threshold`, and returns the filtered frame.
    pub async fn fit_variance_filtering(
        &mut self,
        df: &DataFrame,
        threshold: f64,
    ) -> PreprocessingResult<DataFrame> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(PreprocessingError::InvalidParameter(format!(
                "variance threshold must be non-negative, got {}",
                threshold
            )));
        }
        let names = self.candidates(df);
        let columns = frame::collect_numeric(df, &names).await?;
        let variances: Vec<Option<f64>> = columns
            .par_iter()
            .map(|values| stats::variance(&stats::sorted_values(values), 0))
            .collect();
        let mut dropped = HashSet::new();
        let mut warnings = Vec::new();
        for (name, variance) in names.iter().zip(variances) {
            match variance {
                Some(v) if v > threshold => {}
                Some(_) => {
                    dropped.insert(name.clone());
                }
                None => {
                    warnings.push(PreprocessingWarning::degenerate(
                        "variance_filter",
                        name,
                        "all values missing, column dropped",
                    ));
                    dropped.insert(name.clone());
                }
            }
        }
        diagnostics::emit(&warnings);
        self.fit_warnings = warnings;
        let decision = Self::decision(df, &dropped);
        tracing::debug!(
            dropped = decision.dropped.len(),
            retained = decision.retained.len(),
            threshold,
            "fitted variance filter"
        );
        self.variance_threshold = Some(threshold);
        self.variance = Some(decision);
        self.transform_variance_filtering(df.clone())
    }

    pub fn plan_variance_filtering(
        &self,
        df: DataFrame,
    ) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
        let decision = self.variance.as_ref().ok_or_else(|| {
            PreprocessingError::FitNotCalled("VarianceCorrelationFilter (variance)".to_string())
        })?;
        Self::apply(decision, "variance_filter", df)
    }

    pub fn transform_variance_filtering(&self, df: DataFrame) -> PreprocessingResult<DataFrame> {
        let (df, warnings) = self.plan_variance_filtering(df)?;
        diagnostics::emit(&warnings);
        Ok(df)
    }

    /// Drops one member of every non-protected numeric pair whose absolute correlation
    /// exceeds `threshold`, and returns the filtered frame.
    pub async fn fit_correlation_filtering(
        &mut self,
        df: &DataFrame,
        threshold: f64,
    ) -> PreprocessingResult<DataFrame> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(PreprocessingError::InvalidParameter(format!(
                "correlation threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        let names = self.candidates(df);
        let mut columns = frame::collect_numeric(df, &names).await?;
        let rows = columns.first().map_or(0, Vec::len);
        if let Some(picked) = sample_rows(rows, &self.correlation_settings) {
            tracing::debug!(rows, sampled = picked.len(), "sampling rows for correlation");
            columns = columns
                .into_iter()
                .map(|values| picked.iter().map(|&i| values[i]).collect())
                .collect();
        }

        let pairs = correlated_pairs(&columns, threshold, self.correlation_settings.chunk_size);
        let mut dropped: HashSet<String> = HashSet::new();
        let mut resolved = Vec::new();
        for (i, j, r) in pairs {
            let (a, b) = (&names[i], &names[j]);
            if dropped.contains(a) || dropped.contains(b) {
                continue;
            }
            let (kept, gone) = match drop_order(a, b) {
                Ordering::Greater => (b, a),
                _ => (a, b),
            };
            dropped.insert(gone.clone());
            resolved.push(CorrelatedPair {
                kept: kept.clone(),
                dropped: gone.clone(),
                correlation: r,
            });
        }
        let decision = Self::decision(df, &dropped);
        tracing::debug!(
            dropped = decision.dropped.len(),
            retained = decision.retained.len(),
            threshold,
            "fitted correlation filter"
        );
        self.correlation_threshold = Some(threshold);
        self.correlation = Some(decision);
        self.correlated_pairs = resolved;
        self.transform_correlation_filtering(df.clone())
    }

    pub fn plan_correlation_filtering(
        &self,
        df: DataFrame,
    ) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
        let decision = self.correlation.as_ref().ok_or_else(|| {
            PreprocessingError::FitNotCalled("VarianceCorrelationFilter (correlation)".to_string())
        })?;
        Self::apply(decision, "correlation_filter", df)
    }

    pub fn transform_correlation_filtering(&self, df: DataFrame) -> PreprocessingResult<DataFrame> {
        let (df, warnings) = self.plan_correlation_filtering(df)?;
        diagnostics::emit(&warnings);
        Ok(df)
    }

    /// Final retained column set (after both passes, when both were fitted).
    pub fn retained_columns(&self) -> Option<&[String]> {
        self.correlation
            .as_ref()
            .or(self.variance.as_ref())
            .map(|d| d.retained.as_slice())
    }

    /// Runs the variance pass with the default threshold, then the correlation pass.
    pub async fn fit(&mut self, df: &DataFrame) -> PreprocessingResult<()> {
        let filtered = self
            .fit_variance_filtering(df, self.default_variance_threshold)
            .await?;
        self.fit_correlation_filtering(&filtered, self.correlation_settings.threshold)
            .await?;
        Ok(())
    }

    pub fn plan(
        &self,
        df: DataFrame,
    ) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
        let (df, mut warnings) = self.plan_variance_filtering(df)?;
        let (df, more) = self.plan_correlation_filtering(df)?;
        warnings.extend(more);
        Ok((df, warnings))
    }

    pub fn is_fitted(&self) -> bool {
        self.variance.is_some() && self.correlation.is_some()
    }

    pub fn fit_warnings(&self) -> &[PreprocessingWarning] {
        &self.fit_warnings
    }

    fn inherent_is_stateful(&self) -> bool {
        true
    }
}

impl_transformer!(VarianceCorrelationFilter);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::PipelineSettings;

    #[test]
    fn test_protected_markers() {
        let settings = PipelineSettings::default();
        let filter = VarianceCorrelationFilter::new(
            settings.roles,
            settings.protected_markers,
            settings.variance_threshold,
            settings.correlation,
        );
        assert!(filter.is_protected("num_printed_pages_zscore"));
        assert!(filter.is_protected("entry_hour_quartile"));
        assert!(filter.is_protected("Entry_Time_ZScore"));
        assert!(!filter.is_protected("num_printed_pages_log"));
    }

    #[test]
    fn test_drop_order_prefers_shorter_names() {
        assert_eq!(drop_order("logins_per_day", "logins"), Ordering::Greater);
        assert_eq!(drop_order("abc", "abd"), Ordering::Less);
    }

    #[test]
    fn test_chunking_does_not_change_pairs() {
        let base: Vec<Option<f64>> = (0..20).map(|i| Some(i as f64)).collect();
        let noise: Vec<Option<f64>> = (0..20).map(|i| Some(((i * 7) % 5) as f64)).collect();
        let columns = vec![
            base.clone(),
            noise.clone(),
            base.iter().map(|v| v.map(|x| 2.0 * x + 1.0)).collect(),
            noise.iter().map(|v| v.map(|x| -x)).collect(),
            base.iter().map(|v| v.map(|x| x * x)).collect(),
        ];
        let whole = correlated_pairs(&columns, 0.95, 100);
        for chunk_size in 1..=4 {
            assert_eq!(correlated_pairs(&columns, 0.95, chunk_size), whole);
        }
        let ij: Vec<(usize, usize)> = whole.iter().map(|p| (p.0, p.1)).collect();
        assert!(ij.contains(&(0, 2)));
        assert!(ij.contains(&(1, 3)));
    }

    #[test]
    fn test_sampling_is_seeded() {
        let settings = CorrelationSettings {
            sample_threshold: 10,
            sample_size: 5,
            ..Default::default()
        };
        assert!(sample_rows(10, &settings).is_none());
        let a = sample_rows(100, &settings).unwrap();
        let b = sample_rows(100, &settings).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
    }
}
