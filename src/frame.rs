//! Helpers shared by the transformers: column expressions, type predicates and the
//! queries that materialize a column for fitting.

use crate::exceptions::{PreprocessingError, PreprocessingResult};
use datafusion::arrow::array::{Array, AsArray, RecordBatch};
use datafusion::arrow::datatypes::{DataType, Float64Type, Int64Type};
use datafusion::functions_aggregate::expr_fn::count;
use datafusion::logical_expr::{cast, ident, lit, Expr};
use datafusion::prelude::DataFrame;
use futures::StreamExt;
use std::collections::BTreeMap;

/// Unqualified column reference. Derived names may contain dots or spaces, so they are
/// never parsed as `relation.column`.
pub(crate) fn column(name: &str) -> Expr {
    ident(name)
}

/// `(name, type)` of every column, in frame order.
pub(crate) fn fields(df: &DataFrame) -> Vec<(String, DataType)> {
    df.schema()
        .fields()
        .iter()
        .map(|f| (f.name().clone(), f.data_type().clone()))
        .collect()
}

pub(crate) fn has_column(df: &DataFrame, name: &str) -> bool {
    df.schema().fields().iter().any(|f| f.name() == name)
}

pub(crate) fn data_type(df: &DataFrame, name: &str) -> Option<DataType> {
    df.schema()
        .fields()
        .iter()
        .find(|f| f.name() == name)
        .map(|f| f.data_type().clone())
}

pub(crate) fn is_numeric_type(dt: &DataType) -> bool {
    dt.is_numeric()
}

pub(crate) fn is_text_type(dt: &DataType) -> bool {
    match dt {
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => true,
        DataType::Dictionary(_, value) => is_text_type(value),
        _ => false,
    }
}

pub(crate) fn is_temporal_type(dt: &DataType) -> bool {
    dt.is_temporal()
}

/// One expression per column, unchanged.
pub(crate) fn passthrough(df: &DataFrame) -> Vec<Expr> {
    df.schema()
        .fields()
        .iter()
        .map(|f| column(f.name()))
        .collect()
}

async fn for_each_batch<F>(df: DataFrame, mut f: F) -> PreprocessingResult<()>
where
    F: FnMut(&RecordBatch) -> PreprocessingResult<()>,
{
    let mut stream = df.execute_stream().await?;
    while let Some(batch) = stream.next().await {
        f(&batch?)?;
    }
    Ok(())
}

fn plan_error(msg: String) -> PreprocessingError {
    PreprocessingError::DataFusionError(datafusion::error::DataFusionError::Plan(msg))
}

/// Materializes the given columns as `f64`. NaN is treated as missing.
pub(crate) async fn collect_numeric(
    df: &DataFrame,
    names: &[String],
) -> PreprocessingResult<Vec<Vec<Option<f64>>>> {
    let mut out = vec![Vec::new(); names.len()];
    if names.is_empty() {
        return Ok(out);
    }
    let exprs: Vec<Expr> = names
        .iter()
        .map(|n| cast(column(n), DataType::Float64).alias(n))
        .collect();
    let projected = df.clone().select(exprs)?;
    for_each_batch(projected, |batch| {
        for (i, values) in out.iter_mut().enumerate() {
            let array = batch
                .column(i)
                .as_primitive_opt::<Float64Type>()
                .ok_or_else(|| plan_error(format!("Expected Float64 array for column {}", names[i])))?;
            values.extend(array.iter().map(|v| v.filter(|x| !x.is_nan())));
        }
        Ok(())
    })
    .await?;
    Ok(out)
}

/// Occurrences of each distinct value of a column (rendered as text), plus missing ones.
#[derive(Debug, Clone, Default)]
pub(crate) struct ValueCounts {
    pub counts: BTreeMap<String, i64>,
    pub nulls: i64,
}

impl ValueCounts {
    /// Most frequent value; ties go to the smallest value.
    pub fn mode(&self) -> Option<&str> {
        let mut best: Option<(&str, i64)> = None;
        for (value, &n) in &self.counts {
            if best.map_or(true, |(_, b)| n > b) {
                best = Some((value.as_str(), n));
            }
        }
        best.map(|(v, _)| v)
    }
}

pub(crate) async fn value_counts(df: &DataFrame, name: &str) -> PreprocessingResult<ValueCounts> {
    let grouped = df.clone().aggregate(
        vec![cast(column(name), DataType::Utf8).alias("value")],
        vec![count(lit(1)).alias("cnt")],
    )?;
    let mut result = ValueCounts::default();
    for_each_batch(grouped, |batch| {
        let values = batch
            .column(0)
            .as_string_opt::<i32>()
            .ok_or_else(|| plan_error(format!("Expected Utf8 array for column {}", name)))?;
        let counts = batch
            .column(1)
            .as_primitive_opt::<Int64Type>()
            .ok_or_else(|| plan_error("Expected Int64 array".to_string()))?;
        for i in 0..batch.num_rows() {
            if values.is_null(i) {
                result.nulls += counts.value(i);
            } else {
                *result.counts.entry(values.value(i).to_string()).or_insert(0) += counts.value(i);
            }
        }
        Ok(())
    })
    .await?;
    Ok(result)
}

/// Row count and, per requested column, the number of non-missing values.
pub(crate) async fn non_null_counts(
    df: &DataFrame,
    names: &[String],
) -> PreprocessingResult<(i64, Vec<i64>)> {
    let mut aggregates = vec![count(lit(1)).alias("__rows")];
    aggregates.extend(
        names
            .iter()
            .enumerate()
            .map(|(i, n)| count(column(n)).alias(format!("__non_null_{}", i))),
    );
    let agg = df.clone().aggregate(vec![], aggregates)?;
    let mut rows = 0;
    let mut non_null = vec![0; names.len()];
    for_each_batch(agg, |batch| {
        if batch.num_rows() == 0 {
            return Ok(());
        }
        for i in 0..batch.num_columns() {
            let array = batch
                .column(i)
                .as_primitive_opt::<Int64Type>()
                .ok_or_else(|| plan_error("Expected Int64 count".to_string()))?;
            if i == 0 {
                rows += array.value(0);
            } else {
                non_null[i - 1] += array.value(0);
            }
        }
        Ok(())
    })
    .await?;
    Ok((rows, non_null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_prefers_smallest_on_tie() {
        let mut vc = ValueCounts::default();
        vc.counts.insert("HR".into(), 3);
        vc.counts.insert("IT".into(), 5);
        vc.counts.insert("Ops".into(), 5);
        assert_eq!(vc.mode(), Some("IT"));
        assert_eq!(ValueCounts::default().mode(), None);
    }

    #[test]
    fn test_type_predicates() {
        assert!(is_numeric_type(&DataType::Int32));
        assert!(is_numeric_type(&DataType::Float64));
        assert!(!is_numeric_type(&DataType::Boolean));
        assert!(is_text_type(&DataType::LargeUtf8));
        assert!(is_text_type(&DataType::Dictionary(
            Box::new(DataType::Int32),
            Box::new(DataType::Utf8)
        )));
        assert!(is_temporal_type(&DataType::Date32));
    }
}
