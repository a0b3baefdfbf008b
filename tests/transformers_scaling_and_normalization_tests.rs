use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::prelude::*;

use approx::assert_relative_eq;
use insider_preprocessing::exceptions::{PreprocessingError, PreprocessingResult};
use insider_preprocessing::settings::{ColumnRoles, NormalizationMethod};
use insider_preprocessing::transformers::scaling_and_normalization::FeatureNormalizer;

/// Frame with an integer label and a Float64 feature "value".
async fn create_df(values: Vec<f64>) -> PreprocessingResult<DataFrame> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("is_malicious", DataType::Int64, false),
        Field::new("value", DataType::Float64, true),
    ]));
    let labels: ArrayRef = Arc::new(Int64Array::from(
        (0..values.len() as i64).map(|i| i % 2).collect::<Vec<_>>(),
    ));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![labels, Arc::new(Float64Array::from(values))],
    )?;
    let mem_table = MemTable::try_new(schema, vec![vec![batch]])?;
    let ctx = SessionContext::new_with_config(SessionConfig::new().with_target_partitions(1));
    ctx.register_table("t", Arc::new(mem_table))?;
    Ok(ctx.table("t").await?)
}

async fn values_of(df: DataFrame) -> PreprocessingResult<Vec<f64>> {
    let batches = df.collect().await?;
    let mut out = Vec::new();
    for batch in &batches {
        let array = batch
            .column(batch.schema().index_of("value")?)
            .as_any()
            .downcast_ref::<Float64Array>()
            .expect("Expected Float64Array");
        out.extend(array.iter().map(|v| v.unwrap_or(f64::NAN)));
    }
    Ok(out)
}

fn training() -> Vec<f64> {
    vec![1.0, 2.0, 3.0, 4.0, 10.0]
}

#[tokio::test]
async fn test_standard_scaling() -> PreprocessingResult<()> {
    let mut normalizer = FeatureNormalizer::new(NormalizationMethod::Standard, ColumnRoles::default());
    normalizer
        .fit_normalize_features(&create_df(training()).await?, "standard")
        .await?;
    assert_eq!(normalizer.columns, vec!["value"]);

    let out = normalizer.transform_normalize_features(create_df(vec![4.0, 14.0]).await?)?;
    let scaled = values_of(out).await?;
    assert_relative_eq!(scaled[0], 0.0);
    assert_relative_eq!(scaled[1], 10.0 / 10.0_f64.sqrt());
    Ok(())
}

#[tokio::test]
async fn test_minmax_scaling_is_not_clipped() -> PreprocessingResult<()> {
    let mut normalizer = FeatureNormalizer::new(NormalizationMethod::Standard, ColumnRoles::default());
    normalizer
        .fit_normalize_features(&create_df(training()).await?, "minmax")
        .await?;
    assert_eq!(normalizer.method, NormalizationMethod::MinMax);

    let out = normalizer.transform(create_df(vec![1.0, 10.0, 19.0]).await?)?;
    assert_eq!(values_of(out).await?, vec![0.0, 1.0, 2.0]);
    Ok(())
}

#[tokio::test]
async fn test_robust_scaling() -> PreprocessingResult<()> {
    let mut normalizer = FeatureNormalizer::new(NormalizationMethod::Robust, ColumnRoles::default());
    normalizer.fit(&create_df(training()).await?).await?;
    let params = normalizer.params["value"];
    assert_relative_eq!(params.center, 3.0);
    assert_relative_eq!(params.scale, 2.0);

    let out = normalizer.transform(create_df(vec![3.0, 7.0]).await?)?;
    assert_eq!(values_of(out).await?, vec![0.0, 2.0]);
    Ok(())
}

#[tokio::test]
async fn test_label_is_not_scaled() -> PreprocessingResult<()> {
    let mut normalizer = FeatureNormalizer::new(NormalizationMethod::Standard, ColumnRoles::default());
    normalizer.fit(&create_df(training()).await?).await?;
    assert!(!normalizer.params.contains_key("is_malicious"));

    let out = normalizer.transform(create_df(training()).await?)?;
    let batches = out.collect().await?;
    let labels = batches[0]
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("Expected Int64Array");
    assert_eq!(labels.values().to_vec(), vec![0, 1, 0, 1, 0]);
    Ok(())
}

#[tokio::test]
async fn test_unknown_method_is_configuration_error() -> PreprocessingResult<()> {
    let mut normalizer = FeatureNormalizer::new(NormalizationMethod::Standard, ColumnRoles::default());
    let err = normalizer
        .fit_normalize_features(&create_df(training()).await?, "quantile")
        .await
        .expect_err("Expected a configuration error");
    assert!(matches!(err, PreprocessingError::ConfigurationError(_)));
    assert!(!normalizer.is_fitted());
    Ok(())
}

#[tokio::test]
async fn test_transform_before_fit_fails() -> PreprocessingResult<()> {
    let normalizer = FeatureNormalizer::new(NormalizationMethod::Robust, ColumnRoles::default());
    let err = normalizer
        .transform_normalize_features(create_df(training()).await?)
        .expect_err("Expected a not-fitted error");
    assert!(err.is_not_fitted());
    Ok(())
}
