use arrow::array::{Array, ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::memory::MemTable;
use datafusion::prelude::*;
use std::sync::Arc;

use approx::assert_relative_eq;
use insider_preprocessing::exceptions::PreprocessingResult;
use insider_preprocessing::settings::{ColumnRoles, OutlierMethod};
use insider_preprocessing::transformers::outlier_handling::OutlierCapper;

/// Helper function to create a DataFrame with an "employee_id" column and a Float64 "age"
/// column using the provided values.
async fn create_df(values: Vec<Option<f64>>) -> DataFrame {
    let schema = Arc::new(Schema::new(vec![
        Field::new("employee_id", DataType::Int64, false),
        Field::new("age", DataType::Float64, true),
    ]));
    let ids: ArrayRef = Arc::new(Int64Array::from(
        (0..values.len() as i64).map(|i| i * 1000).collect::<Vec<_>>(),
    ));
    let array: ArrayRef = Arc::new(Float64Array::from(values));
    let batch = RecordBatch::try_new(schema.clone(), vec![ids, array]).unwrap();
    let mem_table = MemTable::try_new(schema, vec![vec![batch]]).unwrap();
    let ctx = SessionContext::new_with_config(SessionConfig::new().with_target_partitions(1));
    ctx.register_table("t", Arc::new(mem_table)).unwrap();
    ctx.table("t").await.unwrap()
}

fn training_ages() -> Vec<Option<f64>> {
    [20.0, 21.0, 22.0, 23.0, 24.0, 1000.0].map(Some).to_vec()
}

async fn ages_of(df: DataFrame) -> PreprocessingResult<Vec<Option<f64>>> {
    let batches = df.collect().await?;
    let mut out = Vec::new();
    for batch in &batches {
        let array = batch
            .column(batch.schema().index_of("age")?)
            .as_any()
            .downcast_ref::<Float64Array>()
            .expect("Expected Float64Array");
        out.extend(array.iter());
    }
    Ok(out)
}

#[tokio::test]
async fn test_fit_computes_iqr_bounds() -> PreprocessingResult<()> {
    let df = create_df(training_ages()).await;
    let mut capper = OutlierCapper::new(OutlierMethod::Cap, ColumnRoles::default());
    let unchanged = capper.fit_handle_outliers(&df, OutlierMethod::Cap).await?;
    assert_eq!(unchanged.count().await?, 6);

    let bounds = capper.bounds.get("age").expect("Bounds not computed");
    assert_relative_eq!(bounds.q1, 21.25);
    assert_relative_eq!(bounds.q3, 23.75);
    assert_relative_eq!(bounds.lower, 17.5);
    assert_relative_eq!(bounds.upper, 27.5);
    // Identifiers are never capped.
    assert!(!capper.bounds.contains_key("employee_id"));
    Ok(())
}

#[tokio::test]
async fn test_cap_uses_training_bounds() -> PreprocessingResult<()> {
    let mut capper = OutlierCapper::new(OutlierMethod::Cap, ColumnRoles::default());
    capper
        .fit_handle_outliers(&create_df(training_ages()).await, OutlierMethod::Cap)
        .await?;

    let test_df = create_df(vec![Some(5000.0), Some(22.0), Some(3.0), None]).await;
    let ages = ages_of(capper.transform_handle_outliers(test_df)?).await?;
    assert_eq!(ages, vec![Some(27.5), Some(22.0), Some(17.5), None]);
    Ok(())
}

#[tokio::test]
async fn test_remove_nulls_values_without_dropping_rows() -> PreprocessingResult<()> {
    let mut capper = OutlierCapper::new(OutlierMethod::Cap, ColumnRoles::default());
    capper
        .fit_handle_outliers(&create_df(training_ages()).await, OutlierMethod::Remove)
        .await?;
    assert_eq!(capper.method, OutlierMethod::Remove);

    let test_df = create_df(vec![Some(5000.0), Some(22.0)]).await;
    let ages = ages_of(capper.transform_handle_outliers(test_df)?).await?;
    assert_eq!(ages, vec![None, Some(22.0)]);
    Ok(())
}

#[tokio::test]
async fn test_unfitted_capper_leaves_frame_unchanged() -> PreprocessingResult<()> {
    let capper = OutlierCapper::new(OutlierMethod::Cap, ColumnRoles::default());
    let ages = ages_of(capper.transform_handle_outliers(create_df(training_ages()).await)?).await?;
    assert_eq!(ages, training_ages());
    Ok(())
}

#[tokio::test]
async fn test_constant_column_reports_zero_iqr() -> PreprocessingResult<()> {
    let df = create_df(vec![Some(7.0); 5]).await;
    let mut capper = OutlierCapper::new(OutlierMethod::Cap, ColumnRoles::default());
    capper.fit(&df).await?;
    assert_eq!(capper.fit_warnings().len(), 1);

    let ages = ages_of(capper.transform(create_df(vec![Some(9.0)]).await)?).await?;
    assert_eq!(ages, vec![Some(7.0)]);
    Ok(())
}
