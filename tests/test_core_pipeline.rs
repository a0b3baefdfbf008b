use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::arrow::util::pretty::pretty_format_batches;
use datafusion::datasource::MemTable;
use datafusion::logical_expr::{ident, lit};
use datafusion::prelude::{DataFrame, SessionConfig, SessionContext};

use insider_preprocessing::diagnostics::PreprocessingWarning;
use insider_preprocessing::exceptions::{PreprocessingError, PreprocessingResult};
use insider_preprocessing::impl_transformer;
use insider_preprocessing::pipeline::{PreprocessingPipeline, Transformer};
use insider_preprocessing::settings::{NormalizationMethod, PipelineSettings};

const DEPARTMENTS: [&str; 4] = ["IT", "HR", "Ops", "Legal"];

/// Deterministic activity rows `start..end`.
fn activity_batch(start: i64, end: i64, departments: &[&str]) -> PreprocessingResult<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("employee_id", DataType::Int64, false),
        Field::new("is_malicious", DataType::Int64, false),
        Field::new("date", DataType::Utf8, true),
        Field::new("first_entry_time", DataType::Utf8, true),
        Field::new("department", DataType::Utf8, true),
        Field::new("country_name", DataType::Utf8, true),
        Field::new("is_contractor", DataType::Utf8, true),
        Field::new("num_print_commands", DataType::Float64, true),
        Field::new("total_printed_pages", DataType::Float64, true),
        Field::new("total_presence_minutes", DataType::Float64, true),
        Field::new("employee_seniority_years", DataType::Float64, true),
    ]));
    let rows: Vec<i64> = (start..end).collect();
    let day = |i: i64| i % 28 + 1;
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(rows.clone())),
        Arc::new(Int64Array::from(
            rows.iter().map(|i| (i % 5 == 0) as i64).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            rows.iter()
                .map(|i| Some(format!("2024-02-{:02} 00:00:00", day(*i))))
                .collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            rows.iter()
                .map(|i| {
                    (i % 9 != 4).then(|| {
                        format!("2024-02-{:02} {:02}:{:02}:00", day(*i), 5 + i % 6, (i * 7) % 60)
                    })
                })
                .collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            rows.iter()
                .map(|i| (i % 11 != 3).then(|| departments[(*i as usize) % departments.len()]))
                .collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            rows.iter()
                .map(|i| (i % 4 == 0).then_some("France"))
                .collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            rows.iter()
                .map(|i| Some(if i % 3 == 0 { "true" } else { "false" }))
                .collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            rows.iter()
                .map(|i| (i % 7 != 2).then(|| ((i * 13) % 17) as f64))
                .collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            rows.iter()
                .map(|i| Some(((i * 31) % 97) as f64 + if i % 23 == 0 { 900.0 } else { 0.0 }))
                .collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            rows.iter()
                .map(|i| (i % 13 != 6).then(|| 200.0 + ((i * 37) % 600) as f64))
                .collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            rows.iter()
                .map(|i| Some(((i * 5) % 21) as f64 * 0.5))
                .collect::<Vec<_>>(),
        )),
    ];
    Ok(RecordBatch::try_new(schema, columns)?)
}

async fn create_df(batch: RecordBatch) -> PreprocessingResult<DataFrame> {
    let mem_table = MemTable::try_new(batch.schema(), vec![vec![batch]])?;
    let ctx = SessionContext::new_with_config(SessionConfig::new().with_target_partitions(1));
    ctx.register_table("activity", Arc::new(mem_table))?;
    Ok(ctx.table("activity").await?)
}

async fn training_df() -> PreprocessingResult<DataFrame> {
    create_df(activity_batch(0, 120, &DEPARTMENTS)?).await
}

async fn held_out_df() -> PreprocessingResult<DataFrame> {
    create_df(activity_batch(120, 160, &DEPARTMENTS)?).await
}

async fn render(df: DataFrame) -> PreprocessingResult<String> {
    let batches = df.collect().await?;
    Ok(pretty_format_batches(&batches)?.to_string())
}

async fn fitted_pipeline() -> PreprocessingResult<PreprocessingPipeline> {
    let mut pipeline = PreprocessingPipeline::new(PipelineSettings::default());
    pipeline.fit(&training_df().await?).await?;
    Ok(pipeline)
}

#[tokio::test]
async fn test_output_is_numeric_and_row_aligned() -> PreprocessingResult<()> {
    let mut pipeline = PreprocessingPipeline::default();
    let train_out = pipeline.fit_transform(&training_df().await?).await?;
    assert!(pipeline.is_fitted());
    assert_eq!(train_out.clone().count().await?, 120);

    let out = pipeline.transform(held_out_df().await?)?;
    let schema = out.schema();
    for field in schema.fields() {
        assert!(
            field.data_type().is_numeric(),
            "column {} has type {}",
            field.name(),
            field.data_type()
        );
    }
    for dropped in ["department", "date", "first_entry_time", "country_name"] {
        assert!(!schema.has_column_with_unqualified_name(dropped));
    }
    assert!(schema.has_column_with_unqualified_name("employee_id"));
    assert!(schema.has_column_with_unqualified_name("is_malicious"));
    assert_eq!(out.count().await?, 40);

    let retained = pipeline.retained_columns().expect("Filter not fitted");
    assert!(retained.iter().any(|c| c.ends_with("_zscore")));
    Ok(())
}

#[tokio::test]
async fn test_labels_and_identifiers_pass_through() -> PreprocessingResult<()> {
    let pipeline = fitted_pipeline().await?;
    let out = pipeline.transform(held_out_df().await?)?;
    let batches = out
        .select(vec![ident("employee_id"), ident("is_malicious")])?
        .collect()
        .await?;
    let ids = batches[0]
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("Expected Int64Array");
    assert_eq!(ids.values().to_vec(), (120..160).collect::<Vec<i64>>());
    let labels = batches[0]
        .column(1)
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("Expected Int64Array");
    assert_eq!(labels.value(0), 1);
    assert_eq!(labels.value(1), 0);
    Ok(())
}

#[tokio::test]
async fn test_fit_is_deterministic() -> PreprocessingResult<()> {
    let first = fitted_pipeline().await?;
    let second = fitted_pipeline().await?;
    assert_eq!(first.to_json()?, second.to_json()?);
    assert_eq!(
        render(first.transform(held_out_df().await?)?).await?,
        render(second.transform(held_out_df().await?)?).await?
    );
    Ok(())
}

#[tokio::test]
async fn test_transform_is_idempotent_and_does_not_learn() -> PreprocessingResult<()> {
    let pipeline = fitted_pipeline().await?;
    let before = pipeline.to_json()?;

    let held_out = held_out_df().await?;
    let once = render(pipeline.transform(held_out.clone())?).await?;
    let twice = render(pipeline.transform(held_out)?).await?;
    assert_eq!(once, twice);
    assert_eq!(pipeline.to_json()?, before);
    Ok(())
}

#[tokio::test]
async fn test_held_out_rows_do_not_depend_on_each_other() -> PreprocessingResult<()> {
    let pipeline = fitted_pipeline().await?;

    let full = pipeline.transform(held_out_df().await?)?;
    let first_ten_of_full = render(full.limit(0, Some(10))?).await?;

    let head = create_df(activity_batch(120, 130, &DEPARTMENTS)?).await?;
    let head_alone = render(pipeline.transform(head)?).await?;
    assert_eq!(first_ten_of_full, head_alone);
    Ok(())
}

#[tokio::test]
async fn test_learned_state_ignores_held_out_data() -> PreprocessingResult<()> {
    let alone = fitted_pipeline().await?;

    // The held-out rows are in memory and registered in the same session while fitting.
    let ctx = SessionContext::new_with_config(SessionConfig::new().with_target_partitions(1));
    let train = activity_batch(0, 120, &DEPARTMENTS)?;
    let test = activity_batch(120, 160, &DEPARTMENTS)?;
    ctx.register_table(
        "train",
        Arc::new(MemTable::try_new(train.schema(), vec![vec![train]])?),
    )?;
    ctx.register_table(
        "test",
        Arc::new(MemTable::try_new(test.schema(), vec![vec![test]])?),
    )?;
    let mut together = PreprocessingPipeline::default();
    together.fit(&ctx.table("train").await?).await?;
    let transformed = together.transform(ctx.table("test").await?)?;
    assert_eq!(transformed.count().await?, 40);

    assert_eq!(alone.to_json()?, together.to_json()?);
    Ok(())
}

#[tokio::test]
async fn test_persisted_pipeline_transforms_identically() -> PreprocessingResult<()> {
    let pipeline = fitted_pipeline().await?;
    let expected = render(pipeline.transform(held_out_df().await?)?).await?;

    let restored = PreprocessingPipeline::from_json(&pipeline.to_json()?)?;
    assert!(restored.is_fitted());
    assert_eq!(
        render(restored.transform(held_out_df().await?)?).await?,
        expected
    );

    let path = std::env::temp_dir().join(format!(
        "insider_preprocessing_pipeline_{}.json",
        std::process::id()
    ));
    pipeline.save(&path)?;
    let loaded = PreprocessingPipeline::load(&path)?;
    std::fs::remove_file(&path)?;
    assert_eq!(
        render(loaded.transform(held_out_df().await?)?).await?,
        expected
    );
    Ok(())
}

#[tokio::test]
async fn test_schema_drift_is_tolerated() -> PreprocessingResult<()> {
    let pipeline = fitted_pipeline().await?;
    let drifted = held_out_df()
        .await?
        .drop_columns(&["total_printed_pages", "is_contractor"])?;
    let (out, warnings) = pipeline.transform_with_report(drifted)?;
    assert!(!warnings.is_empty());
    assert!(warnings.iter().all(PreprocessingWarning::is_schema_drift));
    assert!(warnings.iter().any(|w| w.column() == "total_printed_pages"));
    assert_eq!(out.count().await?, 40);
    Ok(())
}

#[tokio::test]
async fn test_unseen_categories_are_reported_not_raised() -> PreprocessingResult<()> {
    let pipeline = fitted_pipeline().await?;
    let other = create_df(activity_batch(120, 160, &["IT", "Finance"])?).await?;

    let unseen = pipeline.audit_unseen_categories(&other).await?;
    assert_eq!(unseen.len(), 1);
    match &unseen[0] {
        PreprocessingWarning::UnseenCategory {
            column, categories, ..
        } => {
            assert_eq!(column, "department");
            assert_eq!(categories, &vec!["Finance".to_string()]);
        }
        other => panic!("unexpected warning {other:?}"),
    }
    assert_eq!(pipeline.transform(other)?.count().await?, 40);
    Ok(())
}

#[tokio::test]
async fn test_transform_before_fit_fails() -> PreprocessingResult<()> {
    let pipeline = PreprocessingPipeline::default();
    let err = pipeline
        .transform(held_out_df().await?)
        .expect_err("Expected a not-fitted error");
    assert!(err.is_not_fitted());
    assert!(matches!(err, PreprocessingError::FitNotCalled(_)));
    Ok(())
}

#[tokio::test]
async fn test_empty_training_frame_is_rejected() -> PreprocessingResult<()> {
    let empty = create_df(activity_batch(0, 0, &DEPARTMENTS)?).await?;
    let err = PreprocessingPipeline::default()
        .fit(&empty)
        .await
        .expect_err("Expected an invalid parameter error");
    assert!(matches!(err, PreprocessingError::InvalidParameter(_)));
    Ok(())
}

#[tokio::test]
async fn test_settings_select_normalization() -> PreprocessingResult<()> {
    let settings = PipelineSettings::from_json(r#"{"normalization": "robust"}"#)?;
    assert_eq!(settings.normalization, NormalizationMethod::Robust);
    let mut pipeline = PreprocessingPipeline::try_new(settings)?;
    pipeline.fit(&training_df().await?).await?;
    assert_eq!(pipeline.normalizer.method, NormalizationMethod::Robust);

    let err = PipelineSettings::from_json(r#"{"normalization": "quantile"}"#)
        .expect_err("Expected a configuration error");
    assert!(matches!(err, PreprocessingError::ConfigurationError(_)));
    Ok(())
}

/// Adds one constant-free feature; used to check that the derivation step is pluggable.
struct PrintShare;

impl PrintShare {
    async fn fit(&mut self, _df: &DataFrame) -> PreprocessingResult<()> {
        Ok(())
    }

    fn plan(&self, df: DataFrame) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
        let df = df.with_column(
            "print_share",
            ident("num_print_commands") / lit(17.0),
        )?;
        Ok((df, Vec::new()))
    }

    fn is_fitted(&self) -> bool {
        true
    }

    fn inherent_is_stateful(&self) -> bool {
        false
    }
}

impl_transformer!(PrintShare);

#[tokio::test]
async fn test_custom_feature_creator() -> PreprocessingResult<()> {
    let creator = PrintShare;
    assert!(creator.is_fitted() && !creator.is_stateful());

    let mut pipeline = PreprocessingPipeline::default().with_feature_creator(Box::new(creator));
    pipeline.fit(&training_df().await?).await?;
    assert!(pipeline.synthesizer.profiles.contains_key("print_share"));
    assert!(!pipeline.synthesizer.profiles.contains_key("work_duration_hours"));
    Ok(())
}
