use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::memory::MemTable;
use datafusion::prelude::*;
use std::sync::Arc;

use housing_prep::exceptions::{HousingPrepError, HousingPrepResult};
use housing_prep::io::numeric_values;
use housing_prep::pipeline::Transformer;
use housing_prep::transformers::outlier_handling::{
    apply_policy, OutlierBounds, OutlierHandler, OutlierPolicy,
};

/// Helper function to create a DataFrame with Float64 columns from `(name, values)` pairs.
async fn create_df(columns: Vec<(&str, Vec<Option<f64>>)>) -> DataFrame {
    let schema = Arc::new(Schema::new(
        columns
            .iter()
            .map(|(name, _)| Field::new(*name, DataType::Float64, true))
            .collect::<Vec<_>>(),
    ));
    let arrays: Vec<ArrayRef> = columns
        .into_iter()
        .map(|(_, values)| Arc::new(Float64Array::from(values)) as ArrayRef)
        .collect();
    let batch = RecordBatch::try_new(schema.clone(), arrays).unwrap();
    let mem_table = MemTable::try_new(schema, vec![vec![batch]]).unwrap();
    let ctx = SessionContext::new();
    ctx.register_table("t", Arc::new(mem_table)).unwrap();
    ctx.table("t").await.unwrap()
}

fn values(v: &[f64]) -> Vec<Option<f64>> {
    v.iter().copied().map(Some).collect()
}

#[tokio::test]
async fn test_filter_removes_extreme_row() -> HousingPrepResult<()> {
    let df = create_df(vec![("value", values(&[1.0, 2.0, 3.0, 4.0, 5.0, 100.0]))]).await;
    let mut handler = OutlierHandler::new(OutlierPolicy::Filter, 1.5);
    handler.fit(&df).await?;
    let filtered = handler.transform(df)?;
    assert_eq!(
        numeric_values(&filtered, "value").await?,
        values(&[1.0, 2.0, 3.0, 4.0, 5.0])
    );
    Ok(())
}

#[tokio::test]
async fn test_clip_caps_extreme_value_at_upper_bound() -> HousingPrepResult<()> {
    let df = create_df(vec![("value", values(&[1.0, 2.0, 3.0, 4.0, 5.0, 100.0]))]).await;
    let mut handler = OutlierHandler::new(OutlierPolicy::Clip, 1.5);
    handler.fit(&df).await?;
    let bounds = handler.bounds.clone().unwrap();
    let value_bounds = bounds.get("value").unwrap();
    // Q1 = 2.25, Q3 = 4.75, IQR = 2.5
    assert_eq!(value_bounds.upper, 8.5);
    assert_eq!(value_bounds.lower, -1.5);
    assert_eq!(value_bounds.violations, 1);

    let clipped = handler.transform(df)?;
    let result = numeric_values(&clipped, "value").await?;
    assert_eq!(result, values(&[1.0, 2.0, 3.0, 4.0, 5.0, 8.5]));
    for v in result.into_iter().flatten() {
        assert!(value_bounds.contains(v));
    }
    Ok(())
}

#[tokio::test]
async fn test_none_policy_is_a_no_op() -> HousingPrepResult<()> {
    let df = create_df(vec![("value", values(&[1.0, 2.0, 3.0, 4.0, 5.0, 100.0]))]).await;
    let bounds = OutlierBounds::fit(&df, &["value".to_string()], 1.5).await?;
    let unchanged = apply_policy(df, &bounds, OutlierPolicy::None)?;
    assert_eq!(
        numeric_values(&unchanged, "value").await?,
        values(&[1.0, 2.0, 3.0, 4.0, 5.0, 100.0])
    );
    Ok(())
}

#[tokio::test]
async fn test_filter_drops_row_outside_any_bounded_column() -> HousingPrepResult<()> {
    let df = create_df(vec![
        ("a", values(&[1.0, 2.0, 3.0, 4.0, 5.0, 100.0])),
        ("b", values(&[100.0, 2.0, 3.0, 4.0, 5.0, 1.0])),
    ])
    .await;
    let mut handler = OutlierHandler::new(OutlierPolicy::Filter, 1.5);
    handler.fit(&df).await?;
    let filtered = handler.transform(df)?;
    assert_eq!(numeric_values(&filtered, "a").await?, values(&[2.0, 3.0, 4.0, 5.0]));
    assert_eq!(numeric_values(&filtered, "b").await?, values(&[2.0, 3.0, 4.0, 5.0]));
    Ok(())
}

#[tokio::test]
async fn test_handler_restricted_to_columns() -> HousingPrepResult<()> {
    let df = create_df(vec![
        ("a", values(&[1.0, 2.0, 3.0, 4.0, 5.0, 100.0])),
        ("b", values(&[100.0, 2.0, 3.0, 4.0, 5.0, 1.0])),
    ])
    .await;
    let mut handler =
        OutlierHandler::new(OutlierPolicy::Clip, 1.5).with_columns(vec!["a".to_string()]);
    handler.fit(&df).await?;
    let clipped = handler.transform(df)?;
    assert_eq!(numeric_values(&clipped, "a").await?[5], Some(8.5));
    assert_eq!(numeric_values(&clipped, "b").await?[0], Some(100.0));
    Ok(())
}

#[tokio::test]
async fn test_bounds_require_imputed_columns() -> HousingPrepResult<()> {
    let df = create_df(vec![("value", vec![Some(1.0), None, Some(3.0)])]).await;
    let result = OutlierBounds::fit(&df, &["value".to_string()], 1.5).await;
    assert!(matches!(result, Err(HousingPrepError::InvalidParameter(_))));
    Ok(())
}

#[tokio::test]
async fn test_transform_before_fit_fails() -> HousingPrepResult<()> {
    let df = create_df(vec![("value", values(&[1.0, 2.0]))]).await;
    let handler = OutlierHandler::new(OutlierPolicy::Filter, 1.5);
    assert!(matches!(
        handler.transform(df),
        Err(HousingPrepError::FitNotCalled)
    ));
    Ok(())
}
