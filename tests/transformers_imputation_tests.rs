use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::memory::MemTable;
use datafusion::prelude::*;

use housing_prep::exceptions::{ErrorKind, HousingPrepError, HousingPrepResult};
use housing_prep::io::{null_counts, numeric_values, string_values};
use housing_prep::pipeline::Transformer;
use housing_prep::schema::{ColumnKind, DatasetSchema};
use housing_prep::transformers::imputation::{
    impute, FillValue, ImputeStrategy, Imputer, UNKNOWN_CATEGORY,
};

/// Creates an in-memory DataFrame with three columns:
///   - "a": Float64 with one missing value.
///   - "b": Utf8 with one missing value.
///   - "n": Int64 with one missing value.
async fn create_dataframe() -> DataFrame {
    let schema = Arc::new(Schema::new(vec![
        Field::new("a", DataType::Float64, true),
        Field::new("b", DataType::Utf8, true),
        Field::new("n", DataType::Int64, true),
    ]));

    let a_array: ArrayRef = Arc::new(Float64Array::from(vec![
        Some(1.0),
        Some(2.0),
        None,
        Some(10.0),
    ]));
    let b_array: ArrayRef = Arc::new(StringArray::from(vec![
        Some("x"),
        None,
        Some("y"),
        Some("y"),
    ]));
    let n_array: ArrayRef = Arc::new(Int64Array::from(vec![Some(3), Some(5), Some(4), None]));

    let batch = RecordBatch::try_new(schema.clone(), vec![a_array, b_array, n_array]).unwrap();

    let mem_table = MemTable::try_new(schema, vec![vec![batch]]).unwrap();
    let ctx = SessionContext::new();
    ctx.register_table("t", Arc::new(mem_table)).unwrap();
    ctx.table("t").await.unwrap()
}

/// Two columns with no values at all, declared as numeric and categorical.
async fn create_all_missing_dataframe() -> DataFrame {
    let schema = Arc::new(Schema::new(vec![
        Field::new("sqft", DataType::Float64, true),
        Field::new("location", DataType::Utf8, true),
    ]));
    let sqft: ArrayRef = Arc::new(Float64Array::from(vec![None, None]));
    let location: ArrayRef = Arc::new(StringArray::from(vec![None::<&str>, None]));
    let batch = RecordBatch::try_new(schema.clone(), vec![sqft, location]).unwrap();
    let mem_table = MemTable::try_new(schema, vec![vec![batch]]).unwrap();
    let ctx = SessionContext::new();
    ctx.register_table("t", Arc::new(mem_table)).unwrap();
    ctx.table("t").await.unwrap()
}

#[tokio::test]
async fn test_impute_fills_median_and_mode() -> HousingPrepResult<()> {
    let df = create_dataframe().await;
    let resolved = DatasetSchema::default().resolve(&df).await?;
    assert_eq!(resolved.kind_of("a"), Some(ColumnKind::Numeric));
    assert_eq!(resolved.kind_of("b"), Some(ColumnKind::Categorical));

    let (filled, state) = impute(df, &resolved).await?;

    // Median of [1, 2, 10] is 2; the mode of [x, y, y] is y.
    assert_eq!(
        numeric_values(&filled, "a").await?,
        vec![Some(1.0), Some(2.0), Some(2.0), Some(10.0)]
    );
    assert_eq!(
        string_values(&filled, "b").await?,
        vec![
            Some("x".to_string()),
            Some("y".to_string()),
            Some("y".to_string()),
            Some("y".to_string())
        ]
    );
    // Integer columns are widened to Float64 on output.
    assert_eq!(
        numeric_values(&filled, "n").await?,
        vec![Some(3.0), Some(5.0), Some(4.0), Some(4.0)]
    );
    assert_eq!(
        filled.schema().field_with_name(None, "n").unwrap().data_type(),
        &DataType::Float64
    );

    assert_eq!(state.total_imputed(), 3);
    assert_eq!(state.imputed_counts().get("a"), Some(&1));
    assert_eq!(state.fill_for("b"), Some(&FillValue::Categorical("y".into())));
    Ok(())
}

#[tokio::test]
async fn test_impute_leaves_no_missing_values() -> HousingPrepResult<()> {
    let df = create_dataframe().await;
    let resolved = DatasetSchema::default().resolve(&df).await?;
    let (filled, _) = impute(df, &resolved).await?;
    for (column, nulls) in null_counts(&filled).await? {
        assert_eq!(nulls, 0, "column {} still has missing values", column);
    }
    Ok(())
}

#[tokio::test]
async fn test_all_missing_columns_use_fallbacks() -> HousingPrepResult<()> {
    let df = create_all_missing_dataframe().await;
    let schema = DatasetSchema::default().with_kind("sqft", ColumnKind::Numeric);
    let resolved = schema.resolve(&df).await?;
    // Without a declared kind an all-missing column is categorical.
    assert_eq!(resolved.kind_of("location"), Some(ColumnKind::Categorical));

    let (filled, state) = impute(df, &resolved).await?;
    assert_eq!(state.fill_for("sqft"), Some(&FillValue::Numeric(0.0)));
    assert_eq!(
        string_values(&filled, "location").await?,
        vec![Some(UNKNOWN_CATEGORY.to_string()), Some(UNKNOWN_CATEGORY.to_string())]
    );
    assert_eq!(numeric_values(&filled, "sqft").await?, vec![Some(0.0), Some(0.0)]);
    Ok(())
}

#[tokio::test]
async fn test_imputer_lifecycle() -> HousingPrepResult<()> {
    let df = create_dataframe().await;
    let mut imputer = Imputer::new(DatasetSchema::default()).with_strategy(ImputeStrategy::Mean);
    assert!(imputer.is_stateful());
    assert!(!imputer.is_fitted());

    let err = imputer.transform(df.clone()).unwrap_err();
    assert!(matches!(err, HousingPrepError::FitNotCalled));
    assert_eq!(err.kind(), ErrorKind::State);

    imputer.fit(&df).await?;
    assert!(imputer.is_fitted());
    // The mean of [1, 2, 10] is 13/3.
    let filled = imputer.transform(df.clone())?;
    assert_eq!(numeric_values(&filled, "a").await?[2], Some(13.0 / 3.0));

    assert!(matches!(
        imputer.fit(&df).await,
        Err(HousingPrepError::AlreadyFitted)
    ));
    Ok(())
}

#[tokio::test]
async fn test_missing_required_columns_are_all_reported() -> HousingPrepResult<()> {
    let df = create_dataframe().await;
    let schema = DatasetSchema::new(vec!["price".into(), "a".into(), "sqft".into()]);
    match schema.resolve(&df).await {
        Err(HousingPrepError::MissingColumns(missing)) => {
            assert_eq!(missing, vec!["price".to_string(), "sqft".to_string()]);
        }
        other => panic!("expected MissingColumns, got {:?}", other.map(|_| ())),
    }
    Ok(())
}
