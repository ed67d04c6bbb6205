use arrow::array::{ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::prelude::*;
use std::sync::Arc;

use housing_prep::exceptions::{HousingPrepError, HousingPrepResult};
use housing_prep::io::numeric_values;
use housing_prep::pipeline::Transformer;
use housing_prep::transformers::feature_creation::{
    derive_features, FeatureDeriver, FeatureOptions, BED_BATH_RATIO, HOUSE_AGE, PRICE_PER_SQFT,
};

/// Create a DataFrame of two properties; the second has zero bathrooms and zero sqft.
async fn create_property_dataframe(with_price: bool) -> DataFrame {
    let mut fields = vec![
        Field::new("year_built", DataType::Int64, false),
        Field::new("sqft", DataType::Float64, false),
        Field::new("bedrooms", DataType::Int64, false),
        Field::new("bathrooms", DataType::Float64, false),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(vec![2000, 1990])),
        Arc::new(Float64Array::from(vec![1000.0, 0.0])),
        Arc::new(Int64Array::from(vec![3, 2])),
        Arc::new(Float64Array::from(vec![2.0, 0.0])),
    ];
    if with_price {
        fields.push(Field::new("price", DataType::Float64, false));
        columns.push(Arc::new(Float64Array::from(vec![200_000.0, 100_000.0])));
    }
    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();
    let mem_table = MemTable::try_new(schema, vec![vec![batch]]).unwrap();
    let ctx = SessionContext::new();
    ctx.register_table("houses", Arc::new(mem_table)).unwrap();
    ctx.table("houses").await.unwrap()
}

fn options() -> FeatureOptions {
    FeatureOptions {
        reference_year: 2024,
        target: "price".to_string(),
    }
}

#[tokio::test]
async fn test_derived_features() -> HousingPrepResult<()> {
    let df = create_property_dataframe(true).await;
    let derived = derive_features(df, &options())?;

    assert_eq!(
        numeric_values(&derived, HOUSE_AGE).await?,
        vec![Some(24.0), Some(34.0)]
    );
    assert_eq!(
        numeric_values(&derived, PRICE_PER_SQFT).await?,
        vec![Some(200.0), None]
    );
    Ok(())
}

#[tokio::test]
async fn test_zero_bathrooms_yield_null_ratio() -> HousingPrepResult<()> {
    let df = create_property_dataframe(false).await;
    let derived = derive_features(df, &options())?;
    let ratio = numeric_values(&derived, BED_BATH_RATIO).await?;
    assert_eq!(ratio, vec![Some(1.5), None]);
    assert!(ratio.iter().flatten().all(|v| v.is_finite()));
    Ok(())
}

#[tokio::test]
async fn test_price_per_sqft_needs_target() -> HousingPrepResult<()> {
    let df = create_property_dataframe(false).await;
    let derived = derive_features(df, &options())?;
    assert!(derived.schema().field_with_name(None, PRICE_PER_SQFT).is_err());
    assert!(derived.schema().field_with_name(None, HOUSE_AGE).is_ok());
    Ok(())
}

#[tokio::test]
async fn test_derivation_overwrites_existing_columns() -> HousingPrepResult<()> {
    let df = create_property_dataframe(true).await;
    let once = derive_features(df, &options())?;
    let later = FeatureOptions {
        reference_year: 2030,
        ..options()
    };
    let twice = derive_features(once, &later)?;
    assert_eq!(
        numeric_values(&twice, HOUSE_AGE).await?,
        vec![Some(30.0), Some(40.0)]
    );
    let names: Vec<String> = twice
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().to_string())
        .collect();
    assert_eq!(names.iter().filter(|n| *n == HOUSE_AGE).count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_source_columns() -> HousingPrepResult<()> {
    let df = create_property_dataframe(false).await;
    let df = df.drop_columns(&["bathrooms", "sqft"])?;
    match derive_features(df, &options()) {
        Err(HousingPrepError::MissingColumns(missing)) => {
            assert_eq!(missing, vec!["sqft".to_string(), "bathrooms".to_string()]);
        }
        other => panic!("expected MissingColumns, got {:?}", other.map(|_| ())),
    }
    Ok(())
}

#[tokio::test]
async fn test_deriver_as_transformer() -> HousingPrepResult<()> {
    let mut deriver = FeatureDeriver::new(options());
    assert!(!deriver.is_stateful());
    assert!(deriver.is_fitted());

    let derived = deriver.fit_transform(create_property_dataframe(true).await).await?;
    assert_eq!(
        numeric_values(&derived, BED_BATH_RATIO).await?,
        vec![Some(1.5), None]
    );

    let incomplete = create_property_dataframe(false).await.drop_columns(&["year_built"])?;
    assert!(matches!(
        deriver.fit(&incomplete).await,
        Err(HousingPrepError::MissingColumns(_))
    ));
    Ok(())
}
