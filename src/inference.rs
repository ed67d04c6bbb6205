//! ## Inference helper
//!
//! [`Predictor`] joins a loaded [`FeatureTransformer`] and a [`ModelArtifact`] to price raw
//! property records. It runs the same derivation and transformation as training time, so the
//! feature matrix fed to the model always follows the transformer's column contract.
//!
//! The target is absent at inference time, so `price_per_sqft` cannot be derived; it is passed to
//! the transformer as missing and receives the fill value learned during fit.
//!
//! Each prediction carries a fixed ±10 % band around the point estimate and a UTC timestamp.

use crate::exceptions::{HousingPrepError, HousingPrepResult};
use crate::io::session;
use crate::models::{feature_matrix, ModelArtifact};
use crate::transformers::column_transformer::FeatureTransformer;
use crate::transformers::feature_creation::{current_year, derive_features, FeatureOptions, PRICE_PER_SQFT};
use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use datafusion::prelude::*;
use datafusion::scalar::ScalarValue;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Relative half-width of the reported confidence band.
pub const CONFIDENCE_BAND: f64 = 0.10;

/// Oldest accepted construction year.
pub const MIN_YEAR_BUILT: i32 = 1800;

/// One property to price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseRecord {
    pub sqft: f64,
    pub bedrooms: i64,
    pub bathrooms: f64,
    pub location: String,
    pub year_built: i32,
    pub condition: String,
}

impl HouseRecord {
    /// Checks the value ranges a serving layer would enforce.
    pub fn validate(&self) -> HousingPrepResult<()> {
        if !(self.sqft > 0.0) {
            return Err(HousingPrepError::InvalidParameter(format!(
                "sqft must be > 0, got {}",
                self.sqft
            )));
        }
        if self.bedrooms < 1 {
            return Err(HousingPrepError::InvalidParameter(format!(
                "bedrooms must be >= 1, got {}",
                self.bedrooms
            )));
        }
        if !(self.bathrooms > 0.0) {
            return Err(HousingPrepError::InvalidParameter(format!(
                "bathrooms must be > 0, got {}",
                self.bathrooms
            )));
        }
        let max_year = current_year();
        if self.year_built < MIN_YEAR_BUILT || self.year_built > max_year {
            return Err(HousingPrepError::InvalidParameter(format!(
                "year_built must lie in {}..={}, got {}",
                MIN_YEAR_BUILT, max_year, self.year_built
            )));
        }
        Ok(())
    }
}

/// Builds a single-batch DataFrame from validated records.
pub fn records_to_frame(ctx: &SessionContext, records: &[HouseRecord]) -> HousingPrepResult<DataFrame> {
    for record in records {
        record.validate()?;
    }
    let schema = Arc::new(Schema::new(vec![
        Field::new("sqft", DataType::Float64, false),
        Field::new("bedrooms", DataType::Float64, false),
        Field::new("bathrooms", DataType::Float64, false),
        Field::new("location", DataType::Utf8, false),
        Field::new("year_built", DataType::Float64, false),
        Field::new("condition", DataType::Utf8, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.sqft))),
        Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.bedrooms as f64))),
        Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.bathrooms))),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.location.as_str()))),
        Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.year_built as f64))),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.condition.as_str()))),
    ];
    let batch = RecordBatch::try_new(schema, columns)?;
    Ok(ctx.read_batch(batch)?)
}

/// A priced property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub predicted_price: f64,
    pub confidence_interval: (f64, f64),
    pub prediction_time: DateTime<Utc>,
    pub model: String,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Fitted transformer plus trained model.
pub struct Predictor {
    transformer: Arc<FeatureTransformer>,
    model: ModelArtifact,
    options: FeatureOptions,
}

impl Predictor {
    /// Pairs a fitted transformer with a model trained on its output.
    ///
    /// The model's feature columns must match the transformer's output contract exactly.
    pub fn new(transformer: Arc<FeatureTransformer>, model: ModelArtifact) -> HousingPrepResult<Self> {
        let names = transformer.feature_names()?;
        if names != model.feature_columns {
            return Err(HousingPrepError::InvalidParameter(format!(
                "Model expects features {:?} but the transformer produces {:?}",
                model.feature_columns, names
            )));
        }
        let options = FeatureOptions {
            target: model.target.clone(),
            ..FeatureOptions::default()
        };
        Ok(Self {
            transformer,
            model,
            options,
        })
    }

    /// Loads both artifacts from disk.
    pub fn load(transformer_path: impl AsRef<Path>, model_path: impl AsRef<Path>) -> HousingPrepResult<Self> {
        let transformer = FeatureTransformer::load(transformer_path)?;
        let model = ModelArtifact::load(model_path)?;
        Self::new(Arc::new(transformer), model)
    }

    /// Overrides the reference year used for `house_age`.
    pub fn with_reference_year(mut self, year: i32) -> Self {
        self.options.reference_year = year;
        self
    }

    pub fn model(&self) -> &ModelArtifact {
        &self.model
    }

    /// Raw model outputs for every row of `df` (records before feature derivation).
    pub async fn predict_frame(&self, df: DataFrame) -> HousingPrepResult<Vec<f64>> {
        let df = derive_features(df, &self.options)?;
        let needs_ratio = self
            .transformer
            .config()
            .numeric_features
            .iter()
            .any(|f| f == PRICE_PER_SQFT);
        let df = if needs_ratio && df.schema().field_with_name(None, PRICE_PER_SQFT).is_err() {
            df.with_column(PRICE_PER_SQFT, lit(ScalarValue::Float64(None)))?
        } else {
            df
        };
        let transformed = self.transformer.transform(df)?;
        let x = feature_matrix(&transformed, &self.model.feature_columns).await?;
        debug!("Predicting {} rows with {}", x.nrows(), self.model.kind);
        Ok(self.model.predict(&x)?.to_vec())
    }

    /// Prices a single record.
    pub async fn predict(&self, record: &HouseRecord) -> HousingPrepResult<Prediction> {
        let mut predictions = self.predict_many(std::slice::from_ref(record)).await?;
        predictions.pop().ok_or_else(|| {
            HousingPrepError::ModelError("Model returned no prediction".to_string())
        })
    }

    /// Prices several records, preserving their order.
    pub async fn predict_many(&self, records: &[HouseRecord]) -> HousingPrepResult<Vec<Prediction>> {
        let df = records_to_frame(&session(), records)?;
        let raw = self.predict_frame(df).await?;
        let now = Utc::now();
        Ok(raw
            .into_iter()
            .map(|value| {
                let price = round2(value);
                Prediction {
                    predicted_price: price,
                    confidence_interval: (
                        round2(price * (1.0 - CONFIDENCE_BAND)),
                        round2(price * (1.0 + CONFIDENCE_BAND)),
                    ),
                    prediction_time: now,
                    model: self.model.kind.to_string(),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> HouseRecord {
        HouseRecord {
            sqft: 1500.0,
            bedrooms: 3,
            bathrooms: 2.0,
            location: "Leeds".into(),
            year_built: 1990,
            condition: "Good".into(),
        }
    }

    #[test]
    fn test_record_validation() {
        assert!(record().validate().is_ok());
        let zero_baths = HouseRecord {
            bathrooms: 0.0,
            ..record()
        };
        assert!(matches!(
            zero_baths.validate(),
            Err(HousingPrepError::InvalidParameter(_))
        ));
        let ancient = HouseRecord {
            year_built: 1700,
            ..record()
        };
        assert!(ancient.validate().is_err());
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(123.456), 123.46);
        assert_eq!(round2(90.0), 90.0);
    }
}
