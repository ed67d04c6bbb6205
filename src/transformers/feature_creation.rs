//! ## Derived property features
//!
//! This module adds the features computed from raw property columns:
//!
//! - **house_age:** `reference_year - year_built`.
//! - **price_per_sqft:** `target / sqft`, only when the target column is present (training time).
//! - **bed_bath_ratio:** `bedrooms / bathrooms`.
//!
//! Divisions are guarded: a zero denominator yields null (the missing-value sentinel), never
//! infinity, so the feature transformer can impute it later.
//! Derivation is not idempotent: running it on a frame that already has the derived columns
//! overwrites them.

use crate::exceptions::HousingPrepResult;
use crate::pipeline::Transformer;
use crate::schema::validate;
use arrow::datatypes::DataType;
use async_trait::async_trait;
use chrono::Datelike;
use datafusion::prelude::*;
use datafusion::scalar::ScalarValue;
use datafusion_expr::{cast, ident, lit, Case as DFCase, Expr};
use tracing::info;

pub const YEAR_BUILT: &str = "year_built";
pub const SQFT: &str = "sqft";
pub const BEDROOMS: &str = "bedrooms";
pub const BATHROOMS: &str = "bathrooms";

pub const HOUSE_AGE: &str = "house_age";
pub const PRICE_PER_SQFT: &str = "price_per_sqft";
pub const BED_BATH_RATIO: &str = "bed_bath_ratio";

/// Columns every raw property frame must carry for feature derivation.
pub fn source_columns() -> Vec<String> {
    [YEAR_BUILT, SQFT, BEDROOMS, BATHROOMS]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Current calendar year (UTC).
pub fn current_year() -> i32 {
    chrono::Utc::now().year()
}

/// Options controlling feature derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureOptions {
    /// Year `house_age` is measured against.
    pub reference_year: i32,
    /// Target column used for `price_per_sqft`.
    pub target: String,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        Self {
            reference_year: current_year(),
            target: "price".to_string(),
        }
    }
}

fn as_f64(name: &str) -> Expr {
    cast(ident(name), DataType::Float64)
}

/// `numerator / denominator`, null when the denominator is zero.
fn guarded_ratio(numerator: &str, denominator: &str) -> Expr {
    Expr::Case(DFCase {
        expr: None,
        when_then_expr: vec![(
            Box::new(as_f64(denominator).eq(lit(0.0))),
            Box::new(lit(ScalarValue::Float64(None))),
        )],
        else_expr: Some(Box::new(as_f64(numerator) / as_f64(denominator))),
    })
}

/// Adds `house_age`, `price_per_sqft` (when the target is present) and `bed_bath_ratio`.
pub fn derive_features(df: DataFrame, options: &FeatureOptions) -> HousingPrepResult<DataFrame> {
    validate(&df, &source_columns())?;
    let has_target = df.schema().field_with_name(None, &options.target).is_ok();

    let df = df.with_column(
        HOUSE_AGE,
        lit(options.reference_year as f64) - as_f64(YEAR_BUILT),
    )?;
    info!("Created '{}' feature (reference year {})", HOUSE_AGE, options.reference_year);

    let df = if has_target {
        let df = df.with_column(PRICE_PER_SQFT, guarded_ratio(&options.target, SQFT))?;
        info!("Created '{}' feature", PRICE_PER_SQFT);
        df
    } else {
        df
    };

    let df = df.with_column(BED_BATH_RATIO, guarded_ratio(BEDROOMS, BATHROOMS))?;
    info!("Created '{}' feature", BED_BATH_RATIO);
    Ok(df)
}

/// Stateless transformer wrapper around [`derive_features`].
pub struct FeatureDeriver {
    pub options: FeatureOptions,
}

impl FeatureDeriver {
    pub fn new(options: FeatureOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Transformer for FeatureDeriver {
    /// Validates that the source columns exist.
    async fn fit(&mut self, df: &DataFrame) -> HousingPrepResult<()> {
        validate(df, &source_columns())
    }

    fn transform(&self, df: DataFrame) -> HousingPrepResult<DataFrame> {
        derive_features(df, &self.options)
    }

    fn is_stateful(&self) -> bool {
        false
    }

    fn is_fitted(&self) -> bool {
        true
    }
}
