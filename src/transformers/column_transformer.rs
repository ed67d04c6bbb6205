//! # Column Transformer
//!
//! [`FeatureTransformer`] turns an engineered property frame into the model's numeric feature
//! matrix. It has two branches:
//!
//! - **numeric:** impute (mean by default) and optionally standardize;
//! - **categorical:** impute (mode, or `"UNKNOWN"`) and one-hot encode. Categories unseen at fit
//!   time encode to all zeros instead of failing.
//!
//! The output column order is part of the contract with model training and serving:
//! numeric features in configured order, then `"{feature}_{category}"` columns per categorical
//! feature (configured order, categories sorted lexicographically), then the target column when it
//! is configured and present. Every other input column is dropped.
//!
//! The transformer is fitted exactly once. Its frozen state is persisted as a single JSON artifact
//! tagged with [`ARTIFACT_FORMAT`] and [`ARTIFACT_VERSION`]; reloading it and calling `transform`
//! reproduces the original `fit_transform` output exactly.

use crate::exceptions::{HousingPrepError, HousingPrepResult};
use crate::io::{numeric_values, string_values, write_bytes_atomic};
use crate::pipeline::Transformer;
use crate::schema::validate;
use crate::stats;
use crate::transformers::feature_creation::{
    BATHROOMS, BEDROOMS, BED_BATH_RATIO, HOUSE_AGE, PRICE_PER_SQFT, SQFT,
};
use crate::transformers::imputation::{categorical_fill, coalesce_expr, ImputeStrategy};
use arrow::datatypes::DataType;
use async_trait::async_trait;
use datafusion::logical_expr::{cast, ident, lit, Case as DFCase, Expr};
use datafusion::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Identifier written into every persisted transformer artifact.
pub const ARTIFACT_FORMAT: &str = "housing-prep/feature-transformer";

/// Encoding-scheme version of the persisted artifact.
pub const ARTIFACT_VERSION: u32 = 1;

/// Which columns go through which branch, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerConfig {
    pub numeric_features: Vec<String>,
    pub categorical_features: Vec<String>,
    #[serde(default = "default_numeric_strategy")]
    pub numeric_strategy: ImputeStrategy,
    #[serde(default)]
    pub scale_numeric: bool,
    /// Passed through unchanged (as `Float64`) after the features, when present.
    #[serde(default)]
    pub target: Option<String>,
}

fn default_numeric_strategy() -> ImputeStrategy {
    ImputeStrategy::Mean
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            numeric_features: [SQFT, BEDROOMS, BATHROOMS, HOUSE_AGE, PRICE_PER_SQFT, BED_BATH_RATIO]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            categorical_features: vec!["location".to_string(), "condition".to_string()],
            numeric_strategy: default_numeric_strategy(),
            scale_numeric: false,
            target: Some("price".to_string()),
        }
    }
}

impl TransformerConfig {
    fn check(&self) -> HousingPrepResult<()> {
        if self.numeric_features.is_empty() && self.categorical_features.is_empty() {
            return Err(HousingPrepError::InvalidParameter(
                "Transformer needs at least one numeric or categorical feature".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for name in self.numeric_features.iter().chain(&self.categorical_features) {
            if !seen.insert(name.as_str()) {
                return Err(HousingPrepError::InvalidParameter(format!(
                    "Feature '{}' is listed more than once",
                    name
                )));
            }
        }
        if let Some(target) = &self.target {
            if seen.contains(target.as_str()) {
                return Err(HousingPrepError::InvalidParameter(format!(
                    "Target '{}' cannot also be a feature",
                    target
                )));
            }
        }
        Ok(())
    }
}

/// Standardization parameters of one numeric feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaling {
    pub mean: f64,
    /// Population standard deviation; `1.0` for constant columns.
    pub scale: f64,
}

/// Frozen parameters of one numeric feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericParams {
    pub column: String,
    pub fill: f64,
    pub scaling: Option<Scaling>,
}

/// Frozen parameters of one categorical feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalParams {
    pub column: String,
    pub fill: String,
    /// Sorted categories seen at fit time (after imputation).
    pub vocabulary: Vec<String>,
}

/// Everything `transform` needs; computed once by `fit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedState {
    pub numeric: Vec<NumericParams>,
    pub categorical: Vec<CategoricalParams>,
}

impl FittedState {
    /// Output feature names in contract order (without the target).
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.numeric.iter().map(|p| p.column.clone()).collect();
        for params in &self.categorical {
            for category in &params.vocabulary {
                names.push(one_hot_name(&params.column, category));
            }
        }
        names
    }
}

/// Name of the one-hot column for `category` of `column`.
pub fn one_hot_name(column: &str, category: &str) -> String {
    format!("{}_{}", column, category)
}

#[derive(Serialize, Deserialize)]
struct TransformerArtifact {
    format: String,
    version: u32,
    config: TransformerConfig,
    state: FittedState,
}

/// Numeric imputation, optional scaling and one-hot encoding with frozen state.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTransformer {
    config: TransformerConfig,
    state: Option<FittedState>,
}

/// Builds an unfit transformer.
pub fn build_transformer(config: TransformerConfig) -> FeatureTransformer {
    FeatureTransformer::new(config)
}

/// Builds a transformer from `config`, fits it on `df` and transforms `df`.
pub async fn fit_transform(
    df: DataFrame,
    config: TransformerConfig,
) -> HousingPrepResult<(DataFrame, FeatureTransformer)> {
    let mut transformer = build_transformer(config);
    let transformed = Transformer::fit_transform(&mut transformer, df).await?;
    Ok((transformed, transformer))
}

impl FeatureTransformer {
    pub fn new(config: TransformerConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    /// Frozen state, `None` until fitted.
    pub fn state(&self) -> Option<&FittedState> {
        self.state.as_ref()
    }

    fn fitted(&self) -> HousingPrepResult<&FittedState> {
        self.state.as_ref().ok_or(HousingPrepError::FitNotCalled)
    }

    /// Output feature names in contract order (without the target).
    pub fn feature_names(&self) -> HousingPrepResult<Vec<String>> {
        Ok(self.fitted()?.feature_names())
    }

    /// Learns fill values, scaling parameters and vocabularies from `df`.
    pub async fn fit(&mut self, df: &DataFrame) -> HousingPrepResult<()> {
        if self.state.is_some() {
            return Err(HousingPrepError::AlreadyFitted);
        }
        self.config.check()?;
        let features: Vec<String> = self
            .config
            .numeric_features
            .iter()
            .chain(&self.config.categorical_features)
            .cloned()
            .collect();
        validate(df, &features)?;

        let mut numeric = Vec::with_capacity(self.config.numeric_features.len());
        for name in &self.config.numeric_features {
            let values = numeric_values(df, name).await?;
            let present: Vec<f64> = values.iter().flatten().copied().collect();
            let fill = self.config.numeric_strategy.numeric_fill(&present);
            let scaling = if self.config.scale_numeric {
                let imputed: Vec<f64> = values.iter().map(|v| v.unwrap_or(fill)).collect();
                let mean = stats::mean(&imputed).unwrap_or(0.0);
                let std = stats::std_dev(&imputed, mean).unwrap_or(0.0);
                Some(Scaling {
                    mean,
                    scale: if std > 0.0 { std } else { 1.0 },
                })
            } else {
                None
            };
            debug!("Numeric feature {}: fill={} scaling={:?}", name, fill, scaling);
            numeric.push(NumericParams {
                column: name.clone(),
                fill,
                scaling,
            });
        }

        let mut categorical = Vec::with_capacity(self.config.categorical_features.len());
        for name in &self.config.categorical_features {
            let values = string_values(df, name).await?;
            let present: Vec<String> = values.iter().flatten().cloned().collect();
            let fill = categorical_fill(&present);
            let mut vocabulary: BTreeSet<String> = present.iter().cloned().collect();
            if present.len() < values.len() {
                vocabulary.insert(fill.clone());
            }
            debug!("Categorical feature {}: fill={} vocabulary={:?}", name, fill, vocabulary);
            categorical.push(CategoricalParams {
                column: name.clone(),
                fill,
                vocabulary: vocabulary.into_iter().collect(),
            });
        }

        let state = FittedState {
            numeric,
            categorical,
        };
        info!(
            "Fitted feature transformer: {} output features",
            state.feature_names().len()
        );
        self.state = Some(state);
        Ok(())
    }

    /// Applies the frozen state to `df`. Fails with `FitNotCalled` on an unfit transformer.
    pub fn transform(&self, df: DataFrame) -> HousingPrepResult<DataFrame> {
        let state = self.fitted()?;
        let features: Vec<String> = state
            .numeric
            .iter()
            .map(|p| p.column.clone())
            .chain(state.categorical.iter().map(|p| p.column.clone()))
            .collect();
        validate(&df, &features)?;

        let mut exprs: Vec<Expr> = Vec::new();
        for params in &state.numeric {
            let filled = coalesce_expr(cast(ident(&params.column), DataType::Float64), lit(params.fill));
            let value = match &params.scaling {
                Some(scaling) => (filled - lit(scaling.mean)) / lit(scaling.scale),
                None => filled,
            };
            exprs.push(value.alias(&params.column));
        }
        for params in &state.categorical {
            let filled = coalesce_expr(cast(ident(&params.column), DataType::Utf8), lit(params.fill.clone()));
            for category in &params.vocabulary {
                let indicator = Expr::Case(DFCase {
                    expr: None,
                    when_then_expr: vec![(
                        Box::new(filled.clone().eq(lit(category.clone()))),
                        Box::new(lit(1.0_f64)),
                    )],
                    else_expr: Some(Box::new(lit(0.0_f64))),
                });
                exprs.push(indicator.alias(one_hot_name(&params.column, category)));
            }
        }
        if let Some(target) = &self.config.target {
            if df.schema().field_with_name(None, target).is_ok() {
                exprs.push(cast(ident(target), DataType::Float64).alias(target));
            }
        }
        df.select(exprs).map_err(HousingPrepError::from)
    }

    /// Serializes the fitted transformer into its JSON artifact.
    pub fn to_json(&self) -> HousingPrepResult<String> {
        let artifact = TransformerArtifact {
            format: ARTIFACT_FORMAT.to_string(),
            version: ARTIFACT_VERSION,
            config: self.config.clone(),
            state: self.fitted()?.clone(),
        };
        Ok(serde_json::to_string_pretty(&artifact)?)
    }

    /// Restores a fitted transformer from its JSON artifact.
    pub fn from_json(json: &str) -> HousingPrepResult<Self> {
        let artifact: TransformerArtifact = serde_json::from_str(json)?;
        if artifact.format != ARTIFACT_FORMAT || artifact.version != ARTIFACT_VERSION {
            return Err(HousingPrepError::IncompatibleArtifact {
                expected: ARTIFACT_FORMAT.to_string(),
                expected_version: ARTIFACT_VERSION,
                found: artifact.format,
                found_version: artifact.version,
            });
        }
        Ok(Self {
            config: artifact.config,
            state: Some(artifact.state),
        })
    }

    /// Writes the artifact to `path` atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> HousingPrepResult<()> {
        let json = self.to_json()?;
        write_bytes_atomic(json.as_bytes(), path.as_ref())?;
        info!("Saved feature transformer to {}", path.as_ref().display());
        Ok(())
    }

    /// Reads an artifact written by [`FeatureTransformer::save`].
    pub fn load(path: impl AsRef<Path>) -> HousingPrepResult<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }
}

#[async_trait]
impl Transformer for FeatureTransformer {
    async fn fit(&mut self, df: &DataFrame) -> HousingPrepResult<()> {
        FeatureTransformer::fit(self, df).await
    }

    fn transform(&self, df: DataFrame) -> HousingPrepResult<DataFrame> {
        FeatureTransformer::transform(self, df)
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn is_fitted(&self) -> bool {
        self.state.is_some()
    }
}
