//! ## Missing-value imputation
//!
//! This module implements the cleaner: every column of a validated dataset gets a fill value
//! computed once from a reference DataFrame and reused thereafter.
//!
//! - **Numeric columns** are filled with the median of the non-missing values (or the mean, for
//!   callers that select [`ImputeStrategy::Mean`]). A column without any value falls back to `0.0`.
//! - **Categorical columns** are filled with the mode. Ties go to the value encountered first in
//!   row order. A column without any value is filled with the literal `"UNKNOWN"`.
//!
//! The computed [`ImputationState`] also records how many cells were imputed per column.
//! [`Imputer`] wraps the state behind the [`Transformer`] trait.
//! Errors are returned as `HousingPrepError` and results are wrapped in `HousingPrepResult`.

use crate::exceptions::{HousingPrepError, HousingPrepResult};
use crate::io::{numeric_values, string_values};
use crate::pipeline::Transformer;
use crate::schema::{validate, ColumnKind, DatasetSchema, ResolvedSchema};
use crate::stats;
use arrow::datatypes::DataType;
use async_trait::async_trait;
use datafusion::logical_expr::{cast, ident, lit, not, Case as DFCase, Expr};
use datafusion::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Fill value for a categorical column that has no value at all.
pub const UNKNOWN_CATEGORY: &str = "UNKNOWN";

/// Fill value for a numeric column that has no value at all.
pub const ALL_MISSING_NUMERIC_FILL: f64 = 0.0;

/// Central tendency used to fill numeric columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImputeStrategy {
    Mean,
    #[default]
    Median,
}

impl ImputeStrategy {
    /// Fill value for a numeric column given its non-missing values.
    pub fn numeric_fill(&self, present: &[f64]) -> f64 {
        let value = match self {
            ImputeStrategy::Mean => stats::mean(present),
            ImputeStrategy::Median => stats::median(present),
        };
        value.unwrap_or(ALL_MISSING_NUMERIC_FILL)
    }
}

/// Fill value for a categorical column given its non-missing values in row order.
pub fn categorical_fill(present: &[String]) -> String {
    stats::mode(present.iter().map(String::as_str)).unwrap_or_else(|| UNKNOWN_CATEGORY.to_string())
}

/// A scalar used to replace missing cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum FillValue {
    Numeric(f64),
    Categorical(String),
}

/// Fill value and audit count for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnImputation {
    pub column: String,
    pub fill: FillValue,
    /// Number of missing cells found in the reference dataset.
    pub imputed: usize,
}

/// Builds `CASE WHEN <value> IS NOT NULL THEN <value> ELSE <fallback> END`.
pub(crate) fn coalesce_expr(value: Expr, fallback: Expr) -> Expr {
    Expr::Case(DFCase {
        expr: None,
        when_then_expr: vec![(Box::new(not(value.clone().is_null())), Box::new(value))],
        else_expr: Some(Box::new(fallback)),
    })
}

/// Expression replacing nulls of `name` with `fill`, normalizing the column type.
pub(crate) fn fill_expr(name: &str, fill: &FillValue) -> Expr {
    match fill {
        FillValue::Numeric(v) => coalesce_expr(cast(ident(name), DataType::Float64), lit(*v)),
        FillValue::Categorical(v) => coalesce_expr(cast(ident(name), DataType::Utf8), lit(v.clone())),
    }
}

/// Frozen per-column fill values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImputationState {
    pub columns: Vec<ColumnImputation>,
}

impl ImputationState {
    /// Computes fill values for every column of `schema` from `df`.
    ///
    /// Numeric columns use the median.
    pub async fn fit(df: &DataFrame, schema: &ResolvedSchema) -> HousingPrepResult<Self> {
        Self::fit_with(df, schema, ImputeStrategy::Median).await
    }

    /// Like [`ImputationState::fit`] with an explicit numeric strategy.
    pub async fn fit_with(
        df: &DataFrame,
        schema: &ResolvedSchema,
        strategy: ImputeStrategy,
    ) -> HousingPrepResult<Self> {
        let names: Vec<String> = schema.columns.iter().map(|(n, _)| n.clone()).collect();
        validate(df, &names)?;

        let mut columns = Vec::with_capacity(schema.columns.len());
        for (name, kind) in &schema.columns {
            let column = match kind {
                ColumnKind::Numeric => {
                    let values = numeric_values(df, name).await?;
                    let present: Vec<f64> = values.iter().flatten().copied().collect();
                    if present.is_empty() {
                        warn!("Column '{}' has no values; filling with {}", name, ALL_MISSING_NUMERIC_FILL);
                    }
                    ColumnImputation {
                        column: name.clone(),
                        fill: FillValue::Numeric(strategy.numeric_fill(&present)),
                        imputed: values.len() - present.len(),
                    }
                }
                ColumnKind::Categorical => {
                    let values = string_values(df, name).await?;
                    let present: Vec<String> = values.iter().flatten().cloned().collect();
                    ColumnImputation {
                        column: name.clone(),
                        fill: FillValue::Categorical(categorical_fill(&present)),
                        imputed: values.len() - present.len(),
                    }
                }
            };
            if column.imputed > 0 {
                info!(
                    "Filling {} NA in {} with {:?}",
                    column.imputed, column.column, column.fill
                );
            }
            columns.push(column);
        }
        Ok(Self { columns })
    }

    /// Fill value of `name`, if the column was fitted.
    pub fn fill_for(&self, name: &str) -> Option<&FillValue> {
        self.columns.iter().find(|c| c.column == name).map(|c| &c.fill)
    }

    /// Imputed-cell count per column.
    pub fn imputed_counts(&self) -> BTreeMap<String, usize> {
        self.columns
            .iter()
            .map(|c| (c.column.clone(), c.imputed))
            .collect()
    }

    /// Total number of imputed cells.
    pub fn total_imputed(&self) -> usize {
        self.columns.iter().map(|c| c.imputed).sum()
    }

    /// Returns a new DataFrame where missing values of every fitted column are replaced.
    ///
    /// Fitted numeric columns come out as `Float64`, categorical ones as `Utf8`; other columns
    /// are retained unchanged.
    pub fn apply(&self, df: DataFrame) -> HousingPrepResult<DataFrame> {
        let names: Vec<String> = self.columns.iter().map(|c| c.column.clone()).collect();
        validate(&df, &names)?;
        let exprs: Vec<Expr> = df
            .schema()
            .fields()
            .iter()
            .map(|field| {
                let name = field.name();
                match self.fill_for(name) {
                    Some(fill) => fill_expr(name, fill).alias(name),
                    None => ident(name),
                }
            })
            .collect();
        df.select(exprs).map_err(HousingPrepError::from)
    }
}

/// Imputes every column of `schema`, returning the filled DataFrame and the frozen state.
pub async fn impute(
    df: DataFrame,
    schema: &ResolvedSchema,
) -> HousingPrepResult<(DataFrame, ImputationState)> {
    let state = ImputationState::fit(&df, schema).await?;
    let filled = state.apply(df)?;
    Ok((filled, state))
}

/// Stateful imputer: resolves the schema and fits an [`ImputationState`] on `fit`.
pub struct Imputer {
    pub schema: DatasetSchema,
    pub strategy: ImputeStrategy,
    pub state: Option<ImputationState>,
}

impl Imputer {
    /// Create a new median/mode imputer for the given schema.
    pub fn new(schema: DatasetSchema) -> Self {
        Self {
            schema,
            strategy: ImputeStrategy::Median,
            state: None,
        }
    }

    /// Select the numeric strategy.
    pub fn with_strategy(mut self, strategy: ImputeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Rebuild a fitted imputer from a previously computed state.
    pub fn from_state(schema: DatasetSchema, state: ImputationState) -> Self {
        Self {
            schema,
            strategy: ImputeStrategy::Median,
            state: Some(state),
        }
    }
}

#[async_trait]
impl Transformer for Imputer {
    async fn fit(&mut self, df: &DataFrame) -> HousingPrepResult<()> {
        if self.state.is_some() {
            return Err(HousingPrepError::AlreadyFitted);
        }
        let resolved = self.schema.resolve(df).await?;
        self.state = Some(ImputationState::fit_with(df, &resolved, self.strategy).await?);
        Ok(())
    }

    fn transform(&self, df: DataFrame) -> HousingPrepResult<DataFrame> {
        self.state
            .as_ref()
            .ok_or(HousingPrepError::FitNotCalled)?
            .apply(df)
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn is_fitted(&self) -> bool {
        self.state.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_fill_strategies() {
        assert_eq!(ImputeStrategy::Median.numeric_fill(&[1.0, 2.0, 10.0]), 2.0);
        assert_eq!(ImputeStrategy::Mean.numeric_fill(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(ImputeStrategy::Median.numeric_fill(&[]), ALL_MISSING_NUMERIC_FILL);
    }

    #[test]
    fn test_categorical_fill() {
        let values = vec!["Leeds".to_string(), "York".to_string(), "York".to_string()];
        assert_eq!(categorical_fill(&values), "York");
        assert_eq!(categorical_fill(&[]), UNKNOWN_CATEGORY);
    }

    #[test]
    fn test_fill_value_serialization() {
        let json = serde_json::to_string(&FillValue::Categorical("Leeds".into())).unwrap();
        assert_eq!(json, r#"{"kind":"categorical","value":"Leeds"}"#);
    }
}
