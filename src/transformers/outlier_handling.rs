//! ## Handling outliers with the IQR rule
//!
//! Outlier thresholds follow Tukey's boxplot rule: with `Q1`/`Q3` the first and third quartiles
//! (linear interpolation between closest ranks) and `m` the IQR multiplier,
//! values outside `[Q1 - m * (Q3 - Q1), Q3 + m * (Q3 - Q1)]` are outliers.
//!
//! Thresholds are always computed from imputed columns; [`OutlierBounds::fit`] refuses columns
//! that still contain missing values.
//!
//! Three policies are available (see [`OutlierPolicy`]):
//!
//! - **filter:** drop any row where any bounded column lies outside its bounds.
//! - **clip:** cap out-of-bounds values at the nearest bound; the row count is unchanged.
//! - **none:** leave the data unchanged.
//!
//! [`OutlierHandler`] wraps bounds and policy behind the [`Transformer`] trait.
//! Errors are returned as `HousingPrepError` and results are wrapped in `HousingPrepResult`.

use crate::exceptions::{HousingPrepError, HousingPrepResult};
use crate::io::numeric_values;
use crate::pipeline::Transformer;
use crate::schema::validate;
use crate::stats;
use arrow::datatypes::DataType;
use async_trait::async_trait;
use datafusion::logical_expr::{cast, ident, lit, Case as DFCase, Expr};
use datafusion::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Default whisker width multiplier.
pub const DEFAULT_IQR_MULTIPLIER: f64 = 1.5;

/// Strategy for handling values outside the IQR bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierPolicy {
    /// Remove rows outside the bounds.
    #[default]
    Filter,
    /// Cap values at the bounds.
    Clip,
    /// Leave values unchanged.
    None,
}

impl FromStr for OutlierPolicy {
    type Err = HousingPrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filter" => Ok(OutlierPolicy::Filter),
            "clip" => Ok(OutlierPolicy::Clip),
            "none" => Ok(OutlierPolicy::None),
            _ => Err(HousingPrepError::UnsupportedPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for OutlierPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutlierPolicy::Filter => "filter",
            OutlierPolicy::Clip => "clip",
            OutlierPolicy::None => "none",
        };
        f.write_str(name)
    }
}

fn check_multiplier(multiplier: f64) -> HousingPrepResult<()> {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return Err(HousingPrepError::InvalidParameter(format!(
            "IQR multiplier {} must be a finite number greater than 0",
            multiplier
        )));
    }
    Ok(())
}

/// Computes `(lower, upper)` outlier bounds for `values` with the given IQR multiplier.
pub fn iqr_bounds(values: &[f64], multiplier: f64) -> HousingPrepResult<(f64, f64)> {
    check_multiplier(multiplier)?;
    let (q1, q3) = stats::quartiles(values).ok_or_else(|| {
        HousingPrepError::InvalidParameter("Cannot compute IQR bounds of an empty column".into())
    })?;
    let iqr = q3 - q1;
    Ok((q1 - multiplier * iqr, q3 + multiplier * iqr))
}

/// Bounds of one column and how many reference values fell outside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnBounds {
    pub column: String,
    pub lower: f64,
    pub upper: f64,
    pub violations: usize,
}

impl ColumnBounds {
    /// Returns true if `value` lies within `[lower, upper]`.
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Frozen per-column outlier bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierBounds {
    pub multiplier: f64,
    pub columns: Vec<ColumnBounds>,
}

impl OutlierBounds {
    /// Computes bounds for each of `columns`.
    ///
    /// Every column must exist and must not contain missing values.
    pub async fn fit(df: &DataFrame, columns: &[String], multiplier: f64) -> HousingPrepResult<Self> {
        check_multiplier(multiplier)?;
        validate(df, columns)?;
        let mut bounds = Vec::with_capacity(columns.len());
        for name in columns {
            let values = numeric_values(df, name).await?;
            let present: Vec<f64> = values.iter().flatten().copied().collect();
            if present.len() != values.len() {
                return Err(HousingPrepError::InvalidParameter(format!(
                    "Column '{}' still has {} missing values; impute before computing outlier bounds",
                    name,
                    values.len() - present.len()
                )));
            }
            if present.is_empty() {
                debug!("Column '{}' is empty; no outlier bounds", name);
                continue;
            }
            let (lower, upper) = iqr_bounds(&present, multiplier)?;
            let mut column = ColumnBounds {
                column: name.clone(),
                lower,
                upper,
                violations: 0,
            };
            column.violations = present.iter().filter(|v| !column.contains(**v)).count();
            debug!(
                "Outlier bounds for {}: {:.3}..{:.3} ({} outside)",
                name, lower, upper, column.violations
            );
            bounds.push(column);
        }
        Ok(Self {
            multiplier,
            columns: bounds,
        })
    }

    /// Bounds of `column`, if computed.
    pub fn get(&self, column: &str) -> Option<&ColumnBounds> {
        self.columns.iter().find(|b| b.column == column)
    }

    /// Out-of-bounds value count per column in the reference dataset.
    pub fn violation_counts(&self) -> BTreeMap<String, usize> {
        self.columns
            .iter()
            .map(|b| (b.column.clone(), b.violations))
            .collect()
    }
}

/// Helper function to build a CASE expression for capping values:
/// `CASE WHEN col < lower THEN lower WHEN col > upper THEN upper ELSE col END`.
fn cap_expr_for(col_name: &str, lower: f64, upper: f64) -> Expr {
    let base = cast(ident(col_name), DataType::Float64);
    Expr::Case(DFCase {
        expr: None,
        when_then_expr: vec![
            (Box::new(base.clone().lt(lit(lower))), Box::new(lit(lower))),
            (Box::new(base.clone().gt(lit(upper))), Box::new(lit(upper))),
        ],
        else_expr: Some(Box::new(base)),
    })
}

/// Applies `policy` to every bounded column of `df`.
pub fn apply_policy(
    df: DataFrame,
    bounds: &OutlierBounds,
    policy: OutlierPolicy,
) -> HousingPrepResult<DataFrame> {
    let names: Vec<String> = bounds.columns.iter().map(|b| b.column.clone()).collect();
    validate(&df, &names)?;
    match policy {
        OutlierPolicy::None => Ok(df),
        OutlierPolicy::Clip => {
            for b in bounds.columns.iter().filter(|b| b.violations > 0) {
                info!(
                    "Clipping {} outliers in {} to bounds={:.3}..{:.3}",
                    b.violations, b.column, b.lower, b.upper
                );
            }
            let exprs: Vec<Expr> = df
                .schema()
                .fields()
                .iter()
                .map(|field| {
                    let name = field.name();
                    match bounds.get(name) {
                        Some(b) => cap_expr_for(name, b.lower, b.upper).alias(name),
                        None => ident(name),
                    }
                })
                .collect();
            df.select(exprs).map_err(HousingPrepError::from)
        }
        OutlierPolicy::Filter => {
            for b in bounds.columns.iter().filter(|b| b.violations > 0) {
                info!(
                    "Filtering {} outliers in {} (bounds={:.3}..{:.3})",
                    b.violations, b.column, b.lower, b.upper
                );
            }
            let predicate = bounds
                .columns
                .iter()
                .map(|b| {
                    let value = cast(ident(&b.column), DataType::Float64);
                    value
                        .clone()
                        .gt_eq(lit(b.lower))
                        .and(value.lt_eq(lit(b.upper)))
                })
                .reduce(|acc, expr| acc.and(expr));
            match predicate {
                Some(predicate) => df.filter(predicate).map_err(HousingPrepError::from),
                None => Ok(df),
            }
        }
    }
}

/// Computes IQR bounds on `fit` and applies the configured policy on `transform`.
pub struct OutlierHandler {
    /// Columns to bound; `None` selects every numeric column at fit time.
    pub columns: Option<Vec<String>>,
    pub multiplier: f64,
    pub policy: OutlierPolicy,
    pub bounds: Option<OutlierBounds>,
}

impl OutlierHandler {
    /// Create a new OutlierHandler for every numeric column.
    pub fn new(policy: OutlierPolicy, multiplier: f64) -> Self {
        Self {
            columns: None,
            multiplier,
            policy,
            bounds: None,
        }
    }

    /// Restrict the handler to the given columns.
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }
}

/// Names of the numeric-typed columns of `df`, in order.
pub fn numeric_columns(df: &DataFrame) -> Vec<String> {
    df.schema()
        .fields()
        .iter()
        .filter(|f| f.data_type().is_numeric())
        .map(|f| f.name().to_string())
        .collect()
}

#[async_trait]
impl Transformer for OutlierHandler {
    async fn fit(&mut self, df: &DataFrame) -> HousingPrepResult<()> {
        if self.bounds.is_some() {
            return Err(HousingPrepError::AlreadyFitted);
        }
        let columns = match &self.columns {
            Some(columns) => columns.clone(),
            None => numeric_columns(df),
        };
        self.bounds = Some(OutlierBounds::fit(df, &columns, self.multiplier).await?);
        Ok(())
    }

    fn transform(&self, df: DataFrame) -> HousingPrepResult<DataFrame> {
        let bounds = self.bounds.as_ref().ok_or(HousingPrepError::FitNotCalled)?;
        apply_policy(df, bounds, self.policy)
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn is_fitted(&self) -> bool {
        self.bounds.is_some()
    }
}
