//! ## Estimators
//!
//! Regressors trained on the transformed feature matrix. The set of estimators is closed:
//! [`EstimatorKind`] is resolved from its name with `FromStr`, and an unknown name is an
//! `UnsupportedModel` error. Both estimators are linear, so a fitted one is captured completely by
//! a [`LinearModel`] (intercept plus one coefficient per feature column), which is what the
//! persisted [`ModelArtifact`] stores.

use crate::exceptions::{HousingPrepError, HousingPrepResult};
use crate::io::write_bytes_atomic;
use arrow::array::{Array, Float64Array};
use arrow::datatypes::DataType;
use chrono::{DateTime, Utc};
use datafusion::logical_expr::{cast, ident};
use datafusion::prelude::*;
use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Identifier written into every persisted model artifact.
pub const MODEL_ARTIFACT_FORMAT: &str = "housing-prep/linear-model";

/// Encoding-scheme version of the persisted model artifact.
pub const MODEL_ARTIFACT_VERSION: u32 = 1;

/// Default L2 penalty of [`RidgeRegressor`].
pub const DEFAULT_RIDGE_ALPHA: f64 = 1.0;

/// Supported estimators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstimatorKind {
    LinearRegression,
    Ridge,
}

impl FromStr for EstimatorKind {
    type Err = HousingPrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "LinearRegression" => Ok(EstimatorKind::LinearRegression),
            "Ridge" => Ok(EstimatorKind::Ridge),
            other => Err(HousingPrepError::UnsupportedModel(other.to_string())),
        }
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EstimatorKind::LinearRegression => "LinearRegression",
            EstimatorKind::Ridge => "Ridge",
        };
        f.write_str(name)
    }
}

/// Intercept and per-feature coefficients of a fitted linear estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearModel {
    pub fn predict(&self, x: &Array2<f64>) -> HousingPrepResult<Array1<f64>> {
        if x.ncols() != self.coefficients.len() {
            return Err(HousingPrepError::ModelError(format!(
                "Expected {} feature columns, got {}",
                self.coefficients.len(),
                x.ncols()
            )));
        }
        let weights = Array1::from(self.coefficients.clone());
        Ok(x.dot(&weights) + self.intercept)
    }
}

/// A regressor that can be fitted on a feature matrix and then predict.
pub trait Estimator: Send + Sync {
    fn kind(&self) -> EstimatorKind;

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> HousingPrepResult<()>;

    /// Fitted parameters; `None` before `fit`.
    fn linear_model(&self) -> Option<&LinearModel>;

    fn predict(&self, x: &Array2<f64>) -> HousingPrepResult<Array1<f64>> {
        self.linear_model()
            .ok_or(HousingPrepError::FitNotCalled)?
            .predict(x)
    }
}

fn check_training_data(x: &Array2<f64>, y: &Array1<f64>) -> HousingPrepResult<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(HousingPrepError::ModelError("Empty training matrix".to_string()));
    }
    if x.nrows() != y.len() {
        return Err(HousingPrepError::ModelError(format!(
            "Feature matrix has {} rows but target has {}",
            x.nrows(),
            y.len()
        )));
    }
    Ok(())
}

/// Ordinary least squares through `linfa-linear`.
pub struct LinearRegressor {
    fit_intercept: bool,
    model: Option<LinearModel>,
}

impl LinearRegressor {
    pub fn new(fit_intercept: bool) -> Self {
        Self {
            fit_intercept,
            model: None,
        }
    }
}

impl Estimator for LinearRegressor {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::LinearRegression
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> HousingPrepResult<()> {
        check_training_data(x, y)?;
        let dataset = Dataset::new(x.clone(), y.clone());
        let fitted = LinearRegression::new()
            .with_intercept(self.fit_intercept)
            .fit(&dataset)
            .map_err(|e| HousingPrepError::ModelError(format!("Linear regression training failed: {e}")))?;
        self.model = Some(LinearModel {
            intercept: fitted.intercept(),
            coefficients: fitted.params().to_vec(),
        });
        Ok(())
    }

    fn linear_model(&self) -> Option<&LinearModel> {
        self.model.as_ref()
    }
}

/// L2-penalized least squares solved through the normal equations on centered data:
/// `(XcᵀXc + αI) w = Xcᵀyc`, `b = ȳ - x̄·w`. The intercept is not penalized.
pub struct RidgeRegressor {
    alpha: f64,
    model: Option<LinearModel>,
}

impl RidgeRegressor {
    pub fn new(alpha: f64) -> HousingPrepResult<Self> {
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(HousingPrepError::InvalidParameter(format!(
                "Ridge alpha must be a finite number >= 0, got {}",
                alpha
            )));
        }
        Ok(Self { alpha, model: None })
    }
}

/// Solves `a · x = b` by Gaussian elimination with partial pivoting.
fn solve_linear_system(mut a: Array2<f64>, mut b: Array1<f64>) -> HousingPrepResult<Array1<f64>> {
    let n = a.nrows();
    for i in 0..n {
        let pivot_row = (i..n)
            .max_by(|&r, &s| a[[r, i]].abs().total_cmp(&a[[s, i]].abs()))
            .unwrap_or(i);
        if a[[pivot_row, i]].abs() < 1e-12 {
            return Err(HousingPrepError::ModelError(
                "Singular system; increase the ridge alpha".to_string(),
            ));
        }
        if pivot_row != i {
            for j in 0..n {
                a.swap([i, j], [pivot_row, j]);
            }
            b.swap(i, pivot_row);
        }
        for k in (i + 1)..n {
            let factor = a[[k, i]] / a[[i, i]];
            if factor == 0.0 {
                continue;
            }
            for j in i..n {
                a[[k, j]] -= factor * a[[i, j]];
            }
            b[k] -= factor * b[i];
        }
    }
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let tail: f64 = ((i + 1)..n).map(|j| a[[i, j]] * x[j]).sum();
        x[i] = (b[i] - tail) / a[[i, i]];
    }
    Ok(x)
}

impl Estimator for RidgeRegressor {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Ridge
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> HousingPrepResult<()> {
        check_training_data(x, y)?;
        let x_mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| HousingPrepError::ModelError("Empty training matrix".to_string()))?;
        let y_mean = y.mean().unwrap_or(0.0);
        let xc = x - &x_mean;
        let yc = y - y_mean;

        let mut gram = xc.t().dot(&xc);
        for i in 0..gram.nrows() {
            gram[[i, i]] += self.alpha;
        }
        let rhs = xc.t().dot(&yc);
        let weights = solve_linear_system(gram, rhs)?;
        let intercept = y_mean - x_mean.dot(&weights);
        self.model = Some(LinearModel {
            intercept,
            coefficients: weights.to_vec(),
        });
        Ok(())
    }

    fn linear_model(&self) -> Option<&LinearModel> {
        self.model.as_ref()
    }
}

fn reject_unknown_parameters(
    kind: EstimatorKind,
    parameters: &BTreeMap<String, serde_json::Value>,
    known: &[&str],
) -> HousingPrepResult<()> {
    match parameters.keys().find(|k| !known.contains(&k.as_str())) {
        Some(unknown) => Err(HousingPrepError::InvalidParameter(format!(
            "Unknown parameter '{}' for {}",
            unknown, kind
        ))),
        None => Ok(()),
    }
}

/// Builds an unfit estimator of `kind` from its hyperparameters.
///
/// `LinearRegression` accepts `fit_intercept` (bool); `Ridge` accepts `alpha` (number).
pub fn build_estimator(
    kind: EstimatorKind,
    parameters: &BTreeMap<String, serde_json::Value>,
) -> HousingPrepResult<Box<dyn Estimator>> {
    match kind {
        EstimatorKind::LinearRegression => {
            reject_unknown_parameters(kind, parameters, &["fit_intercept"])?;
            let fit_intercept = match parameters.get("fit_intercept") {
                Some(value) => value.as_bool().ok_or_else(|| {
                    HousingPrepError::InvalidParameter("'fit_intercept' must be a boolean".into())
                })?,
                None => true,
            };
            Ok(Box::new(LinearRegressor::new(fit_intercept)))
        }
        EstimatorKind::Ridge => {
            reject_unknown_parameters(kind, parameters, &["alpha"])?;
            let alpha = match parameters.get("alpha") {
                Some(value) => value.as_f64().ok_or_else(|| {
                    HousingPrepError::InvalidParameter("'alpha' must be a number".into())
                })?,
                None => DEFAULT_RIDGE_ALPHA,
            };
            Ok(Box::new(RidgeRegressor::new(alpha)?))
        }
    }
}

/// Mean absolute error.
pub fn mean_absolute_error(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    (y_true - y_pred).mapv(f64::abs).sum() / y_true.len() as f64
}

/// Coefficient of determination. A constant target scores 1.0 when predicted exactly, else 0.0.
pub fn r2_score(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let mean = y_true.mean().unwrap_or(0.0);
    let ss_res = (y_true - y_pred).mapv(|r| r * r).sum();
    let ss_tot = y_true.mapv(|v| (v - mean) * (v - mean)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Held-out evaluation metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub mae: f64,
    pub r2: f64,
}

impl Metrics {
    pub fn evaluate(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Self {
        Self {
            mae: mean_absolute_error(y_true, y_pred),
            r2: r2_score(y_true, y_pred),
        }
    }
}

/// Persisted trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format: String,
    pub version: u32,
    pub name: String,
    pub kind: EstimatorKind,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub target: String,
    /// Feature column order the coefficients refer to.
    pub feature_columns: Vec<String>,
    pub model: LinearModel,
    pub metrics: Metrics,
    pub trained_at: DateTime<Utc>,
}

impl ModelArtifact {
    pub fn predict(&self, x: &Array2<f64>) -> HousingPrepResult<Array1<f64>> {
        self.model.predict(x)
    }

    pub fn to_json(&self) -> HousingPrepResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> HousingPrepResult<Self> {
        let artifact: Self = serde_json::from_str(json)?;
        if artifact.format != MODEL_ARTIFACT_FORMAT || artifact.version != MODEL_ARTIFACT_VERSION {
            return Err(HousingPrepError::IncompatibleArtifact {
                expected: MODEL_ARTIFACT_FORMAT.to_string(),
                expected_version: MODEL_ARTIFACT_VERSION,
                found: artifact.format,
                found_version: artifact.version,
            });
        }
        Ok(artifact)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> HousingPrepResult<()> {
        write_bytes_atomic(self.to_json()?.as_bytes(), path.as_ref())?;
        info!("Saved trained model to {}", path.as_ref().display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> HousingPrepResult<Self> {
        Self::from_json(&fs::read_to_string(path.as_ref())?)
    }
}

/// Collects `columns` of `df` into a row-major `f64` matrix. Missing values are an error.
pub async fn feature_matrix(df: &DataFrame, columns: &[String]) -> HousingPrepResult<Array2<f64>> {
    let exprs: Vec<Expr> = columns
        .iter()
        .map(|name| cast(ident(name), DataType::Float64).alias(name))
        .collect();
    let batches = df.clone().select(exprs)?.collect().await?;
    let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
    let mut matrix = Array2::zeros((rows, columns.len()));
    let mut offset = 0;
    for batch in &batches {
        for (j, name) in columns.iter().enumerate() {
            let array = batch
                .column(j)
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| {
                    HousingPrepError::InvalidParameter(format!("Column '{}' is not numeric", name))
                })?;
            if array.null_count() > 0 {
                return Err(HousingPrepError::InvalidParameter(format!(
                    "Column '{}' has {} missing values",
                    name,
                    array.null_count()
                )));
            }
            for (i, value) in array.values().iter().enumerate() {
                matrix[[offset + i, j]] = *value;
            }
        }
        offset += batch.num_rows();
    }
    debug!("Collected {}x{} feature matrix", rows, columns.len());
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_estimator_kind_parsing() {
        assert_eq!("Ridge".parse::<EstimatorKind>().unwrap(), EstimatorKind::Ridge);
        assert_eq!(
            "LinearRegression".parse::<EstimatorKind>().unwrap(),
            EstimatorKind::LinearRegression
        );
        for name in ["RandomForest", "GradientBoosting", "XGBoost"] {
            assert!(matches!(
                name.parse::<EstimatorKind>(),
                Err(HousingPrepError::UnsupportedModel(_))
            ));
        }
    }

    #[test]
    fn test_ridge_without_penalty_recovers_exact_line() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![3.0, 5.0, 7.0, 9.0];
        let mut ridge = RidgeRegressor::new(0.0).unwrap();
        ridge.fit(&x, &y).unwrap();
        let model = ridge.linear_model().unwrap();
        assert_relative_eq!(model.coefficients[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(model.intercept, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ridge_penalty_shrinks_coefficients() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![3.0, 5.0, 7.0, 9.0];
        let mut ridge = RidgeRegressor::new(5.0).unwrap();
        ridge.fit(&x, &y).unwrap();
        // sum of squared deviations of x is 5, so w = 10 / (5 + 5)
        assert_relative_eq!(ridge.linear_model().unwrap().coefficients[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_unfit_estimator_cannot_predict() {
        let ridge = RidgeRegressor::new(1.0).unwrap();
        assert!(matches!(
            ridge.predict(&array![[1.0]]),
            Err(HousingPrepError::FitNotCalled)
        ));
    }

    #[test]
    fn test_metrics() {
        let y = array![1.0, 2.0, 3.0];
        assert_eq!(mean_absolute_error(&y, &array![2.0, 2.0, 2.0]), 2.0 / 3.0);
        assert_eq!(r2_score(&y, &y), 1.0);
        assert_relative_eq!(r2_score(&y, &array![2.0, 2.0, 2.0]), 0.0);
    }

    #[test]
    fn test_build_estimator_validates_parameters() {
        let mut params = BTreeMap::new();
        params.insert("n_estimators".to_string(), serde_json::json!(100));
        assert!(matches!(
            build_estimator(EstimatorKind::Ridge, &params),
            Err(HousingPrepError::InvalidParameter(_))
        ));
        let mut params = BTreeMap::new();
        params.insert("alpha".to_string(), serde_json::json!(0.5));
        assert_eq!(
            build_estimator(EstimatorKind::Ridge, &params).unwrap().kind(),
            EstimatorKind::Ridge
        );
    }
}
