//! ## Training run
//!
//! load engineered dataset → seeded shuffle split → build estimator → fit → evaluate (MAE, R²)
//! → save model artifact.
//!
//! Every column except the target is a feature, in dataset order.

use crate::config::TrainingConfig;
use crate::exceptions::{HousingPrepError, HousingPrepResult, PipelineStep};
use crate::io::load;
use crate::models::{
    build_estimator, feature_matrix, EstimatorKind, Metrics, ModelArtifact, MODEL_ARTIFACT_FORMAT,
    MODEL_ARTIFACT_VERSION,
};
use crate::pipelines::{block_on, StepResultExt};
use crate::schema::validate;
use chrono::Utc;
use datafusion::prelude::*;
use ndarray::{s, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::info;

/// Row indices of the train and test partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffles `0..rows` with a seeded RNG and holds out `ceil(rows * test_size)` rows for testing.
pub fn train_test_split(rows: usize, test_size: f64, seed: u64) -> HousingPrepResult<Split> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(HousingPrepError::InvalidParameter(format!(
            "test_size must lie strictly between 0 and 1, got {}",
            test_size
        )));
    }
    let n_test = (rows as f64 * test_size).ceil() as usize;
    if n_test == 0 || n_test >= rows {
        return Err(HousingPrepError::InvalidParameter(format!(
            "Cannot split {} rows with test_size {}",
            rows, test_size
        )));
    }
    let mut indices: Vec<usize> = (0..rows).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let train = indices.split_off(n_test);
    Ok(Split {
        train,
        test: indices,
    })
}

/// Fitted model artifact and where it was written.
pub struct TrainingOutcome {
    pub artifact: ModelArtifact,
    pub model_path: PathBuf,
    pub train_rows: usize,
    pub test_rows: usize,
}

pub struct TrainingPipeline {
    config: TrainingConfig,
}

impl TrainingPipeline {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Splits, fits and evaluates on `df`. Nothing is written.
    pub async fn train(&self, df: DataFrame) -> HousingPrepResult<TrainingOutcome> {
        let model_cfg = &self.config.model;
        let target = model_cfg.target_variable.clone();
        validate(&df, &[target.clone()]).at(PipelineStep::Validate)?;
        let feature_columns: Vec<String> = df
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().to_string())
            .filter(|name| *name != target)
            .collect();
        if feature_columns.is_empty() {
            return Err(HousingPrepError::InvalidParameter(
                "No feature columns besides the target".to_string(),
            )
            .at_step(PipelineStep::Validate));
        }

        // One projection so that features and target come from the same rows.
        let mut columns = feature_columns.clone();
        columns.push(target.clone());
        let matrix = feature_matrix(&df, &columns).await.at(PipelineStep::Split)?;
        let n_features = feature_columns.len();
        let x = matrix.slice(s![.., ..n_features]).to_owned();
        let y: Array1<f64> = matrix.column(n_features).to_owned();
        let split = train_test_split(x.nrows(), self.config.test_size, self.config.seed)
            .at(PipelineStep::Split)?;
        let (x_train, y_train) = rows(&x, &y, &split.train);
        let (x_test, y_test) = rows(&x, &y, &split.test);

        let kind = model_cfg
            .best_model
            .parse::<EstimatorKind>()
            .at(PipelineStep::Fit)?;
        let mut estimator = build_estimator(kind, &model_cfg.parameters).at(PipelineStep::Fit)?;
        info!("Training model: {}", kind);
        estimator.fit(&x_train, &y_train).at(PipelineStep::Fit)?;

        let y_pred = estimator.predict(&x_test).at(PipelineStep::Evaluate)?;
        let metrics = Metrics::evaluate(&y_test, &y_pred);
        info!("Final MAE: {:.2}, R²: {:.4}", metrics.mae, metrics.r2);

        let model = estimator
            .linear_model()
            .cloned()
            .ok_or(HousingPrepError::FitNotCalled)
            .at(PipelineStep::Evaluate)?;
        let artifact = ModelArtifact {
            format: MODEL_ARTIFACT_FORMAT.to_string(),
            version: MODEL_ARTIFACT_VERSION,
            name: model_cfg.name.clone(),
            kind,
            parameters: model_cfg.parameters.clone(),
            target,
            feature_columns,
            model,
            metrics,
            trained_at: Utc::now(),
        };
        Ok(TrainingOutcome {
            artifact,
            model_path: self.config.model_path(),
            train_rows: split.train.len(),
            test_rows: split.test.len(),
        })
    }

    /// Loads the configured dataset, trains and writes the model artifact.
    pub async fn run(&self) -> HousingPrepResult<TrainingOutcome> {
        let df = load(&self.config.data_path).await.at(PipelineStep::Load)?;
        let outcome = self.train(df).await?;
        outcome
            .artifact
            .save(&outcome.model_path)
            .at(PipelineStep::Save)?;
        Ok(outcome)
    }

    /// [`TrainingPipeline::run`] for synchronous callers.
    ///
    /// Panics when called from within a Tokio runtime; await [`TrainingPipeline::run`] there.
    pub fn run_blocking(&self) -> HousingPrepResult<TrainingOutcome> {
        block_on(self.run())
    }
}

fn rows(x: &Array2<f64>, y: &Array1<f64>, indices: &[usize]) -> (Array2<f64>, Array1<f64>) {
    (x.select(Axis(0), indices), y.select(Axis(0), indices))
}
