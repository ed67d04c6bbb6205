//! ## Feature engineering run
//!
//! load cleaned dataset → derive features → fit_transform (or transform with a supplied fitted
//! transformer) → stage the transformed dataset and, when fitted here, the transformer artifact →
//! persist both.

use crate::config::FeaturesConfig;
use crate::exceptions::{HousingPrepError, HousingPrepResult, PipelineStep};
use crate::io::{frame_from_batches, load, persist_staged, stage_batches, stage_bytes};
use crate::pipelines::{block_on, StepResultExt};
use crate::transformers::column_transformer::{FeatureTransformer, TransformerConfig};
use crate::pipeline::Transformer;
use crate::transformers::feature_creation::{current_year, FeatureDeriver, FeatureOptions};
use arrow::datatypes::{Schema, SchemaRef};
use datafusion::prelude::*;
use std::sync::Arc;
use tracing::info;

/// Transformed dataset and the transformer that produced it.
pub struct FeatureEngineeringOutcome {
    pub data: DataFrame,
    pub transformer: Arc<FeatureTransformer>,
    /// True when the transformer was fitted during this run (and therefore saved).
    pub fitted_here: bool,
    pub rows: usize,
}

pub struct FeatureEngineeringPipeline {
    config: FeaturesConfig,
    transformer_config: TransformerConfig,
    fitted: Option<Arc<FeatureTransformer>>,
}

impl FeatureEngineeringPipeline {
    pub fn new(config: FeaturesConfig) -> Self {
        let transformer_config = TransformerConfig {
            scale_numeric: config.scale_numeric,
            target: Some(config.target.clone()),
            ..TransformerConfig::default()
        };
        Self {
            config,
            transformer_config,
            fitted: None,
        }
    }

    /// Replaces the feature groups and branch settings of the transformer fitted by this run.
    pub fn with_transformer_config(mut self, transformer_config: TransformerConfig) -> Self {
        self.transformer_config = transformer_config;
        self
    }

    /// Reuses an already fitted transformer instead of fitting one. The artifact is not rewritten.
    pub fn with_fitted_transformer(mut self, transformer: Arc<FeatureTransformer>) -> HousingPrepResult<Self> {
        if transformer.state().is_none() {
            return Err(HousingPrepError::FitNotCalled);
        }
        self.fitted = Some(transformer);
        Ok(self)
    }

    pub fn config(&self) -> &FeaturesConfig {
        &self.config
    }

    fn feature_options(&self) -> FeatureOptions {
        FeatureOptions {
            reference_year: self.config.reference_year.unwrap_or_else(current_year),
            target: self.config.target.clone(),
        }
    }

    /// Derives features and applies (fitting first if needed) the transformer. Nothing is written.
    pub async fn process(&self, df: DataFrame) -> HousingPrepResult<FeatureEngineeringOutcome> {
        let mut deriver = FeatureDeriver::new(self.feature_options());
        let derived = deriver
            .fit_transform(df)
            .await
            .at(PipelineStep::DeriveFeatures)?;

        let (transformed, transformer, fitted_here) = match &self.fitted {
            Some(transformer) => {
                let transformed = transformer.transform(derived).at(PipelineStep::Transform)?;
                (transformed, transformer.clone(), false)
            }
            None => {
                let mut transformer = FeatureTransformer::new(self.transformer_config.clone());
                let transformed = transformer
                    .fit_transform(derived)
                    .await
                    .at(PipelineStep::Transform)?;
                info!("Fitted the feature transformer and transformed the features");
                (transformed, Arc::new(transformer), true)
            }
        };

        let schema: SchemaRef = Arc::new(Schema::from(transformed.schema()));
        let batches = transformed.collect().await.at(PipelineStep::Transform)?;
        let rows = batches.iter().map(|b| b.num_rows()).sum();
        let data = frame_from_batches(schema, batches).at(PipelineStep::Transform)?;
        Ok(FeatureEngineeringOutcome {
            data,
            transformer,
            fitted_here,
            rows,
        })
    }

    /// Loads the configured input, processes it and writes the dataset and transformer artifact.
    pub async fn run(&self) -> HousingPrepResult<FeatureEngineeringOutcome> {
        info!("Loading data from {}", self.config.input_path.display());
        let df = load(&self.config.input_path).await.at(PipelineStep::Load)?;
        let outcome = self.process(df).await?;

        let schema: SchemaRef = Arc::new(Schema::from(outcome.data.schema()));
        let batches = outcome.data.clone().collect().await.at(PipelineStep::Save)?;
        let staged_data =
            stage_batches(&schema, &batches, &self.config.output_path, false).at(PipelineStep::Save)?;
        let staged_transformer = if outcome.fitted_here {
            let json = outcome.transformer.to_json().at(PipelineStep::Save)?;
            Some(stage_bytes(json.as_bytes(), &self.config.transformer_path).at(PipelineStep::Save)?)
        } else {
            None
        };

        // Dataset before artifact, so a new artifact never sits next to a stale dataset.
        persist_staged(staged_data, &self.config.output_path).at(PipelineStep::Save)?;
        info!(
            "Saved fully preprocessed data to {} ({} rows)",
            self.config.output_path.display(),
            outcome.rows
        );
        if let Some(staged) = staged_transformer {
            persist_staged(staged, &self.config.transformer_path).at(PipelineStep::Save)?;
            info!("Saved feature transformer to {}", self.config.transformer_path.display());
        }
        Ok(outcome)
    }

    /// [`FeatureEngineeringPipeline::run`] for synchronous callers.
    ///
    /// Starts its own Tokio runtime, so it panics when called from within an async context;
    /// await [`FeatureEngineeringPipeline::run`] there instead.
    pub fn run_blocking(&self) -> HousingPrepResult<FeatureEngineeringOutcome> {
        block_on(self.run())
    }
}
