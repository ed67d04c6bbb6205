//! ## Preprocessing run
//!
//! load → validate → impute → outlier bounds → outlier policy → save.
//!
//! Outlier bounds are fitted on the imputed frame, over every numeric column unless the
//! configuration names a subset.

use crate::config::ProcessorConfig;
use crate::exceptions::{HousingPrepResult, PipelineStep};
use crate::io::{frame_from_batches, load, persist_staged, stage_batches};
use crate::pipelines::{block_on, StepResultExt};
use crate::schema::{ColumnKind, DatasetSchema};
use crate::transformers::imputation::ImputationState;
use crate::transformers::outlier_handling::{apply_policy, ColumnBounds, OutlierBounds, OutlierPolicy};
use arrow::datatypes::{Schema, SchemaRef};
use datafusion::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Audit of one preprocessing run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreprocessingReport {
    pub input_rows: usize,
    pub output_rows: usize,
    /// Rows removed by the `filter` policy.
    pub dropped_rows: usize,
    pub imputed: BTreeMap<String, usize>,
    /// Values capped by the `clip` policy, per column. Empty for other policies.
    pub clipped: BTreeMap<String, usize>,
    pub policy: OutlierPolicy,
    pub bounds: Vec<ColumnBounds>,
}

impl PreprocessingReport {
    pub fn total_imputed(&self) -> usize {
        self.imputed.values().sum()
    }

    pub fn total_clipped(&self) -> usize {
        self.clipped.values().sum()
    }
}

/// Cleaned dataset (materialized) and the run's audit.
pub struct PreprocessingOutcome {
    pub data: DataFrame,
    pub report: PreprocessingReport,
}

pub struct PreprocessingPipeline {
    config: ProcessorConfig,
    schema: DatasetSchema,
}

impl PreprocessingPipeline {
    pub fn new(config: ProcessorConfig) -> Self {
        let schema = DatasetSchema::new(config.required());
        Self { config, schema }
    }

    /// Declares the kind of a column instead of inferring it.
    pub fn with_kind(mut self, column: impl Into<String>, kind: ColumnKind) -> Self {
        self.schema = self.schema.with_kind(column, kind);
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Runs every in-memory step on `df` and materializes the result. Nothing is written.
    pub async fn process(&self, df: DataFrame) -> HousingPrepResult<PreprocessingOutcome> {
        let resolved = self.schema.resolve(&df).await.at(PipelineStep::Validate)?;
        let input_rows = df.clone().count().await.at(PipelineStep::Validate)?;
        info!("Loaded {} rows with {} columns", input_rows, resolved.columns.len());

        let imputation = ImputationState::fit(&df, &resolved)
            .await
            .at(PipelineStep::Impute)?;
        let imputed = imputation.apply(df).at(PipelineStep::Impute)?;
        info!("Imputed {} missing cells", imputation.total_imputed());

        let columns = match &self.config.outlier_columns {
            Some(columns) => columns.clone(),
            None => resolved.numeric_columns(),
        };
        let bounds = OutlierBounds::fit(&imputed, &columns, self.config.iqr_multiplier)
            .await
            .at(PipelineStep::Outliers)?;
        let handled = apply_policy(imputed, &bounds, self.config.outlier_policy)
            .at(PipelineStep::Outliers)?;

        let schema: SchemaRef = Arc::new(Schema::from(handled.schema()));
        let batches = handled.collect().await.at(PipelineStep::Outliers)?;
        let output_rows: usize = batches.iter().map(|b| b.num_rows()).sum();

        let clipped = match self.config.outlier_policy {
            OutlierPolicy::Clip => bounds.violation_counts(),
            _ => BTreeMap::new(),
        };
        let report = PreprocessingReport {
            input_rows,
            output_rows,
            dropped_rows: input_rows - output_rows,
            imputed: imputation.imputed_counts(),
            clipped,
            policy: self.config.outlier_policy,
            bounds: bounds.columns,
        };
        info!(
            "Outlier policy '{}': {} rows in, {} rows out",
            report.policy, report.input_rows, report.output_rows
        );

        let data = frame_from_batches(schema, batches).at(PipelineStep::Outliers)?;
        Ok(PreprocessingOutcome { data, report })
    }

    /// Loads the configured input, processes it and writes the configured output.
    pub async fn run(&self) -> HousingPrepResult<PreprocessingOutcome> {
        let df = load(&self.config.input_path).await.at(PipelineStep::Load)?;
        let outcome = self.process(df).await?;

        let schema: SchemaRef = Arc::new(Schema::from(outcome.data.schema()));
        let batches = outcome.data.clone().collect().await.at(PipelineStep::Save)?;
        let staged = stage_batches(
            &schema,
            &batches,
            &self.config.output_path,
            self.config.save_index,
        )
        .at(PipelineStep::Save)?;
        persist_staged(staged, &self.config.output_path).at(PipelineStep::Save)?;
        info!(
            "Saved processed data to {} ({} rows)",
            self.config.output_path.display(),
            outcome.report.output_rows
        );
        Ok(outcome)
    }

    /// [`PreprocessingPipeline::run`] for synchronous callers.
    ///
    /// Panics when called from within a Tokio runtime; await [`PreprocessingPipeline::run`] there.
    pub fn run_blocking(&self) -> HousingPrepResult<PreprocessingOutcome> {
        block_on(self.run())
    }
}
