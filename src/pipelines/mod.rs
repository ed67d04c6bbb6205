//! # Orchestrators
//!
//! End-to-end runs built from the preparation steps:
//!
//! - [`preprocessing`]: load, validate, impute, handle outliers, save the cleaned dataset;
//! - [`features`]: derive features, fit (or reuse) the feature transformer, save the transformed
//!   dataset and the transformer artifact;
//! - [`training`]: split, fit an estimator, evaluate and save the model artifact.
//!
//! Steps run strictly in sequence. A failure is reported as
//! [`HousingPrepError::StepFailed`] carrying the [`PipelineStep`] that failed, and nothing is
//! written unless every in-memory step succeeded.

pub mod features;
pub mod preprocessing;
pub mod training;

use crate::exceptions::{HousingPrepError, HousingPrepResult, PipelineStep};
use std::future::Future;

/// Labels the error of a step result with the step it came from.
pub(crate) trait StepResultExt<T> {
    fn at(self, step: PipelineStep) -> HousingPrepResult<T>;
}

impl<T, E: Into<HousingPrepError>> StepResultExt<T> for Result<T, E> {
    fn at(self, step: PipelineStep) -> HousingPrepResult<T> {
        self.map_err(|e| e.into().at_step(step))
    }
}

/// Drives `future` to completion on a fresh current-thread Tokio runtime.
///
/// Tokio refuses to start a runtime from within another, so this panics when called from async
/// code.
pub fn block_on<F, T>(future: F) -> HousingPrepResult<T>
where
    F: Future<Output = HousingPrepResult<T>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(future)
}
