//! ## Transformer interface
//!
//! Every stateful preparation step (the imputer, the outlier handler, the feature transformer)
//! follows the same lifecycle: it is constructed unfit, `fit` computes and freezes its state from
//! a reference DataFrame, and `transform` applies the frozen state without mutating it.
//! `transform` on an unfit stateful transformer fails with
//! [`HousingPrepError::FitNotCalled`](crate::exceptions::HousingPrepError::FitNotCalled).
//!
//! The [`Transformer`] trait captures that lifecycle so orchestrators can drive steps uniformly.

use crate::exceptions::HousingPrepResult;
use async_trait::async_trait;
use datafusion::prelude::*;

/// Trait for components used in the data preparation pipeline.
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Fit the transformer given a DataFrame.
    ///
    /// Fitting may collect data to compute parameters; it is the only method that mutates the
    /// transformer.
    async fn fit(&mut self, df: &DataFrame) -> HousingPrepResult<()>;

    /// Transform the input DataFrame, returning a new DataFrame with the transformation applied.
    ///
    /// This only extends the DataFrame's logical plan; nothing is executed until the result is
    /// collected.
    fn transform(&self, df: DataFrame) -> HousingPrepResult<DataFrame>;

    /// Returns true if the transformer requires a call to `fit` before `transform`.
    fn is_stateful(&self) -> bool;

    /// Returns true once `fit` has completed (always true for stateless transformers).
    fn is_fitted(&self) -> bool;

    /// Fits on `df` and transforms the same frame.
    async fn fit_transform(&mut self, df: DataFrame) -> HousingPrepResult<DataFrame> {
        self.fit(&df).await?;
        self.transform(df)
    }
}
