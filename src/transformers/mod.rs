//! # Transformer Implementations
//!
//! The submodules contain the data preparation steps: missing-value imputation, IQR outlier
//! handling, derived property features and the fit/transform feature transformer.

pub mod column_transformer;
pub mod feature_creation;
pub mod imputation;
pub mod outlier_handling;
