//! # housing-prep
//!
//! Deterministic data preparation for house price models: schema validation, missing-value
//! imputation, IQR outlier handling, derived features and a persisted fit/transform feature
//! transformer whose output feeds model training and serving.

pub mod config;
pub mod exceptions;
pub mod inference;
pub mod io;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod pipelines;
pub mod schema;
pub mod stats;
pub mod transformers;
