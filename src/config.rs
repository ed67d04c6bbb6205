//! ## Configuration
//!
//! Three immutable configuration records drive the orchestrators:
//!
//! - [`ProcessorConfig`]: preprocessing (target, outlier policy, IQR multiplier, index flag, paths);
//! - [`FeaturesConfig`]: feature engineering paths;
//! - [`TrainingConfig`]: the `model:` block of the training YAML plus data/model paths.
//!
//! Each record has an all-`Option` *layer* type deserialized from YAML. A config is resolved by
//! merging `default ⊕ file ⊕ overrides` (later layers win field by field) and validating the
//! result; nothing is mutated after resolution.

use crate::exceptions::{HousingPrepError, HousingPrepResult};
use crate::transformers::outlier_handling::{OutlierPolicy, DEFAULT_IQR_MULTIPLIER};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TARGET: &str = "price";
pub const DEFAULT_RAW_DATA: &str = "data/raw/house_data.csv";
pub const DEFAULT_CLEANED_DATA: &str = "data/processed/cleaned_house_data.csv";
pub const DEFAULT_ENGINEERED_DATA: &str = "data/processed/engineered_features.csv";
pub const DEFAULT_TRANSFORMER_PATH: &str = "models/trained/preprocessor.json";
pub const DEFAULT_MODELS_DIR: &str = "models";

/// A partial configuration that can be laid over another one.
pub trait Layer: Sized + Default + DeserializeOwned {
    /// Returns `self` with every field set in `other` replaced by `other`'s value.
    fn merge(self, other: Self) -> Self;

    /// Parses a layer from a YAML document. An empty document is an empty layer.
    fn from_yaml_str(yaml: &str) -> HousingPrepResult<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads a layer from a YAML file.
    fn from_yaml_file(path: impl AsRef<Path>) -> HousingPrepResult<Self> {
        Self::from_yaml_str(&fs::read_to_string(path.as_ref())?)
    }
}

fn require_non_empty(field: &str, value: &str) -> HousingPrepResult<()> {
    if value.trim().is_empty() {
        return Err(HousingPrepError::InvalidParameter(format!(
            "'{}' must not be empty",
            field
        )));
    }
    Ok(())
}

fn require_path(field: &str, value: &Path) -> HousingPrepResult<()> {
    require_non_empty(field, &value.to_string_lossy())
}

/// Settings of the preprocessing run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessorConfig {
    pub target: String,
    pub outlier_policy: OutlierPolicy,
    pub iqr_multiplier: f64,
    pub save_index: bool,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Columns bounded by the outlier handler; `None` bounds every numeric column.
    pub outlier_columns: Option<Vec<String>>,
    /// Columns required besides the target.
    pub required_columns: Vec<String>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            target: DEFAULT_TARGET.to_string(),
            outlier_policy: OutlierPolicy::Filter,
            iqr_multiplier: DEFAULT_IQR_MULTIPLIER,
            save_index: false,
            input_path: PathBuf::from(DEFAULT_RAW_DATA),
            output_path: PathBuf::from(DEFAULT_CLEANED_DATA),
            outlier_columns: None,
            required_columns: Vec::new(),
        }
    }
}

/// Partial [`ProcessorConfig`]; the policy is kept as text until resolution.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessorConfigLayer {
    pub target: Option<String>,
    pub outlier_policy: Option<String>,
    pub iqr_multiplier: Option<f64>,
    pub save_index: Option<bool>,
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub outlier_columns: Option<Vec<String>>,
    pub required_columns: Option<Vec<String>>,
}

impl Layer for ProcessorConfigLayer {
    fn merge(self, other: Self) -> Self {
        Self {
            target: other.target.or(self.target),
            outlier_policy: other.outlier_policy.or(self.outlier_policy),
            iqr_multiplier: other.iqr_multiplier.or(self.iqr_multiplier),
            save_index: other.save_index.or(self.save_index),
            input_path: other.input_path.or(self.input_path),
            output_path: other.output_path.or(self.output_path),
            outlier_columns: other.outlier_columns.or(self.outlier_columns),
            required_columns: other.required_columns.or(self.required_columns),
        }
    }
}

impl ProcessorConfig {
    /// Applies `layer` over the defaults and validates the result.
    pub fn resolve(layer: ProcessorConfigLayer) -> HousingPrepResult<Self> {
        let defaults = Self::default();
        let outlier_policy = match layer.outlier_policy {
            Some(name) => name.parse()?,
            None => defaults.outlier_policy,
        };
        let config = Self {
            target: layer.target.unwrap_or(defaults.target),
            outlier_policy,
            iqr_multiplier: layer.iqr_multiplier.unwrap_or(defaults.iqr_multiplier),
            save_index: layer.save_index.unwrap_or(defaults.save_index),
            input_path: layer.input_path.unwrap_or(defaults.input_path),
            output_path: layer.output_path.unwrap_or(defaults.output_path),
            outlier_columns: layer.outlier_columns.or(defaults.outlier_columns),
            required_columns: layer.required_columns.unwrap_or(defaults.required_columns),
        };
        config.validate()?;
        Ok(config)
    }

    /// Resolves `file` (if any) and then `overrides` over the defaults.
    pub fn load(
        file: Option<&Path>,
        overrides: ProcessorConfigLayer,
    ) -> HousingPrepResult<Self> {
        let base = match file {
            Some(path) => ProcessorConfigLayer::from_yaml_file(path)?,
            None => ProcessorConfigLayer::default(),
        };
        Self::resolve(base.merge(overrides))
    }

    pub fn validate(&self) -> HousingPrepResult<()> {
        require_non_empty("target", &self.target)?;
        if !self.iqr_multiplier.is_finite() || self.iqr_multiplier <= 0.0 {
            return Err(HousingPrepError::InvalidParameter(format!(
                "'iqr_multiplier' must be a finite number greater than 0, got {}",
                self.iqr_multiplier
            )));
        }
        require_path("input_path", &self.input_path)?;
        require_path("output_path", &self.output_path)?;
        if let Some(columns) = &self.outlier_columns {
            if columns.is_empty() {
                return Err(HousingPrepError::InvalidParameter(
                    "'outlier_columns' must list at least one column when set".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Target followed by the other required columns, without duplicates.
    pub fn required(&self) -> Vec<String> {
        let mut columns = vec![self.target.clone()];
        for column in &self.required_columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        columns
    }
}

/// Settings of the feature engineering run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeaturesConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub transformer_path: PathBuf,
    pub target: String,
    /// Year `house_age` is measured against; `None` uses the current year.
    pub reference_year: Option<i32>,
    pub scale_numeric: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from(DEFAULT_CLEANED_DATA),
            output_path: PathBuf::from(DEFAULT_ENGINEERED_DATA),
            transformer_path: PathBuf::from(DEFAULT_TRANSFORMER_PATH),
            target: DEFAULT_TARGET.to_string(),
            reference_year: None,
            scale_numeric: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeaturesConfigLayer {
    #[serde(alias = "input")]
    pub input_path: Option<PathBuf>,
    #[serde(alias = "output")]
    pub output_path: Option<PathBuf>,
    #[serde(alias = "preprocessor")]
    pub transformer_path: Option<PathBuf>,
    pub target: Option<String>,
    pub reference_year: Option<i32>,
    pub scale_numeric: Option<bool>,
}

impl Layer for FeaturesConfigLayer {
    fn merge(self, other: Self) -> Self {
        Self {
            input_path: other.input_path.or(self.input_path),
            output_path: other.output_path.or(self.output_path),
            transformer_path: other.transformer_path.or(self.transformer_path),
            target: other.target.or(self.target),
            reference_year: other.reference_year.or(self.reference_year),
            scale_numeric: other.scale_numeric.or(self.scale_numeric),
        }
    }
}

impl FeaturesConfig {
    pub fn resolve(layer: FeaturesConfigLayer) -> HousingPrepResult<Self> {
        let defaults = Self::default();
        let config = Self {
            input_path: layer.input_path.unwrap_or(defaults.input_path),
            output_path: layer.output_path.unwrap_or(defaults.output_path),
            transformer_path: layer.transformer_path.unwrap_or(defaults.transformer_path),
            target: layer.target.unwrap_or(defaults.target),
            reference_year: layer.reference_year.or(defaults.reference_year),
            scale_numeric: layer.scale_numeric.unwrap_or(defaults.scale_numeric),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(file: Option<&Path>, overrides: FeaturesConfigLayer) -> HousingPrepResult<Self> {
        let base = match file {
            Some(path) => FeaturesConfigLayer::from_yaml_file(path)?,
            None => FeaturesConfigLayer::default(),
        };
        Self::resolve(base.merge(overrides))
    }

    pub fn validate(&self) -> HousingPrepResult<()> {
        require_path("input_path", &self.input_path)?;
        require_path("output_path", &self.output_path)?;
        require_path("transformer_path", &self.transformer_path)?;
        require_non_empty("target", &self.target)
    }
}

/// The `model:` block of the training YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSection {
    /// Registered model name; also the artifact file stem.
    pub name: String,
    /// Estimator identifier, e.g. `"LinearRegression"`.
    pub best_model: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub target_variable: String,
}

/// Settings of the training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingConfig {
    pub model: ModelSection,
    pub data_path: PathBuf,
    pub models_dir: PathBuf,
    pub test_size: f64,
    pub seed: u64,
}

impl TrainingConfig {
    pub const DEFAULT_TEST_SIZE: f64 = 0.2;
    pub const DEFAULT_SEED: u64 = 42;

    pub fn new(model: ModelSection) -> Self {
        Self {
            model,
            data_path: PathBuf::from(DEFAULT_ENGINEERED_DATA),
            models_dir: PathBuf::from(DEFAULT_MODELS_DIR),
            test_size: Self::DEFAULT_TEST_SIZE,
            seed: Self::DEFAULT_SEED,
        }
    }

    /// Where the trained model artifact is written: `{models_dir}/trained/{name}.json`.
    pub fn model_path(&self) -> PathBuf {
        self.models_dir
            .join("trained")
            .join(format!("{}.json", self.model.name))
    }

    pub fn resolve(layer: TrainingConfigLayer) -> HousingPrepResult<Self> {
        let model = layer.model.ok_or_else(|| {
            HousingPrepError::InvalidParameter("Training config needs a 'model' section".to_string())
        })?;
        let defaults = Self::new(model);
        let config = Self {
            data_path: layer.data_path.unwrap_or(defaults.data_path),
            models_dir: layer.models_dir.unwrap_or(defaults.models_dir),
            test_size: layer.test_size.unwrap_or(defaults.test_size),
            seed: layer.seed.unwrap_or(defaults.seed),
            model: defaults.model,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(file: Option<&Path>, overrides: TrainingConfigLayer) -> HousingPrepResult<Self> {
        let base = match file {
            Some(path) => TrainingConfigLayer::from_yaml_file(path)?,
            None => TrainingConfigLayer::default(),
        };
        Self::resolve(base.merge(overrides))
    }

    pub fn validate(&self) -> HousingPrepResult<()> {
        require_non_empty("model.name", &self.model.name)?;
        require_non_empty("model.best_model", &self.model.best_model)?;
        require_non_empty("model.target_variable", &self.model.target_variable)?;
        require_path("data_path", &self.data_path)?;
        require_path("models_dir", &self.models_dir)?;
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(HousingPrepError::InvalidParameter(format!(
                "'test_size' must lie strictly between 0 and 1, got {}",
                self.test_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingConfigLayer {
    pub model: Option<ModelSection>,
    pub data_path: Option<PathBuf>,
    pub models_dir: Option<PathBuf>,
    pub test_size: Option<f64>,
    pub seed: Option<u64>,
}

impl Layer for TrainingConfigLayer {
    fn merge(self, other: Self) -> Self {
        Self {
            model: other.model.or(self.model),
            data_path: other.data_path.or(self.data_path),
            models_dir: other.models_dir.or(self.models_dir),
            test_size: other.test_size.or(self.test_size),
            seed: other.seed.or(self.seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processor_defaults() {
        let config = ProcessorConfig::resolve(ProcessorConfigLayer::default()).unwrap();
        assert_eq!(config, ProcessorConfig::default());
        assert_eq!(config.target, "price");
        assert_eq!(config.outlier_policy, OutlierPolicy::Filter);
        assert_eq!(config.iqr_multiplier, 1.5);
        assert!(!config.save_index);
        assert_eq!(config.input_path, PathBuf::from("data/raw/house_data.csv"));
    }

    #[test]
    fn test_override_wins_over_file() {
        let file = ProcessorConfigLayer::from_yaml_str(
            "target: sale_price\noutlier_policy: clip\niqr_multiplier: 3.0\n",
        )
        .unwrap();
        let overrides = ProcessorConfigLayer {
            iqr_multiplier: Some(2.0),
            ..Default::default()
        };
        let config = ProcessorConfig::resolve(file.merge(overrides)).unwrap();
        assert_eq!(config.target, "sale_price");
        assert_eq!(config.outlier_policy, OutlierPolicy::Clip);
        assert_eq!(config.iqr_multiplier, 2.0);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad_policy = ProcessorConfigLayer {
            outlier_policy: Some("winsorize".into()),
            ..Default::default()
        };
        assert!(matches!(
            ProcessorConfig::resolve(bad_policy),
            Err(HousingPrepError::UnsupportedPolicy(_))
        ));
        let bad_multiplier = ProcessorConfigLayer {
            iqr_multiplier: Some(0.0),
            ..Default::default()
        };
        assert!(matches!(
            ProcessorConfig::resolve(bad_multiplier),
            Err(HousingPrepError::InvalidParameter(_))
        ));
        assert!(matches!(
            ProcessorConfigLayer::from_yaml_str("colour: red\n"),
            Err(HousingPrepError::ConfigError(_))
        ));
    }

    #[test]
    fn test_features_layer_accepts_short_keys() {
        let layer = FeaturesConfigLayer::from_yaml_str("input: a.csv\npreprocessor: p.json\n").unwrap();
        let config = FeaturesConfig::resolve(layer).unwrap();
        assert_eq!(config.input_path, PathBuf::from("a.csv"));
        assert_eq!(config.transformer_path, PathBuf::from("p.json"));
        assert_eq!(config.output_path, PathBuf::from(DEFAULT_ENGINEERED_DATA));
    }

    #[test]
    fn test_training_yaml() {
        let yaml = "model:\n  name: house_price_model\n  best_model: Ridge\n  parameters:\n    alpha: 0.5\n  target_variable: price\n";
        let config = TrainingConfig::resolve(TrainingConfigLayer::from_yaml_str(yaml).unwrap()).unwrap();
        assert_eq!(config.model.best_model, "Ridge");
        assert_eq!(config.seed, 42);
        assert_eq!(
            config.model_path(),
            PathBuf::from("models/trained/house_price_model.json")
        );
        assert!(TrainingConfig::resolve(TrainingConfigLayer::default()).is_err());
    }
}
