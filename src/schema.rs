//! ## Schema validation
//!
//! A [`DatasetSchema`] declares which columns a dataset must contain and, optionally, the kind
//! (numeric or categorical) of any column. Resolving it against a DataFrame produces a
//! [`ResolvedSchema`] in which every column of the frame has a kind: the declared one when
//! present, otherwise the kind inferred from the column's Arrow type.
//!
//! Validation must succeed before any cleaning, outlier handling, or feature derivation runs.

use crate::exceptions::{HousingPrepError, HousingPrepResult};
use arrow::datatypes::DataType;
use datafusion::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Kind of a column as seen by the cleaner and the feature transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

/// Fails with [`HousingPrepError::MissingColumns`] naming every required column absent from `df`.
pub fn validate(df: &DataFrame, required_columns: &[String]) -> HousingPrepResult<()> {
    let schema = df.schema();
    let missing: Vec<String> = required_columns
        .iter()
        .filter(|name| schema.field_with_name(None, name).is_err())
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(HousingPrepError::MissingColumns(missing))
    }
}

/// Classifies one column from its Arrow type.
///
/// A column is numeric when its type is numeric. A column with no non-missing value is
/// categorical unless `hint` says otherwise; a hint never overrides a column that has values.
pub fn classify(data_type: &DataType, non_null_count: usize, hint: Option<ColumnKind>) -> ColumnKind {
    if non_null_count == 0 || *data_type == DataType::Null {
        return hint.unwrap_or(ColumnKind::Categorical);
    }
    if data_type.is_numeric() {
        ColumnKind::Numeric
    } else {
        ColumnKind::Categorical
    }
}

/// Declared expectations for a dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSchema {
    /// Columns that must be present.
    pub required: Vec<String>,
    /// Declared kinds. Declared columns are implicitly required.
    pub kinds: BTreeMap<String, ColumnKind>,
}

impl DatasetSchema {
    /// Schema requiring only `required`, with every kind inferred.
    pub fn new(required: Vec<String>) -> Self {
        Self {
            required,
            kinds: BTreeMap::new(),
        }
    }

    /// Declares the kind of `column`.
    pub fn with_kind(mut self, column: impl Into<String>, kind: ColumnKind) -> Self {
        self.kinds.insert(column.into(), kind);
        self
    }

    /// `required` in its given order, then any other declared columns sorted by name.
    pub fn required_columns(&self) -> Vec<String> {
        let mut columns = self.required.clone();
        for name in self.kinds.keys() {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
        columns
    }

    /// Validates `df` and assigns a kind to each of its columns.
    ///
    /// Declared kinds are taken as-is; undeclared columns go through [`classify`].
    pub async fn resolve(&self, df: &DataFrame) -> HousingPrepResult<ResolvedSchema> {
        validate(df, &self.required_columns())?;
        let null_counts = crate::io::null_counts(df).await?;
        let total = crate::io::row_count(df).await?;

        let mut columns = Vec::new();
        for (field, (name, nulls)) in df.schema().fields().iter().zip(null_counts) {
            let kind = match self.kinds.get(&name) {
                Some(kind) => *kind,
                None => {
                    let non_null = total - nulls;
                    if non_null == 0 {
                        warn!("Column '{}' has no values; treating it as categorical", name);
                    }
                    classify(field.data_type(), non_null, None)
                }
            };
            debug!("Column '{}' ({}) resolved as {:?}", name, field.data_type(), kind);
            columns.push((name, kind));
        }
        Ok(ResolvedSchema { columns })
    }
}

/// Every column of a dataset with its kind, in dataset order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSchema {
    pub columns: Vec<(String, ColumnKind)>,
}

impl ResolvedSchema {
    /// Kind of `name`, if the column is known.
    pub fn kind_of(&self, name: &str) -> Option<ColumnKind> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, kind)| *kind)
    }

    /// Names of numeric columns, in dataset order.
    pub fn numeric_columns(&self) -> Vec<String> {
        self.columns_of(ColumnKind::Numeric)
    }

    /// Names of categorical columns, in dataset order.
    pub fn categorical_columns(&self) -> Vec<String> {
        self.columns_of(ColumnKind::Categorical)
    }

    fn columns_of(&self, kind: ColumnKind) -> Vec<String> {
        self.columns
            .iter()
            .filter(|(_, k)| *k == kind)
            .map(|(name, _)| name.clone())
            .collect()
    }
}
