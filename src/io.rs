//! ## Reading and writing tabular records
//!
//! Datasets are loaded into DataFusion [`DataFrame`]s from CSV (UTF-8, comma-delimited, with a
//! header row) or Parquet files, chosen by file extension.
//!
//! Writing is split into two halves so that orchestrators never leave partial output behind:
//!
//! - [`stage_batches`] writes fully materialized record batches into a temporary file inside the
//!   destination directory (creating missing directories first);
//! - [`persist_staged`] atomically renames the staged file onto its destination.
//!
//! [`save`] does both for a single frame. The column helpers ([`numeric_values`],
//! [`string_values`]) collect one column into plain Rust values for statistics.

use crate::exceptions::{HousingPrepError, HousingPrepResult};
use arrow::array::{Array, ArrayRef, Float64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::logical_expr::{cast, ident};
use datafusion::prelude::*;
use parquet::arrow::ArrowWriter;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::info;

/// Name of the leading row-number column written when `include_index` is set.
pub const INDEX_COLUMN: &str = "index";

/// On-disk formats understood by the IO layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Parquet,
}

impl FileFormat {
    /// Detects the format from the file extension.
    pub fn from_path(path: &Path) -> HousingPrepResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Ok(FileFormat::Csv),
            Some(ext) if ext.eq_ignore_ascii_case("parquet") => Ok(FileFormat::Parquet),
            _ => Err(HousingPrepError::UnsupportedFormat(format!(
                "'{}' is neither a .csv nor a .parquet file",
                path.display()
            ))),
        }
    }
}

fn path_str(path: &Path) -> HousingPrepResult<&str> {
    path.to_str().ok_or_else(|| {
        HousingPrepError::InvalidParameter(format!("Path '{}' is not valid UTF-8", path.display()))
    })
}

/// A session that keeps every plan in a single partition.
///
/// Datasets are ordered: row `i` of every column read back from a frame must belong to the same
/// record, and first-seen tie-breaks depend on file order. Multiple partitions would let
/// `collect` interleave batches in arrival order.
pub fn session() -> SessionContext {
    let config = SessionConfig::new()
        .with_target_partitions(1)
        .with_repartition_file_scans(false)
        .with_round_robin_repartition(false);
    SessionContext::new_with_config(config)
}

/// Loads a dataset from a CSV or Parquet file.
///
/// A missing file is reported as an I/O error before DataFusion is involved; malformed content
/// surfaces as a DataFusion or Arrow error.
pub async fn load(path: impl AsRef<Path>) -> HousingPrepResult<DataFrame> {
    let path = path.as_ref();
    let format = FileFormat::from_path(path)?;
    if !path.is_file() {
        return Err(HousingPrepError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("No such file: {}", path.display()),
        )));
    }
    info!("Loading {:?} dataset from {}", format, path.display());
    let ctx = session();
    let df = match format {
        FileFormat::Csv => ctx.read_csv(path_str(path)?, CsvReadOptions::new()).await?,
        FileFormat::Parquet => {
            ctx.read_parquet(path_str(path)?, ParquetReadOptions::default())
                .await?
        }
    };
    Ok(df)
}

/// Materializes `df` and writes it to `path` atomically.
pub async fn save(df: DataFrame, path: impl AsRef<Path>, include_index: bool) -> HousingPrepResult<()> {
    let path = path.as_ref();
    let schema: SchemaRef = Arc::new(Schema::from(df.schema()));
    let batches = df.collect().await?;
    let staged = stage_batches(&schema, &batches, path, include_index)?;
    persist_staged(staged, path)
}

/// Writes `batches` into a temporary file next to `path` and returns it unpersisted.
///
/// `schema` is only used when `batches` is empty, so that a header is still written.
pub fn stage_batches(
    schema: &SchemaRef,
    batches: &[RecordBatch],
    path: &Path,
    include_index: bool,
) -> HousingPrepResult<NamedTempFile> {
    let format = FileFormat::from_path(path)?;
    let dir = parent_dir(path);
    fs::create_dir_all(&dir)?;

    let schema = batches.first().map(|b| b.schema()).unwrap_or_else(|| schema.clone());
    let (schema, batches) = if include_index {
        with_index(&schema, batches)?
    } else {
        (schema, batches.to_vec())
    };

    let mut staged = NamedTempFile::new_in(&dir)?;
    match format {
        FileFormat::Csv => {
            let mut writer = arrow::csv::WriterBuilder::new()
                .with_header(true)
                .build(staged.as_file_mut());
            if batches.is_empty() {
                writer.write(&RecordBatch::new_empty(schema.clone()))?;
            }
            for batch in &batches {
                writer.write(batch)?;
            }
        }
        FileFormat::Parquet => {
            let mut writer = ArrowWriter::try_new(staged.as_file_mut(), schema.clone(), None)?;
            for batch in &batches {
                writer.write(batch)?;
            }
            writer.close()?;
        }
    }
    staged.as_file_mut().sync_all()?;
    Ok(staged)
}

/// Atomically moves a staged file onto `path`.
pub fn persist_staged(staged: NamedTempFile, path: &Path) -> HousingPrepResult<()> {
    staged.persist(path).map_err(|e| HousingPrepError::IoError(e.error))?;
    info!("Wrote {}", path.display());
    Ok(())
}

/// Writes raw bytes to `path` atomically, creating missing directories.
pub fn write_bytes_atomic(bytes: &[u8], path: &Path) -> HousingPrepResult<()> {
    let staged = stage_bytes(bytes, path)?;
    persist_staged(staged, path)
}

/// Writes raw bytes into a temporary file next to `path`.
pub fn stage_bytes(bytes: &[u8], path: &Path) -> HousingPrepResult<NamedTempFile> {
    use std::io::Write;

    let dir = parent_dir(path);
    fs::create_dir_all(&dir)?;
    let mut staged = NamedTempFile::new_in(&dir)?;
    staged.write_all(bytes)?;
    staged.as_file_mut().sync_all()?;
    Ok(staged)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn with_index(
    schema: &SchemaRef,
    batches: &[RecordBatch],
) -> HousingPrepResult<(SchemaRef, Vec<RecordBatch>)> {
    let mut fields = vec![Arc::new(Field::new(INDEX_COLUMN, DataType::UInt64, false))];
    fields.extend(schema.fields().iter().cloned());
    let indexed: SchemaRef = Arc::new(Schema::new(fields));

    let mut offset = 0u64;
    let mut out = Vec::with_capacity(batches.len());
    for batch in batches {
        let rows = batch.num_rows() as u64;
        let index: ArrayRef = Arc::new(UInt64Array::from_iter_values(offset..offset + rows));
        let mut columns = vec![index];
        columns.extend(batch.columns().iter().cloned());
        out.push(RecordBatch::try_new(indexed.clone(), columns)?);
        offset += rows;
    }
    Ok((indexed, out))
}

/// Collects a column as `f64` values (nulls as `None`), in row order.
pub async fn numeric_values(df: &DataFrame, name: &str) -> HousingPrepResult<Vec<Option<f64>>> {
    let batches = df
        .clone()
        .select(vec![cast(ident(name), DataType::Float64).alias(name)])?
        .collect()
        .await?;
    let mut values = Vec::new();
    for batch in &batches {
        let array = batch
            .column(0)
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| {
                HousingPrepError::InvalidParameter(format!("Column '{}' is not numeric", name))
            })?;
        values.extend(array.iter());
    }
    Ok(values)
}

/// Collects a column as strings (nulls as `None`), in row order.
pub async fn string_values(df: &DataFrame, name: &str) -> HousingPrepResult<Vec<Option<String>>> {
    let batches = df
        .clone()
        .select(vec![cast(ident(name), DataType::Utf8).alias(name)])?
        .collect()
        .await?;
    let mut values = Vec::new();
    for batch in &batches {
        let array = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| {
                HousingPrepError::InvalidParameter(format!(
                    "Column '{}' cannot be read as text",
                    name
                ))
            })?;
        values.extend(array.iter().map(|v| v.map(str::to_string)));
    }
    Ok(values)
}

/// Number of null cells per column, for every column of `df`.
pub async fn null_counts(df: &DataFrame) -> HousingPrepResult<Vec<(String, usize)>> {
    let batches = df.clone().collect().await?;
    let names: Vec<String> = df
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().to_string())
        .collect();
    let mut counts = vec![0usize; names.len()];
    for batch in &batches {
        for (i, column) in batch.columns().iter().enumerate() {
            counts[i] += column.null_count();
        }
    }
    Ok(names.into_iter().zip(counts).collect())
}

/// Total number of rows in `df`.
pub async fn row_count(df: &DataFrame) -> HousingPrepResult<usize> {
    Ok(df.clone().count().await?)
}

/// Wraps already materialized batches in a DataFrame without re-reading anything.
pub fn frame_from_batches(schema: SchemaRef, batches: Vec<RecordBatch>) -> HousingPrepResult<DataFrame> {
    let table = MemTable::try_new(schema, vec![batches])?;
    let ctx = session();
    Ok(ctx.read_table(Arc::new(table))?)
}
