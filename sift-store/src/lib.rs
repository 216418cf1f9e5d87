use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod catalog;
pub use catalog::{CatalogError, DatasetCatalog, DatasetEntry, InMemoryCatalog};

pub mod datafusion_engine;
pub use datafusion_engine::DataFusionEngine;

pub mod profile;
pub use profile::profile_schema;

pub mod rows;
pub use rows::batches_to_rows;

pub type ArrowBatch = RecordBatch;
pub type ArrowBatchHandle = Arc<ArrowBatch>;

/// Name the data location is registered under for the duration of one call.
pub const DATASET_TABLE: &str = "dataset";

#[derive(Debug, Error)]
#[error("engine error: {message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Parquet,
}

/// Physical location of a dataset version.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DataLocation {
    pub path: PathBuf,
    pub format: FileFormat,
}

impl DataLocation {
    /// Infer the format from the file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let format = match ext.as_deref() {
            Some("csv") => FileFormat::Csv,
            Some("parquet") | Some("pq") => FileFormat::Parquet,
            other => {
                return Err(EngineError::new(format!(
                    "unsupported dataset format {other:?} for {}",
                    path.display()
                )))
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            format,
        })
    }
}

/// The columnar engine seam: one read-only statement per call, against one dataset.
#[async_trait]
pub trait ColumnarEngine: Send + Sync {
    /// Run `sql` with `location` registered as [`DATASET_TABLE`] and return Arrow batches.
    async fn execute(
        &self,
        sql: &str,
        location: &DataLocation,
    ) -> Result<Vec<ArrowBatchHandle>, EngineError>;
}

/// Engine that matches nothing. Useful for wiring demos without data.
pub struct NullEngine;

#[async_trait]
impl ColumnarEngine for NullEngine {
    async fn execute(
        &self,
        _sql: &str,
        _location: &DataLocation,
    ) -> Result<Vec<ArrowBatchHandle>, EngineError> {
        Ok(Vec::new())
    }
}
