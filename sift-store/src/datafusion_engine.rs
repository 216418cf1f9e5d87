use std::sync::Arc;

use async_trait::async_trait;
use datafusion::execution::context::SQLOptions;
use datafusion::prelude::{CsvReadOptions, ParquetReadOptions, SessionContext};
use tracing::debug;

use crate::{ArrowBatchHandle, ColumnarEngine, DataLocation, EngineError, FileFormat, DATASET_TABLE};

/// DataFusion-backed engine reading CSV or Parquet files.
///
/// Every call builds its own `SessionContext` and drops it before returning, on the
/// success path and on every error path alike. Nothing is shared between calls.
#[derive(Clone, Debug, Default)]
pub struct DataFusionEngine;

impl DataFusionEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Fresh session with `location` registered as [`DATASET_TABLE`].
pub(crate) async fn open_session(location: &DataLocation) -> Result<SessionContext, EngineError> {
    let ctx = SessionContext::new();
    let path = location.path.to_str().ok_or_else(|| {
        EngineError::new(format!("non utf-8 dataset path: {}", location.path.display()))
    })?;

    let registered = match location.format {
        FileFormat::Csv => {
            ctx.register_csv(DATASET_TABLE, path, CsvReadOptions::new())
                .await
        }
        FileFormat::Parquet => {
            ctx.register_parquet(DATASET_TABLE, path, ParquetReadOptions::default())
                .await
        }
    };
    registered.map_err(|e| EngineError::new(format!("register {path}: {e}")))?;
    Ok(ctx)
}

#[async_trait]
impl ColumnarEngine for DataFusionEngine {
    async fn execute(
        &self,
        sql: &str,
        location: &DataLocation,
    ) -> Result<Vec<ArrowBatchHandle>, EngineError> {
        let ctx = open_session(location).await?;

        // The engine refuses anything but queries even if a statement slips past the compiler.
        let options = SQLOptions::new()
            .with_allow_ddl(false)
            .with_allow_dml(false)
            .with_allow_statements(false);

        let df = ctx
            .sql_with_options(sql, options)
            .await
            .map_err(|e| EngineError::new(e.to_string()))?;
        let batches = df
            .collect()
            .await
            .map_err(|e| EngineError::new(e.to_string()))?;

        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        debug!(rows, batches = batches.len(), "statement executed");

        Ok(batches.into_iter().map(Arc::new).collect())
    }
}
