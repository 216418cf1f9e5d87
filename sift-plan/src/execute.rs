use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use sift_store::{batches_to_rows, ColumnarEngine, DataLocation, DATASET_TABLE};
use sift_types::Row;
use thiserror::Error;
use tracing::{debug, warn};

use crate::guard::{ensure_read_only, GuardViolation};

pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("statement rejected ({reason}): {statement}")]
    Rejected {
        statement: String,
        reason: GuardViolation,
    },
    #[error("engine failed: {message}")]
    Engine { statement: String, message: String },
    #[error("statement exceeded {timeout:?}")]
    Timeout { statement: String, timeout: Duration },
}

impl ExecutionError {
    /// The statement that failed, after placeholder substitution.
    pub fn statement(&self) -> &str {
        match self {
            ExecutionError::Rejected { statement, .. }
            | ExecutionError::Engine { statement, .. }
            | ExecutionError::Timeout { statement, .. } => statement,
        }
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\{\{\s*dataset\s*\}\}").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Replace every spelling of the dataset placeholder with the registered table name.
pub fn bind_dataset(template: &str) -> String {
    placeholder_pattern()
        .replace_all(template, DATASET_TABLE)
        .into_owned()
}

/// The single execution primitive shared by analysis plans and hypothesis tests.
#[derive(Clone)]
pub struct PlanExecutor {
    engine: Arc<dyn ColumnarEngine>,
    timeout: Duration,
}

impl PlanExecutor {
    pub fn new(engine: Arc<dyn ColumnarEngine>) -> Self {
        Self {
            engine,
            timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bind, guard and run `template` against `location`, returning rows in order.
    pub async fn execute(
        &self,
        template: &str,
        location: &DataLocation,
    ) -> Result<Vec<Row>, ExecutionError> {
        let statement = bind_dataset(template);
        if let Err(reason) = ensure_read_only(&statement) {
            warn!(%reason, %statement, "statement rejected by read-only guard");
            return Err(ExecutionError::Rejected { statement, reason });
        }

        let run = self.engine.execute(&statement, location);
        let batches = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(batches)) => batches,
            Ok(Err(err)) => {
                return Err(ExecutionError::Engine {
                    statement,
                    message: err.message,
                })
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, %statement, "statement timed out");
                return Err(ExecutionError::Timeout {
                    statement,
                    timeout: self.timeout,
                });
            }
        };

        let rows = batches_to_rows(&batches);
        debug!(rows = rows.len(), "statement executed");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use sift_store::{ArrowBatchHandle, DataFusionEngine, EngineError};
    use std::io::Write;

    struct StalledEngine;

    #[async_trait]
    impl ColumnarEngine for StalledEngine {
        async fn execute(
            &self,
            _sql: &str,
            _location: &DataLocation,
        ) -> Result<Vec<ArrowBatchHandle>, EngineError> {
            std::future::pending().await
        }
    }

    fn sales_csv() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "region,revenue").unwrap();
        writeln!(file, "EU,100").unwrap();
        writeln!(file, "US,250").unwrap();
        writeln!(file, "EU,50").unwrap();
        file
    }

    #[test]
    fn placeholder_spellings_bind_to_dataset_table() {
        assert_eq!(
            bind_dataset("SELECT * FROM {{DATASET}} JOIN {{ dataset }} USING (x)"),
            "SELECT * FROM dataset JOIN dataset USING (x)"
        );
    }

    #[tokio::test]
    async fn executes_template_against_location() {
        let file = sales_csv();
        let location = DataLocation::from_path(file.path()).unwrap();
        let executor = PlanExecutor::new(Arc::new(DataFusionEngine::new()));

        let rows = executor
            .execute(
                "SELECT region, SUM(revenue) AS revenue FROM {{DATASET}} GROUP BY region ORDER BY revenue DESC",
                &location,
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["region"], json!("US"));
        assert_eq!(rows[0]["revenue"], json!(250));
        assert_eq!(rows[1]["revenue"], json!(150));
    }

    #[tokio::test]
    async fn write_statements_never_reach_the_engine() {
        let location = DataLocation::from_path("unused.csv").unwrap();
        let executor = PlanExecutor::new(Arc::new(StalledEngine));

        let err = executor
            .execute("DELETE FROM {{DATASET}}", &location)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Rejected { .. }));
        assert_eq!(err.statement(), "DELETE FROM dataset");
    }

    #[tokio::test]
    async fn unknown_column_surfaces_engine_error() {
        let file = sales_csv();
        let location = DataLocation::from_path(file.path()).unwrap();
        let executor = PlanExecutor::new(Arc::new(DataFusionEngine::new()));

        let err = executor
            .execute("SELECT margin FROM {{DATASET}}", &location)
            .await
            .unwrap_err();
        match err {
            ExecutionError::Engine { statement, message } => {
                assert_eq!(statement, "SELECT margin FROM dataset");
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_statements_time_out() {
        let location = DataLocation::from_path("unused.csv").unwrap();
        let executor =
            PlanExecutor::new(Arc::new(StalledEngine)).with_timeout(Duration::from_secs(5));

        let err = executor
            .execute("SELECT 1 FROM {{DATASET}}", &location)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout { timeout, .. } if timeout == Duration::from_secs(5)));
    }
}
