use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sift_types::SchemaContext;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::DataLocation;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),
    #[error("catalog backend error: {0}")]
    Backend(String),
}

/// A dataset version as the pipeline sees it: where the data lives and what it contains.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub id: String,
    pub location: DataLocation,
    pub schema: SchemaContext,
}

/// Provider of schema context and data location per dataset id.
#[async_trait]
pub trait DatasetCatalog: Send + Sync {
    async fn lookup(&self, dataset_id: &str) -> Result<DatasetEntry, CatalogError>;
}

/// Catalog held in process memory, populated at startup or by the host application.
#[derive(Default)]
pub struct InMemoryCatalog {
    datasets: RwLock<HashMap<String, DatasetEntry>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a dataset entry.
    pub async fn register(&self, entry: DatasetEntry) {
        let mut datasets = self.datasets.write().await;
        datasets.insert(entry.id.clone(), entry);
    }

    pub async fn remove(&self, dataset_id: &str) -> Option<DatasetEntry> {
        self.datasets.write().await.remove(dataset_id)
    }
}

#[async_trait]
impl DatasetCatalog for InMemoryCatalog {
    async fn lookup(&self, dataset_id: &str) -> Result<DatasetEntry, CatalogError> {
        let datasets = self.datasets.read().await;
        datasets
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownDataset(dataset_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_lookup() {
        let catalog = InMemoryCatalog::new();
        catalog
            .register(DatasetEntry {
                id: "sales".into(),
                location: DataLocation::from_path("/tmp/sales.csv").unwrap(),
                schema: SchemaContext::default(),
            })
            .await;

        assert!(catalog.lookup("sales").await.is_ok());
        assert!(matches!(
            catalog.lookup("missing").await,
            Err(CatalogError::UnknownDataset(id)) if id == "missing"
        ));
    }
}
