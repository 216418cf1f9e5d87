use std::time::Duration;

use sift_cache::RateLimited;
use sift_investigate::InvestigationError;
use sift_store::CatalogError;
use thiserror::Error;

/// Hard failures of the pipeline. Everything else degrades into a flagged result.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("rate limit exceeded, retry in {}s", retry_after.as_secs())]
    RateLimitExceeded { retry_after: Duration },
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),
    #[error("dataset catalog failed: {0}")]
    Catalog(String),
    #[error("hypothesis oracle exhausted after {attempts} attempts: {message}")]
    OracleExhausted { attempts: u32, message: String },
}

impl From<RateLimited> for AnalysisError {
    fn from(err: RateLimited) -> Self {
        AnalysisError::RateLimitExceeded {
            retry_after: err.retry_after,
        }
    }
}

impl From<CatalogError> for AnalysisError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::UnknownDataset(id) => AnalysisError::UnknownDataset(id),
            CatalogError::Backend(message) => AnalysisError::Catalog(message),
        }
    }
}

impl From<InvestigationError> for AnalysisError {
    fn from(err: InvestigationError) -> Self {
        match err {
            InvestigationError::OracleExhausted { attempts, last } => {
                AnalysisError::OracleExhausted {
                    attempts,
                    message: last.to_string(),
                }
            }
        }
    }
}
