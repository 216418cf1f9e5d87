//! The analysis kernel: wires the catalog, oracles, plan compiler, columnar engine,
//! chart normalizer, investigation engine, cache and rate limiter together.

pub mod causal;
pub use causal::is_causal_question;

pub mod config;
pub use config::{DatasetConfig, SiftConfig};

pub mod error;
pub use error::AnalysisError;

pub mod kernel;
pub use kernel::{points_as_rows, AnalysisKernel, AnalysisResponse, AskResponse, InterpretationOracle};
