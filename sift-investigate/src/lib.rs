//! Investigation engine for causal questions: hypothesis generation with retries,
//! testing through the shared execution primitive, evidence scoring and ranking.

pub mod engine;
pub use engine::{
    HypothesisOracle, InvestigationEngine, InvestigationError, InvestigationInput,
    InvestigationSettings, Phase, SAMPLE_ROWS,
};

pub mod evidence;
pub use evidence::{evaluate_evidence, extract_numeric, Evidence};

pub mod rank;
pub use rank::rank;

pub mod retry;
pub use retry::{retry_async, RetryExhausted, RetryPolicy};
