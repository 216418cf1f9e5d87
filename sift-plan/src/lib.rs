//! Plan compiler: turns an interpreted intent into a deterministic, read-only
//! statement and runs statements through the shared execution primitive.

pub mod compile;
pub use compile::{
    quote_ident, quote_literal, CompiledPlan, PlanCompiler, COUNT_COLUMN, DEFAULT_MAX_ROWS,
    LABEL_COLUMN, PERIOD_COLUMN,
};

pub mod execute;
pub use execute::{bind_dataset, ExecutionError, PlanExecutor, DEFAULT_STATEMENT_TIMEOUT};

pub mod guard;
pub use guard::{ensure_read_only, GuardViolation};

pub mod validate;
pub use validate::{validate, ValidatedIntent};

pub use sift_types::DATASET_PLACEHOLDER;
