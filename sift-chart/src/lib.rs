//! Chart contract: normalization of engine rows, validation, and synthetic fallback.

pub mod coerce;
pub use coerce::{as_label, as_number, number_or_zero, parse_amount};

pub mod normalize;
pub use normalize::{normalize_rows, ChartNormalizer, NameRule, PointNormalizer, ValueRule};

pub mod synthetic;
pub use synthetic::synthetic_series;

pub mod validate;
pub use validate::{validate_points, ValidationError};
