use sift_types::ChartDataPoint;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("point {index} has an empty name")]
    EmptyName { index: usize },
    #[error("point {index} has non-finite value {value}")]
    NonFiniteValue { index: usize, value: f64 },
    #[error("point {index} has non-finite field {key}")]
    NonFiniteExtra { index: usize, key: String },
}

/// Check the chart contract. An empty sequence is valid: it means "no matches".
pub fn validate_points(points: &[ChartDataPoint]) -> Result<(), ValidationError> {
    for (index, point) in points.iter().enumerate() {
        if point.name.trim().is_empty() {
            return Err(ValidationError::EmptyName { index });
        }
        if !point.value.is_finite() {
            return Err(ValidationError::NonFiniteValue {
                index,
                value: point.value,
            });
        }
        if let Some((key, _)) = point.extra.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ValidationError::NonFiniteExtra {
                index,
                key: key.clone(),
            });
        }
    }
    Ok(())
}
