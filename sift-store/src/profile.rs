use arrow::datatypes::DataType;
use sift_types::SchemaContext;
use tracing::debug;

use crate::datafusion_engine::open_session;
use crate::{DataLocation, EngineError, DATASET_TABLE};

/// Derive a schema context from the file's inferred Arrow schema.
///
/// Numeric columns become metrics unless they look like identifiers; strings and
/// booleans become dimensions; the first temporal column (or date-named string column)
/// becomes the time column.
pub async fn profile_schema(
    location: &DataLocation,
    domain: &str,
) -> Result<SchemaContext, EngineError> {
    let ctx = open_session(location).await?;
    let df = ctx
        .table(DATASET_TABLE)
        .await
        .map_err(|e| EngineError::new(e.to_string()))?;

    let mut schema = SchemaContext {
        domain: domain.to_string(),
        ..SchemaContext::default()
    };

    for field in df.schema().fields() {
        let name = field.name().clone();
        let data_type = field.data_type();
        if data_type.is_temporal() {
            if schema.time_column.is_none() {
                schema.time_column = Some(name);
            } else {
                schema.dimensions.push(name);
            }
        } else if data_type.is_numeric() {
            if looks_like_identifier(&name) {
                schema.dimensions.push(name);
            } else {
                schema.metrics.push(name);
            }
        } else if is_textual(data_type) && schema.time_column.is_none() && looks_like_date(&name) {
            schema.time_column = Some(name);
        } else {
            schema.dimensions.push(name);
        }
    }

    debug!(
        metrics = schema.metrics.len(),
        dimensions = schema.dimensions.len(),
        time_column = ?schema.time_column,
        "profiled dataset schema"
    );
    Ok(schema)
}

fn is_textual(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View
    )
}

fn looks_like_identifier(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "id" || lower.ends_with("_id") || lower.ends_with(" id") || lower == "year"
}

fn looks_like_date(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.contains("date") || lower == "month" || lower == "period" || lower.ends_with("_at")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn classifies_columns() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "order_id,order_date,region,revenue,units").unwrap();
        writeln!(file, "1,2024-01-03,EU,120.5,2").unwrap();
        writeln!(file, "2,2024-02-11,US,80,1").unwrap();
        file.flush().unwrap();

        let location = DataLocation::from_path(file.path()).unwrap();
        let schema = profile_schema(&location, "retail").await.unwrap();

        assert_eq!(schema.metrics, vec!["revenue", "units"]);
        assert!(schema.dimensions.contains(&"region".to_string()));
        assert!(schema.dimensions.contains(&"order_id".to_string()));
        assert_eq!(schema.time_column.as_deref(), Some("order_date"));
        assert_eq!(schema.domain, "retail");
    }
}
