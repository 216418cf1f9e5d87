use serde_json::Value;
use sift_types::{
    Aggregation, Filter, FilterOperator, IntentKind, QueryIntent, SchemaContext, TimeGrain,
};
use tracing::debug;

/// An intent whose every column reference exists in the schema context.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedIntent {
    pub kind: IntentKind,
    /// Canonical metric names. Empty only when the schema has no metrics, in which
    /// case the plan counts rows.
    pub metrics: Vec<String>,
    pub dimensions: Vec<String>,
    pub time_dimension: Option<String>,
    pub aggregation: Aggregation,
    pub time_grain: TimeGrain,
    pub filters: Vec<Filter>,
    pub limit: Option<u32>,
    /// References dropped during validation, for logs and the response payload.
    pub dropped: Vec<String>,
}

impl ValidatedIntent {
    /// Echo of the interpretation that was actually executed.
    pub fn to_intent(&self) -> QueryIntent {
        QueryIntent {
            intent: self.kind,
            metrics: self.metrics.clone(),
            dimensions: self.dimensions.clone(),
            aggregation: self.aggregation,
            filters: self.filters.clone(),
            time_dimension: self.time_dimension.clone(),
            time_grain: self.time_grain,
            limit: self.limit,
        }
    }
}

fn push_unique(out: &mut Vec<String>, name: &str) {
    if !out.iter().any(|n| n == name) {
        out.push(name.to_string());
    }
}

/// Drop every reference the schema does not know and substitute safe defaults.
///
/// Never fails: a partially wrong interpretation still compiles to a partial answer.
pub fn validate(intent: &QueryIntent, schema: &SchemaContext) -> ValidatedIntent {
    let mut dropped = Vec::new();

    let mut metrics = Vec::new();
    for name in &intent.metrics {
        let resolved = if intent.aggregation == Aggregation::Count {
            schema.resolve_column(name)
        } else {
            schema.resolve_metric(name)
        };
        match resolved {
            Some(canonical) => push_unique(&mut metrics, canonical),
            None => dropped.push(format!("metric:{name}")),
        }
    }
    if metrics.is_empty() {
        if let Some(first) = schema.metrics.first() {
            metrics.push(first.clone());
        }
    }

    let mut dimensions = Vec::new();
    for name in &intent.dimensions {
        match schema
            .resolve_dimension(name)
            .or_else(|| schema.resolve_time_column(name))
        {
            Some(canonical) => push_unique(&mut dimensions, canonical),
            None => dropped.push(format!("dimension:{name}")),
        }
    }

    let mut time_dimension = None;
    if let Some(name) = &intent.time_dimension {
        match schema
            .resolve_time_column(name)
            .or_else(|| schema.resolve_dimension(name))
        {
            Some(canonical) => time_dimension = Some(canonical.to_string()),
            None => dropped.push(format!("time_dimension:{name}")),
        }
    }

    let mut filters = Vec::new();
    for filter in &intent.filters {
        let Some(column) = schema.resolve_column(&filter.column) else {
            dropped.push(format!("filter:{}", filter.column));
            continue;
        };
        if matches!(filter.operator, FilterOperator::Unknown(_)) || !is_scalar(&filter.value) {
            dropped.push(format!("filter:{}", filter.column));
            continue;
        }
        filters.push(Filter {
            column: column.to_string(),
            operator: filter.operator.clone(),
            value: filter.value.clone(),
        });
    }

    let mut kind = intent.intent;
    match kind {
        IntentKind::Trend => {
            if time_dimension.is_none() {
                time_dimension = schema.time_column.clone();
            }
            if time_dimension.is_none() {
                kind = if dimensions.is_empty() {
                    IntentKind::Summary
                } else {
                    IntentKind::Comparison
                };
            }
        }
        IntentKind::Comparison | IntentKind::Ranking | IntentKind::Distribution => {
            if dimensions.is_empty() {
                match schema.dimensions.first() {
                    Some(first) => dimensions.push(first.clone()),
                    None => kind = IntentKind::Summary,
                }
            }
        }
        IntentKind::Summary => {}
    }

    if !dropped.is_empty() {
        debug!(?dropped, "dropped unknown references from intent");
    }

    ValidatedIntent {
        kind,
        metrics,
        dimensions,
        time_dimension,
        aggregation: intent.aggregation,
        time_grain: intent.time_grain,
        filters,
        limit: intent.limit,
        dropped,
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}
