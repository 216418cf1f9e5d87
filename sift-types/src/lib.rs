use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Placeholder standing in for the dataset table in statement templates.
pub const DATASET_PLACEHOLDER: &str = "{{DATASET}}";

/// One result row: column name → JSON value, in projection order.
pub type Row = serde_json::Map<String, Value>;

/// What the profiling collaborator knows about a dataset. Read-only to the pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContext {
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default, alias = "timeColumn")]
    pub time_column: Option<String>,
    #[serde(default)]
    pub domain: String,
}

impl SchemaContext {
    /// Canonical spelling of a metric column, matched case-insensitively.
    pub fn resolve_metric(&self, name: &str) -> Option<&str> {
        find_ci(&self.metrics, name)
    }

    pub fn resolve_dimension(&self, name: &str) -> Option<&str> {
        find_ci(&self.dimensions, name)
    }

    pub fn resolve_time_column(&self, name: &str) -> Option<&str> {
        self.time_column
            .as_deref()
            .filter(|t| t.eq_ignore_ascii_case(name.trim()))
    }

    /// Any known column: metric, dimension or the time column.
    pub fn resolve_column(&self, name: &str) -> Option<&str> {
        self.resolve_metric(name)
            .or_else(|| self.resolve_dimension(name))
            .or_else(|| self.resolve_time_column(name))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.metrics
            .iter()
            .chain(self.dimensions.iter())
            .chain(self.time_column.iter())
            .map(String::as_str)
    }
}

fn find_ci<'a>(names: &'a [String], wanted: &str) -> Option<&'a str> {
    let wanted = wanted.trim();
    names
        .iter()
        .find(|n| n.eq_ignore_ascii_case(wanted))
        .map(String::as_str)
}

/// Shape of analysis the question asks for.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum IntentKind {
    #[default]
    Summary,
    Trend,
    Comparison,
    Ranking,
    Distribution,
}

impl From<String> for IntentKind {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trend" | "timeseries" | "time_series" => IntentKind::Trend,
            "comparison" | "compare" => IntentKind::Comparison,
            "ranking" | "rank" | "top" => IntentKind::Ranking,
            "distribution" | "breakdown" => IntentKind::Distribution,
            _ => IntentKind::Summary,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", from = "String")]
pub enum Aggregation {
    #[default]
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl Aggregation {
    pub fn sql_fn(self) -> &'static str {
        match self {
            Aggregation::Sum => "SUM",
            Aggregation::Avg => "AVG",
            Aggregation::Count => "COUNT",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
        }
    }
}

impl From<String> for Aggregation {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "avg" | "average" | "mean" => Aggregation::Avg,
            "count" => Aggregation::Count,
            "min" | "minimum" => Aggregation::Min,
            "max" | "maximum" => Aggregation::Max,
            _ => Aggregation::Sum,
        }
    }
}

/// Bucket size for trend plans.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum TimeGrain {
    Day,
    Week,
    #[default]
    Month,
    Quarter,
    Year,
}

impl TimeGrain {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeGrain::Day => "day",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
            TimeGrain::Quarter => "quarter",
            TimeGrain::Year => "year",
        }
    }
}

impl From<String> for TimeGrain {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => TimeGrain::Day,
            "week" | "weekly" => TimeGrain::Week,
            "quarter" | "quarterly" => TimeGrain::Quarter,
            "year" | "yearly" | "annual" => TimeGrain::Year,
            _ => TimeGrain::Month,
        }
    }
}

/// Closed set of filter comparisons. Anything else parses to `Unknown` and is dropped.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum FilterOperator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Unknown(String),
}

impl FilterOperator {
    pub fn as_str(&self) -> &str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::NotEq => "!=",
            FilterOperator::Gt => ">",
            FilterOperator::Gte => ">=",
            FilterOperator::Lt => "<",
            FilterOperator::Lte => "<=",
            FilterOperator::Contains => "contains",
            FilterOperator::Unknown(op) => op,
        }
    }
}

impl From<String> for FilterOperator {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "eq" | "equals" | "is" => FilterOperator::Eq,
            "!=" | "<>" | "ne" | "neq" | "not_equals" => FilterOperator::NotEq,
            ">" | "gt" => FilterOperator::Gt,
            ">=" | "gte" => FilterOperator::Gte,
            "<" | "lt" => FilterOperator::Lt,
            "<=" | "lte" => FilterOperator::Lte,
            "contains" | "like" | "ilike" => FilterOperator::Contains,
            _ => FilterOperator::Unknown(s),
        }
    }
}

impl Serialize for FilterOperator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

/// Structured interpretation of a question.
///
/// Deserialization never fails on a single bad field: each field falls back to its
/// default so that a partially wrong interpretation still yields a partial answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryIntent {
    #[serde(default, deserialize_with = "lenient")]
    pub intent: IntentKind,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub metrics: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub dimensions: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub aggregation: Aggregation,
    #[serde(default, deserialize_with = "lenient_list")]
    pub filters: Vec<Filter>,
    #[serde(default, deserialize_with = "lenient", alias = "timeDimension")]
    pub time_dimension: Option<String>,
    #[serde(default, deserialize_with = "lenient", alias = "timeGrain")]
    pub time_grain: TimeGrain,
    #[serde(default, deserialize_with = "lenient")]
    pub limit: Option<u32>,
}

impl QueryIntent {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.dimensions.is_empty() && self.time_dimension.is_none()
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let out = match Value::deserialize(deserializer)? {
        Value::String(s) => vec![s],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    Ok(out
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect()),
        _ => Ok(Vec::new()),
    }
}

/// Canonical unit every chart consumes.
///
/// Invariant: `value` and every extra are finite; `name` is non-empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartDataPoint {
    pub name: String,
    pub value: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, f64>,
}

impl ChartDataPoint {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: f64) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Why a response carries placeholder data instead of real rows.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    InterpretationFailure,
    ExecutionError,
    ValidationFailure,
}

/// Provenance of the chart data in a response.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum ResultOrigin {
    /// Real rows from the engine.
    Live,
    /// The statement ran and matched nothing.
    NoMatches,
    Synthetic { fallback_reason: FallbackReason },
}

impl ResultOrigin {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, ResultOrigin::Synthetic { .. })
    }
}

/// Hypothesis as proposed by the oracle, before testing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HypothesisDraft {
    pub hypothesis: String,
    #[serde(alias = "query", alias = "sql", alias = "testQuery")]
    pub test_query: String,
}

/// A tested candidate explanation. Immutable once scored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    pub hypothesis: String,
    pub test_query: String,
    pub evidence: Option<Vec<Row>>,
    pub strength: u8,
    pub confidence: u8,
    pub conclusion: String,
}

impl Hypothesis {
    /// Ranking score: strength weighted by confidence.
    pub fn score(&self) -> f64 {
        f64::from(self.strength) * f64::from(self.confidence) / 100.0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InvestigationResult {
    pub primary_cause: Option<Hypothesis>,
    pub secondary_causes: Vec<Hypothesis>,
    pub unproven_hypotheses: Vec<Hypothesis>,
    pub overall_confidence: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn intent_tolerates_bad_fields() {
        let intent: QueryIntent = serde_json::from_value(json!({
            "intent": "Ranking",
            "metrics": "revenue",
            "dimensions": ["region", 7, ""],
            "aggregation": null,
            "filters": [
                {"column": "region", "operator": "==", "value": "EU"},
                {"nonsense": true}
            ],
            "limit": "ten"
        }))
        .unwrap();

        assert_eq!(intent.intent, IntentKind::Ranking);
        assert_eq!(intent.metrics, vec!["revenue"]);
        assert_eq!(intent.dimensions, vec!["region"]);
        assert_eq!(intent.aggregation, Aggregation::Sum);
        assert_eq!(intent.filters.len(), 1);
        assert_eq!(intent.filters[0].operator, FilterOperator::Eq);
        assert_eq!(intent.limit, None);
    }

    #[test]
    fn unknown_intent_is_summary() {
        let intent: QueryIntent = serde_json::from_value(json!({"intent": "forecast"})).unwrap();
        assert_eq!(intent.intent, IntentKind::Summary);
        assert!(intent.is_empty());
    }

    #[test]
    fn schema_resolution_is_case_insensitive() {
        let schema = SchemaContext {
            metrics: vec!["Revenue".into()],
            dimensions: vec!["Region".into()],
            time_column: Some("order_date".into()),
            domain: "retail".into(),
        };
        assert_eq!(schema.resolve_metric("revenue"), Some("Revenue"));
        assert_eq!(schema.resolve_column("ORDER_DATE"), Some("order_date"));
        assert_eq!(schema.resolve_dimension("revenue"), None);
    }

    #[test]
    fn origin_serializes_with_reason() {
        let origin = ResultOrigin::Synthetic {
            fallback_reason: FallbackReason::ExecutionError,
        };
        assert_eq!(
            serde_json::to_value(origin).unwrap(),
            json!({"origin": "synthetic", "fallback_reason": "execution_error"})
        );
    }
}
