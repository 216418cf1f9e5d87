use serde::Serialize;
use serde_json::Value;
use sift_types::{Aggregation, Filter, FilterOperator, IntentKind, QueryIntent, SchemaContext};
use tracing::debug;

use crate::validate::{validate, ValidatedIntent};
use crate::DATASET_PLACEHOLDER;

pub const DEFAULT_MAX_ROWS: u32 = 500;
pub const DEFAULT_RANKING_LIMIT: u32 = 10;

/// Output column for trend buckets.
pub const PERIOD_COLUMN: &str = "period";
/// Output column naming the single row of an ungrouped summary.
pub const LABEL_COLUMN: &str = "label";
/// Output column used when the schema has no metric to aggregate.
pub const COUNT_COLUMN: &str = "count";

/// A statement template plus the column roles the normalizer needs to read its rows.
#[derive(Clone, Debug, Serialize)]
pub struct CompiledPlan {
    /// SQL with the dataset placeholder still in place.
    pub statement: String,
    pub intent: QueryIntent,
    /// Output columns holding metric values, in projection order.
    pub metrics: Vec<String>,
    /// Output columns that name each row, in projection order.
    pub dimensions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct PlanCompiler {
    max_rows: u32,
}

impl Default for PlanCompiler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ROWS)
    }
}

impl PlanCompiler {
    pub fn new(max_rows: u32) -> Self {
        Self {
            max_rows: max_rows.max(1),
        }
    }

    pub fn max_rows(&self) -> u32 {
        self.max_rows
    }

    /// Validate `intent` against `schema` and lower it to a read-only SELECT.
    pub fn compile(&self, intent: &QueryIntent, schema: &SchemaContext) -> CompiledPlan {
        let validated = validate(intent, schema);
        let plan = self.lower(&validated);
        debug!(kind = ?validated.kind, statement = %plan.statement, "compiled plan");
        plan
    }

    fn lower(&self, v: &ValidatedIntent) -> CompiledPlan {
        let mut projection = Vec::new();
        let mut group_by = Vec::new();
        let mut order_by = None;
        let mut dimensions = Vec::new();

        match (v.kind, &v.time_dimension) {
            (IntentKind::Trend, Some(time)) => {
                let bucket = format!(
                    "date_trunc('{}', CAST({} AS TIMESTAMP))",
                    v.time_grain.as_str(),
                    quote_ident(time)
                );
                projection.push(format!("{bucket} AS {}", quote_ident(PERIOD_COLUMN)));
                group_by.push(bucket);
                order_by = Some(format!("{} ASC", quote_ident(PERIOD_COLUMN)));
                dimensions.push(PERIOD_COLUMN.to_string());
            }
            _ if v.dimensions.is_empty() => {
                projection.push(format!("'Total' AS {}", quote_ident(LABEL_COLUMN)));
                dimensions.push(LABEL_COLUMN.to_string());
            }
            _ => {
                for dim in &v.dimensions {
                    projection.push(quote_ident(dim));
                    group_by.push(quote_ident(dim));
                    dimensions.push(dim.clone());
                }
            }
        }

        let mut metrics = Vec::new();
        if v.metrics.is_empty() {
            projection.push(format!("COUNT(*) AS {}", quote_ident(COUNT_COLUMN)));
            metrics.push(COUNT_COLUMN.to_string());
        } else {
            for metric in &v.metrics {
                let alias = aggregate_alias(metric, v.aggregation, &dimensions);
                projection.push(format!(
                    "{}({}) AS {}",
                    v.aggregation.sql_fn(),
                    quote_ident(metric),
                    quote_ident(&alias)
                ));
                metrics.push(alias);
            }
        }

        if order_by.is_none() && !group_by.is_empty() {
            order_by = Some(format!("{} DESC", quote_ident(&metrics[0])));
        }

        let mut sql = format!(
            "SELECT {} FROM {}",
            projection.join(", "),
            DATASET_PLACEHOLDER
        );
        let predicates: Vec<String> = v.filters.iter().filter_map(predicate).collect();
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        if !group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&group_by.join(", "));
        }
        if let Some(order) = order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }
        sql.push_str(&format!(" LIMIT {}", self.row_limit(v)));

        let mut intent = v.to_intent();
        if v.aggregation != Aggregation::Count && v.metrics.is_empty() {
            intent.aggregation = Aggregation::Count;
        }

        CompiledPlan {
            statement: sql,
            intent,
            metrics,
            dimensions,
            dropped: v.dropped.clone(),
        }
    }

    fn row_limit(&self, v: &ValidatedIntent) -> u32 {
        let requested = match (v.limit, v.kind) {
            (Some(n), _) => n,
            (None, IntentKind::Ranking) => DEFAULT_RANKING_LIMIT,
            (None, _) => self.max_rows,
        };
        requested.clamp(1, self.max_rows)
    }
}

/// Output name for an aggregated metric. It keeps the metric's name unless that
/// would shadow a projected row-naming column, e.g. `COUNT("region")` grouped by region.
fn aggregate_alias(metric: &str, aggregation: Aggregation, taken: &[String]) -> String {
    if taken.iter().any(|t| t.eq_ignore_ascii_case(metric)) {
        format!("{metric}_{}", aggregation.sql_fn().to_ascii_lowercase())
    } else {
        metric.to_string()
    }
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a scalar as a SQL literal. Non-scalars have no literal form.
pub fn quote_literal(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("TRUE".to_string()),
        Value::Bool(false) => Some("FALSE".to_string()),
        _ => None,
    }
}

fn predicate(filter: &Filter) -> Option<String> {
    let column = quote_ident(&filter.column);
    match &filter.operator {
        FilterOperator::Contains => {
            let needle = match &filter.value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some(format!(
                "CAST({column} AS VARCHAR) ILIKE '%{}%'",
                needle.replace('\'', "''")
            ))
        }
        FilterOperator::Unknown(_) => None,
        op => {
            let literal = quote_literal(&filter.value)?;
            Some(format!("{column} {} {literal}", op.as_str()))
        }
    }
}
