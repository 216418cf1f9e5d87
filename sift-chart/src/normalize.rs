//! Row → chart point normalization as ordered rule lists. Each row takes the first
//! rule that yields a name and the first that yields a value.

use serde_json::Value;
use sift_types::{ChartDataPoint, Row};
use tracing::debug;

use crate::coerce::{as_label, as_number, number_or_zero};

/// Where a point's display name comes from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NameRule {
    /// Value of the first declared dimension.
    DeclaredDimension,
    /// An existing `name` field.
    NameField,
    /// Value of the row's first key.
    FirstKey,
    /// `Item N`, 1-based. Always matches.
    Ordinal,
}

/// Where a point's value comes from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueRule {
    /// The declared metric's field. Present but unparseable resolves to zero.
    DeclaredMetric,
    /// An existing `value` field.
    ValueField,
    /// The first numeric or currency field outside the declared dimensions.
    FirstNumeric,
}

pub const DEFAULT_NAME_RULES: &[NameRule] = &[
    NameRule::DeclaredDimension,
    NameRule::NameField,
    NameRule::FirstKey,
    NameRule::Ordinal,
];

pub const DEFAULT_VALUE_RULES: &[ValueRule] = &[
    ValueRule::DeclaredMetric,
    ValueRule::ValueField,
    ValueRule::FirstNumeric,
];

/// Turns engine rows into chart points. The kernel validates whatever comes back.
pub trait PointNormalizer: Send + Sync {
    fn normalize(
        &self,
        rows: &[Row],
        metrics: &[String],
        dimensions: &[String],
    ) -> Vec<ChartDataPoint>;
}

#[derive(Clone, Debug)]
pub struct ChartNormalizer {
    name_rules: Vec<NameRule>,
    value_rules: Vec<ValueRule>,
}

impl Default for ChartNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_NAME_RULES.to_vec(), DEFAULT_VALUE_RULES.to_vec())
    }
}

struct Columns<'a> {
    metrics: &'a [String],
    dimensions: &'a [String],
}

impl ChartNormalizer {
    pub fn new(name_rules: Vec<NameRule>, value_rules: Vec<ValueRule>) -> Self {
        Self {
            name_rules,
            value_rules,
        }
    }

    /// Normalize engine rows into chart points. Never fails; no rows gives no points.
    pub fn normalize(
        &self,
        rows: &[Row],
        metrics: &[String],
        dimensions: &[String],
    ) -> Vec<ChartDataPoint> {
        let Some(first) = rows.first() else {
            return Vec::new();
        };

        let inferred;
        let metrics = if metrics.is_empty() {
            inferred = infer_metric(first, dimensions).into_iter().collect::<Vec<_>>();
            if let Some(metric) = inferred.first() {
                debug!(%metric, "no metric declared, inferred from first row");
            }
            inferred.as_slice()
        } else {
            metrics
        };
        let cols = Columns {
            metrics,
            dimensions,
        };

        rows.iter()
            .enumerate()
            .map(|(idx, row)| {
                if is_canonical(row) {
                    passthrough(row, idx)
                } else {
                    self.point(row, idx, &cols)
                }
            })
            .collect()
    }

    fn point(&self, row: &Row, idx: usize, cols: &Columns<'_>) -> ChartDataPoint {
        let name = self
            .name_rules
            .iter()
            .find_map(|rule| name_by(*rule, row, idx, cols))
            .unwrap_or_else(|| ordinal(idx));

        let mut point = match cols.metrics {
            [_, _, ..] => {
                let mut point = ChartDataPoint::new(name, 0.0);
                for metric in cols.metrics {
                    let value = row.get(metric).map(number_or_zero).unwrap_or(0.0);
                    if metric != "name" && metric != "value" {
                        point = point.with_extra(metric.clone(), value);
                    }
                }
                point
            }
            _ => ChartDataPoint::new(name, 0.0),
        };

        point.value = self
            .value_rules
            .iter()
            .find_map(|rule| value_by(*rule, row, cols))
            .unwrap_or(0.0);
        point
    }
}

impl PointNormalizer for ChartNormalizer {
    fn normalize(
        &self,
        rows: &[Row],
        metrics: &[String],
        dimensions: &[String],
    ) -> Vec<ChartDataPoint> {
        ChartNormalizer::normalize(self, rows, metrics, dimensions)
    }
}

/// Normalize with the default rule order.
pub fn normalize_rows(rows: &[Row], metrics: &[String], dimensions: &[String]) -> Vec<ChartDataPoint> {
    ChartNormalizer::default().normalize(rows, metrics, dimensions)
}

fn is_canonical(row: &Row) -> bool {
    row.contains_key("name") && row.contains_key("value")
}

fn passthrough(row: &Row, idx: usize) -> ChartDataPoint {
    let name = row.get("name").and_then(as_label).unwrap_or_else(|| ordinal(idx));
    let value = row.get("value").map(number_or_zero).unwrap_or(0.0);
    row.iter()
        .filter(|(key, _)| key.as_str() != "name" && key.as_str() != "value")
        .filter_map(|(key, v)| as_number(v).map(|n| (key, n)))
        .fold(ChartDataPoint::new(name, value), |point, (key, n)| {
            point.with_extra(key.clone(), n)
        })
}

fn ordinal(idx: usize) -> String {
    format!("Item {}", idx + 1)
}

fn name_by(rule: NameRule, row: &Row, idx: usize, cols: &Columns<'_>) -> Option<String> {
    match rule {
        NameRule::DeclaredDimension => cols
            .dimensions
            .first()
            .and_then(|dim| row.get(dim))
            .and_then(as_label),
        NameRule::NameField => row.get("name").and_then(as_label),
        NameRule::FirstKey => row.values().next().and_then(as_label),
        NameRule::Ordinal => Some(ordinal(idx)),
    }
}

fn value_by(rule: ValueRule, row: &Row, cols: &Columns<'_>) -> Option<f64> {
    match rule {
        ValueRule::DeclaredMetric => cols
            .metrics
            .first()
            .and_then(|metric| row.get(metric))
            .map(number_or_zero),
        ValueRule::ValueField => row.get("value").map(number_or_zero),
        ValueRule::FirstNumeric => row
            .iter()
            .filter(|(key, _)| !cols.dimensions.contains(key))
            .find_map(|(_, v)| as_number(v)),
    }
}

/// First column of `row` that holds a number or a currency amount.
fn infer_metric(row: &Row, dimensions: &[String]) -> Option<String> {
    row.iter()
        .filter(|(key, _)| !dimensions.contains(key))
        .find(|(_, v)| is_metric_like(v))
        .map(|(key, _)| key.clone())
}

fn is_metric_like(value: &Value) -> bool {
    as_number(value).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_metric_uses_declared_columns() {
        let rows = vec![
            row(json!({"region": "EU", "revenue": "$1,200.50"})),
            row(json!({"region": "US", "revenue": 900})),
        ];
        let points = normalize_rows(&rows, &names(&["revenue"]), &names(&["region"]));
        assert_eq!(
            points,
            vec![
                ChartDataPoint::new("EU", 1200.5),
                ChartDataPoint::new("US", 900.0)
            ]
        );
    }

    #[test]
    fn missing_dimension_falls_back_to_first_key_then_ordinal() {
        let rows = vec![
            row(json!({"channel": "web", "revenue": 3})),
            row(json!({"channel": null, "revenue": 4})),
        ];
        let points = normalize_rows(&rows, &names(&["revenue"]), &names(&["region"]));
        assert_eq!(points[0].name, "web");
        assert_eq!(points[1].name, "Item 2");
    }

    #[test]
    fn unparseable_metric_resolves_to_zero() {
        let rows = vec![row(json!({"region": "EU", "revenue": "n/a"}))];
        let points = normalize_rows(&rows, &names(&["revenue"]), &names(&["region"]));
        assert_eq!(points[0].value, 0.0);
    }

    #[test]
    fn multi_metric_keeps_every_metric_and_aliases_first() {
        let rows = vec![row(json!({"region": "EU", "revenue": 10, "units": "7"}))];
        let points = normalize_rows(&rows, &names(&["revenue", "units"]), &names(&["region"]));
        assert_eq!(
            points,
            vec![ChartDataPoint::new("EU", 10.0)
                .with_extra("revenue", 10.0)
                .with_extra("units", 7.0)]
        );
    }

    #[test]
    fn no_metrics_scans_first_row() {
        let rows = vec![
            row(json!({"region": "EU", "total": "€40"})),
            row(json!({"region": "US", "total": "€60"})),
        ];
        let points = normalize_rows(&rows, &[], &names(&["region"]));
        assert_eq!(points[1], ChartDataPoint::new("US", 60.0));
    }

    #[test]
    fn canonical_rows_pass_through() {
        let rows = vec![row(json!({"name": "Q1", "value": 5, "units": 2}))];
        let points = normalize_rows(&rows, &names(&["revenue"]), &names(&["region"]));
        assert_eq!(points, vec![ChartDataPoint::new("Q1", 5.0).with_extra("units", 2.0)]);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(normalize_rows(&[], &names(&["revenue"]), &[]).is_empty());
    }

    #[test]
    fn custom_rule_order_is_honored() {
        let normalizer = ChartNormalizer::new(
            vec![NameRule::Ordinal],
            vec![ValueRule::FirstNumeric],
        );
        let rows = vec![row(json!({"region": "EU", "units": 3, "revenue": 9}))];
        let points = normalizer.normalize(&rows, &names(&["revenue"]), &names(&["region"]));
        assert_eq!(points, vec![ChartDataPoint::new("Item 1", 3.0)]);
    }

    fn to_row(point: &ChartDataPoint) -> Row {
        row(serde_json::to_value(point).unwrap())
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            any::<f64>().prop_map(|f| serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)),
            "[$€£₹]?-?[0-9,]{0,12}(\\.[0-9]{1,4})?".prop_map(Value::from),
            ".{0,12}".prop_map(Value::from),
        ]
    }

    fn arb_rows() -> impl Strategy<Value = Vec<Row>> {
        let key = prop_oneof![
            Just("name".to_string()),
            Just("value".to_string()),
            Just("region".to_string()),
            Just("revenue".to_string()),
            "[a-z]{1,6}",
        ];
        prop::collection::vec(
            prop::collection::vec((key, arb_value()), 0..5)
                .prop_map(|pairs| pairs.into_iter().collect::<Row>()),
            0..8,
        )
    }

    proptest! {
        #[test]
        fn values_are_always_finite(
            rows in arb_rows(),
            declared in prop::sample::subsequence(vec!["revenue".to_string(), "units".to_string()], 0..=2),
        ) {
            let points = normalize_rows(&rows, &declared, &names(&["region"]));
            prop_assert_eq!(points.len(), rows.len());
            for point in &points {
                prop_assert!(point.value.is_finite());
                prop_assert!(!point.name.is_empty());
                prop_assert!(point.extra.values().all(|v| v.is_finite()));
            }
        }

        #[test]
        fn normalizing_twice_changes_nothing(rows in arb_rows()) {
            let metrics = names(&["revenue", "units"]);
            let dims = names(&["region"]);
            let once = normalize_rows(&rows, &metrics, &dims);
            let again = normalize_rows(
                &once.iter().map(to_row).collect::<Vec<_>>(),
                &metrics,
                &dims,
            );
            prop_assert_eq!(once, again);
        }
    }
}
