//! Deterministic placeholder series used when real data cannot be produced.
//!
//! Responses built from these points are always flagged as synthetic.

use sift_types::{ChartDataPoint, IntentKind, QueryIntent};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];
const CATEGORIES: [&str; 5] = ["Category A", "Category B", "Category C", "Category D", "Category E"];
const BUCKETS: [&str; 5] = ["0-20", "20-40", "40-60", "60-80", "80-100"];

/// Placeholder points shaped after `intent`.
pub fn synthetic_series(intent: &QueryIntent) -> Vec<ChartDataPoint> {
    let base: Vec<(String, f64)> = match intent.intent {
        IntentKind::Trend => MONTHS
            .iter()
            .enumerate()
            .map(|(i, m)| (m.to_string(), 1000.0 + 75.0 * i as f64 + 40.0 * (i % 3) as f64))
            .collect(),
        IntentKind::Comparison | IntentKind::Ranking => CATEGORIES
            .iter()
            .zip([500.0, 420.0, 360.0, 290.0, 210.0])
            .map(|(c, v)| (c.to_string(), v))
            .collect(),
        IntentKind::Distribution => BUCKETS
            .iter()
            .zip([12.0, 28.0, 35.0, 18.0, 7.0])
            .map(|(b, v)| (b.to_string(), v))
            .collect(),
        IntentKind::Summary => vec![("Total".to_string(), 1000.0)],
    };

    let metrics: &[String] = if intent.metrics.len() > 1 {
        intent.metrics.as_slice()
    } else {
        &[]
    };

    base.into_iter()
        .map(|(name, value)| {
            metrics
                .iter()
                .enumerate()
                .filter(|(_, m)| m.as_str() != "name" && m.as_str() != "value")
                .fold(ChartDataPoint::new(name, value), |point, (k, metric)| {
                    point.with_extra(metric.clone(), value * (1.0 - 0.15 * k as f64))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate_points;

    fn intent(kind: IntentKind, metrics: &[&str]) -> QueryIntent {
        QueryIntent {
            intent: kind,
            metrics: metrics.iter().map(|m| m.to_string()).collect(),
            ..QueryIntent::default()
        }
    }

    #[test]
    fn shapes_follow_intent() {
        assert_eq!(synthetic_series(&intent(IntentKind::Trend, &[])).len(), 12);
        assert_eq!(synthetic_series(&intent(IntentKind::Ranking, &[])).len(), 5);
        assert_eq!(synthetic_series(&intent(IntentKind::Distribution, &[])).len(), 5);
        assert_eq!(
            synthetic_series(&intent(IntentKind::Summary, &[])),
            vec![ChartDataPoint::new("Total", 1000.0)]
        );
    }

    #[test]
    fn multi_metric_intents_get_extras() {
        let points = synthetic_series(&intent(IntentKind::Comparison, &["revenue", "units"]));
        assert_eq!(points[0].extra["revenue"], 500.0);
        assert!((points[0].extra["units"] - 425.0).abs() < 1e-9);
        assert_eq!(points[0].value, 500.0);
    }

    #[test]
    fn output_is_deterministic_and_valid() {
        let i = intent(IntentKind::Trend, &["a", "b"]);
        let points = synthetic_series(&i);
        assert_eq!(points, synthetic_series(&i));
        assert_eq!(validate_points(&points), Ok(()));
    }
}
