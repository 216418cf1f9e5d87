//! Pure scoring of hypothesis test results.

use sift_chart::as_number;
use sift_types::Row;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evidence {
    pub strength: u8,
    pub confidence: u8,
    pub conclusion: String,
}

impl Evidence {
    fn new(strength: u8, confidence: u8, conclusion: impl Into<String>) -> Self {
        Self {
            strength,
            confidence,
            conclusion: conclusion.into(),
        }
    }
}

/// First field in projection order that coerces to a finite number.
pub fn extract_numeric(row: &Row) -> Option<f64> {
    row.values().find_map(as_number)
}

/// Strength tier for an absolute percent change. Lower bounds are inclusive.
pub fn strength_for_change(percent: f64) -> u8 {
    match percent.abs() {
        p if p >= 50.0 => 90,
        p if p >= 30.0 => 75,
        p if p >= 20.0 => 60,
        p if p >= 10.0 => 45,
        p if p >= 5.0 => 30,
        _ => 15,
    }
}

/// Confidence grows with both values. Thresholds apply to signed values, so a
/// pair of negative values earns no bonus.
pub fn confidence_for_values(current: f64, previous: f64) -> u8 {
    let bonus = if current > 100.0 && previous > 100.0 {
        30
    } else if current > 50.0 && previous > 50.0 {
        20
    } else if current > 10.0 && previous > 10.0 {
        10
    } else {
        0
    };
    (50 + bonus).min(95)
}

/// Score test rows. Row 0 is read as the current value and row 1 as the previous.
pub fn evaluate_evidence(rows: &[Row]) -> Evidence {
    if rows.is_empty() {
        return Evidence::new(0, 0, "The test query returned no rows.");
    }

    let current = rows.first().and_then(extract_numeric);
    let previous = rows.get(1).and_then(extract_numeric);

    if let (Some(current), Some(previous)) = (current, previous) {
        if previous != 0.0 {
            let percent = (current - previous) / previous * 100.0;
            let direction = if percent > 0.0 {
                "increased"
            } else if percent < 0.0 {
                "decreased"
            } else {
                "did not change"
            };
            let conclusion = format!(
                "Value {direction} by {:.1}% (from {} to {}).",
                percent.abs(),
                fmt_value(previous),
                fmt_value(current)
            );
            return Evidence::new(
                strength_for_change(percent),
                confidence_for_values(current, previous),
                conclusion,
            );
        }
    }

    match rows.iter().find_map(extract_numeric) {
        Some(value) => Evidence::new(
            40,
            50,
            format!("Single data point: {}. No prior value to compare.", fmt_value(value)),
        ),
        None => Evidence::new(
            25,
            30,
            format!("The test returned {} row(s) without numeric values.", rows.len()),
        ),
    }
}

fn fmt_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn rows(values: Vec<Value>) -> Vec<Row> {
        values
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => map,
                other => panic!("not an object: {other}"),
            })
            .collect()
    }

    #[test]
    fn fifty_percent_rise_is_strong() {
        let evidence = evaluate_evidence(&rows(vec![json!({"current": 150}), json!({"previous": 100})]));
        assert_eq!(evidence.strength, 90);
        assert_eq!(evidence.confidence, 70);
        assert_eq!(evidence.conclusion, "Value increased by 50.0% (from 100 to 150).");
    }

    #[test]
    fn tier_boundaries_are_inclusive() {
        assert_eq!(strength_for_change(50.0), 90);
        assert_eq!(strength_for_change(50.01), 90);
        assert_eq!(strength_for_change(49.99), 75);
        assert_eq!(strength_for_change(30.0), 75);
        assert_eq!(strength_for_change(-20.0), 60);
        assert_eq!(strength_for_change(10.0), 45);
        assert_eq!(strength_for_change(5.0), 30);
        assert_eq!(strength_for_change(4.99), 15);
    }

    #[test]
    fn confidence_caps_and_steps() {
        assert_eq!(confidence_for_values(500.0, 300.0), 80);
        assert_eq!(confidence_for_values(60.0, 200.0), 70);
        assert_eq!(confidence_for_values(20.0, 11.0), 60);
        assert_eq!(confidence_for_values(5.0, 500.0), 50);
        assert!(confidence_for_values(f64::MAX, f64::MAX) <= 95);
    }

    #[test]
    fn negative_values_divide_by_the_signed_baseline() {
        let evidence = evaluate_evidence(&rows(vec![json!({"v": -50}), json!({"v": -100})]));
        assert_eq!((evidence.strength, evidence.confidence), (90, 50));
        assert_eq!(evidence.conclusion, "Value decreased by 50.0% (from -100 to -50).");

        let evidence = evaluate_evidence(&rows(vec![json!({"v": -500}), json!({"v": -300})]));
        assert_eq!((evidence.strength, evidence.confidence), (90, 50));
        assert!(evidence.conclusion.starts_with("Value increased by 66.7%"));

        assert_eq!(confidence_for_values(-500.0, -300.0), 50);
        assert_eq!(confidence_for_values(-20.0, 200.0), 50);
    }

    #[test]
    fn numeric_strings_and_first_field_are_used() {
        let evidence = evaluate_evidence(&rows(vec![
            json!({"label": "now", "v": "80"}),
            json!({"label": "before", "v": 100}),
        ]));
        assert_eq!(evidence.strength, 60);
        assert!(evidence.conclusion.starts_with("Value decreased by 20.0%"));
    }

    #[test]
    fn single_value_and_zero_baseline() {
        let single = evaluate_evidence(&rows(vec![json!({"total": 12})]));
        assert_eq!((single.strength, single.confidence), (40, 50));

        let zero_prev = evaluate_evidence(&rows(vec![json!({"v": 12}), json!({"v": 0})]));
        assert_eq!((zero_prev.strength, zero_prev.confidence), (40, 50));
    }

    #[test]
    fn rows_without_numbers_and_no_rows() {
        let textual = evaluate_evidence(&rows(vec![json!({"region": "EU"}), json!({"region": "US"})]));
        assert_eq!((textual.strength, textual.confidence), (25, 30));

        let empty = evaluate_evidence(&[]);
        assert_eq!((empty.strength, empty.confidence), (0, 0));
    }
}
