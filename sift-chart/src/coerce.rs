use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn numeric_text() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<lead>[-+])?[$€£₹]?(?P<sign>[-+])?(?P<num>\d[\d,]*(?:\.\d+)?|\.\d+)$")
            .unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Parse plain numeric text or a currency amount such as `"$1,234.50"` or `"-€12"`.
pub fn parse_amount(text: &str) -> Option<f64> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let caps = numeric_text().captures(&compact)?;
    let negative = [caps.name("lead"), caps.name("sign")]
        .into_iter()
        .flatten()
        .any(|m| m.as_str() == "-");
    let magnitude: f64 = caps["num"].replace(',', "").parse().ok()?;
    let value = if negative { -magnitude } else { magnitude };
    value.is_finite().then_some(value)
}

/// A finite number from a JSON value, or `None` when the value is not numeric.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

/// Like [`as_number`] but unparseable values resolve to zero.
pub fn number_or_zero(value: &Value) -> f64 {
    as_number(value).unwrap_or(0.0)
}

/// Render a JSON scalar as a display label. Null and blank strings have none.
pub fn as_label(value: &Value) -> Option<String> {
    let label = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => return None,
        other => other.to_string(),
    };
    (!label.is_empty()).then_some(label)
}
