use std::sync::OnceLock;

use regex::Regex;

fn causal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*why\b|\bwhat (caused|causes|drove|drives|is driving|was driving)\b|\breasons? (for|behind)\b|\broot cause\b|\bexplain (the|this|why)\b",
        )
        .unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Whether `question` asks for an explanation rather than a measurement.
pub fn is_causal_question(question: &str) -> bool {
    causal_pattern().is_match(question)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_explanatory_questions() {
        for q in [
            "Why did revenue drop in March?",
            "  why is churn up",
            "What caused the spike in returns?",
            "What drove the decline?",
            "Reasons for lower margins in EU",
            "Explain the drop in Q3 sales",
            "find the root cause of the dip",
        ] {
            assert!(is_causal_question(q), "{q}");
        }
    }

    #[test]
    fn measurements_are_not_causal() {
        for q in [
            "Total revenue by region",
            "Show monthly sales trend",
            "Top 5 products by units",
            "whyte brand revenue",
        ] {
            assert!(!is_causal_question(q), "{q}");
        }
    }
}
