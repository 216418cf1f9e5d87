use std::cmp::Ordering;

use sift_types::{Hypothesis, InvestigationResult};

pub const PRIMARY_MIN_STRENGTH: u8 = 50;
pub const PRIMARY_MIN_CONFIDENCE: u8 = 50;
pub const SECONDARY_MIN_STRENGTH: u8 = 30;
pub const SECONDARY_MIN_CONFIDENCE: u8 = 40;
pub const MAX_SECONDARY: usize = 2;

/// Order by `strength × confidence / 100` (stable) and split into causes.
pub fn rank(mut hypotheses: Vec<Hypothesis>) -> InvestigationResult {
    hypotheses.sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap_or(Ordering::Equal));

    let primary_idx = hypotheses
        .iter()
        .position(|h| h.strength >= PRIMARY_MIN_STRENGTH && h.confidence >= PRIMARY_MIN_CONFIDENCE);
    let primary_cause = primary_idx.map(|idx| hypotheses.remove(idx));

    let mut secondary_causes = Vec::new();
    let mut unproven_hypotheses = Vec::new();
    for h in hypotheses {
        if secondary_causes.len() < MAX_SECONDARY
            && h.strength >= SECONDARY_MIN_STRENGTH
            && h.confidence >= SECONDARY_MIN_CONFIDENCE
        {
            secondary_causes.push(h);
        } else {
            unproven_hypotheses.push(h);
        }
    }

    let overall_confidence = primary_cause.as_ref().map_or(0, |h| h.confidence);
    InvestigationResult {
        primary_cause,
        secondary_causes,
        unproven_hypotheses,
        overall_confidence,
    }
}
