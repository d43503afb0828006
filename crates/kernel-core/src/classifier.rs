//! Outcome classification after each round, plus per-stakeholder trend.

use contracts::{Outcome, RunConfig};

pub fn mean_support(opinions: &[f64]) -> f64 {
    if opinions.is_empty() {
        return 0.0;
    }
    opinions.iter().sum::<f64>() / opinions.len() as f64
}

/// Classify the run state after `round` rounds have been committed.
///
/// Crossing the accept threshold wins immediately; crossing the reject
/// threshold or exhausting the round cap without crossing accept both
/// terminate as rejected. Thresholds and the cap come from configuration.
pub fn classify(mean_support: f64, round: u32, config: &RunConfig) -> Outcome {
    if mean_support >= config.accept_threshold {
        Outcome::ConsensusReached
    } else if mean_support <= config.reject_threshold || round >= config.max_rounds {
        Outcome::Rejected
    } else {
        Outcome::InProgress
    }
}

/// Signed per-stakeholder delta between two successive opinion vectors.
pub fn trend(previous: &[f64], current: &[f64]) -> Vec<f64> {
    debug_assert_eq!(previous.len(), current.len());
    previous
        .iter()
        .zip(current)
        .map(|(before, after)| after - before)
        .collect()
}
