//! Perturbation operators: the closed set of interventions that mutate the
//! trust matrix and/or opinion vector between rounds. Every variant runs
//! through one uniform apply contract and returns a causal trace.

use contracts::{Action, ActionPayload, ActionTrace, OpinionChange, RunConfig, WeightChange};

use crate::matrix::TrustMatrix;
use crate::scenario::ScenarioError;

/// Entries whose value moved by less than this are left out of the trace.
const TRACE_EPSILON: f64 = 1e-12;

/// Apply one action to copies of the given state.
///
/// The inputs are never mutated; on error no new state is produced, so the
/// caller's snapshot stays certified. Capital is the orchestrator's
/// concern and is checked before this is called.
pub fn apply(
    action: &Action,
    matrix: &TrustMatrix,
    opinions: &[f64],
    config: &RunConfig,
) -> Result<(TrustMatrix, Vec<f64>, ActionTrace), ScenarioError> {
    let issuer = resolve(matrix, &action.issuer)?;
    match &action.payload {
        ActionPayload::PresentEvidence { target_id, delta } => {
            let target = resolve(matrix, target_id)?;
            present_evidence(action, matrix, opinions, config, target, *delta)
        }
        ActionPayload::Socialize { target_id, delta } => {
            let target = resolve(matrix, target_id)?;
            socialize(action, matrix, opinions, issuer, target, *delta)
        }
    }
}

fn resolve(matrix: &TrustMatrix, stakeholder_id: &str) -> Result<usize, ScenarioError> {
    matrix
        .index_of(stakeholder_id)
        .ok_or_else(|| ScenarioError::UnknownStakeholder {
            stakeholder_id: stakeholder_id.to_string(),
        })
}

/// Direct-opinion operator: shift the target's support by a clamped delta
/// and lower its self-weight so the actor listens more in later rounds.
/// Touches only the target's opinion entry and the target's matrix row.
fn present_evidence(
    action: &Action,
    matrix: &TrustMatrix,
    opinions: &[f64],
    config: &RunConfig,
    target: usize,
    delta: f64,
) -> Result<(TrustMatrix, Vec<f64>, ActionTrace), ScenarioError> {
    let mut next_matrix = matrix.clone();
    let mut next_opinions = opinions.to_vec();

    let before = next_opinions[target];
    let after = (before + delta).clamp(0.0, 1.0);
    next_opinions[target] = after;

    let row_before = next_matrix.row(target).to_vec();
    let old_self = next_matrix.weight(target, target);
    if config.receptivity_drop > 0.0 && old_self > 0.0 {
        next_matrix.set_weight(target, target, old_self * (1.0 - config.receptivity_drop));
        next_matrix.normalize_row(target)?;
    }
    let weight_changes = row_diff(&next_matrix, target, &row_before);

    let target_id = next_matrix.id_at(target).to_string();
    let summary = format!(
        "{} presented evidence to {}: support {:.3} -> {:.3}, self-weight {:.3} -> {:.3}",
        action.issuer,
        target_id,
        before,
        after,
        old_self,
        next_matrix.weight(target, target),
    );

    let trace = ActionTrace {
        action_id: action.action_id.clone(),
        round: action.issued_in_round,
        kind: action.payload.kind(),
        issuer: action.issuer.clone(),
        target_id: target_id.clone(),
        opinion_change: Some(OpinionChange {
            stakeholder_id: target_id,
            before,
            after,
        }),
        weight_changes,
        summary,
    };
    Ok((next_matrix, next_opinions, trace))
}

/// Trust-edge operator: raise the weight the target places on the issuer,
/// then renormalize the target's row. Opinions are untouched and no other
/// row changes.
fn socialize(
    action: &Action,
    matrix: &TrustMatrix,
    opinions: &[f64],
    issuer: usize,
    target: usize,
    delta: f64,
) -> Result<(TrustMatrix, Vec<f64>, ActionTrace), ScenarioError> {
    let mut next_matrix = matrix.clone();

    let row_before = next_matrix.row(target).to_vec();
    let raised = next_matrix.weight(target, issuer) + delta;
    next_matrix.set_weight(target, issuer, raised);
    next_matrix.normalize_row(target)?;
    let weight_changes = row_diff(&next_matrix, target, &row_before);

    let target_id = next_matrix.id_at(target).to_string();
    let summary = format!(
        "{} socialized with {}: {}'s weight on {} rose {:.3} -> {:.3}",
        action.issuer,
        target_id,
        target_id,
        action.issuer,
        row_before[issuer],
        next_matrix.weight(target, issuer),
    );

    let trace = ActionTrace {
        action_id: action.action_id.clone(),
        round: action.issued_in_round,
        kind: action.payload.kind(),
        issuer: action.issuer.clone(),
        target_id,
        opinion_change: None,
        weight_changes,
        summary,
    };
    Ok((next_matrix, opinions.to_vec(), trace))
}

fn row_diff(matrix: &TrustMatrix, row: usize, before: &[f64]) -> Vec<WeightChange> {
    let owner = matrix.id_at(row).to_string();
    matrix
        .row(row)
        .iter()
        .enumerate()
        .filter(|(col, after)| (**after - before[*col]).abs() > TRACE_EPSILON)
        .map(|(col, after)| WeightChange {
            source_id: owner.clone(),
            target_id: matrix.id_at(col).to_string(),
            before: before[col],
            after: *after,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ROW_SUM_EPSILON;

    fn three_actor_matrix() -> TrustMatrix {
        TrustMatrix::from_rows(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec![
                vec![0.5, 0.3, 0.2],
                vec![0.2, 0.6, 0.2],
                vec![0.1, 0.3, 0.6],
            ],
        )
        .expect("valid matrix")
    }

    fn evidence(target: &str, delta: f64) -> Action {
        Action::new(
            "act:evidence",
            "run_test",
            1,
            "a",
            1,
            ActionPayload::PresentEvidence {
                target_id: target.to_string(),
                delta,
            },
        )
    }

    fn socialize_action(issuer: &str, target: &str, delta: f64) -> Action {
        Action::new(
            "act:socialize",
            "run_test",
            1,
            issuer,
            2,
            ActionPayload::Socialize {
                target_id: target.to_string(),
                delta,
            },
        )
    }

    #[test]
    fn present_evidence_shifts_opinion_and_drops_self_weight() {
        let matrix = three_actor_matrix();
        let opinions = vec![0.5, 0.3, 0.8];
        let config = RunConfig::default();

        let (next_matrix, next_opinions, trace) =
            apply(&evidence("b", 0.2), &matrix, &opinions, &config).expect("applies");

        assert!((next_opinions[1] - 0.5).abs() < 1e-12);
        assert!(next_matrix.weight(1, 1) < matrix.weight(1, 1));
        assert!((next_matrix.row(1).iter().sum::<f64>() - 1.0).abs() < ROW_SUM_EPSILON);

        let change = trace.opinion_change.expect("opinion change recorded");
        assert_eq!(change.stakeholder_id, "b");
        assert!((change.before - 0.3).abs() < 1e-12);
        assert!((change.after - 0.5).abs() < 1e-12);
        assert!(!trace.weight_changes.is_empty());
    }

    #[test]
    fn present_evidence_clamps_to_unit_interval() {
        let matrix = three_actor_matrix();
        let config = RunConfig::default();

        let (_, raised, _) =
            apply(&evidence("b", 0.9), &matrix, &[0.5, 0.5, 0.5], &config).expect("applies");
        assert_eq!(raised[1], 1.0);

        let (_, lowered, _) =
            apply(&evidence("b", -0.9), &matrix, &[0.5, 0.5, 0.5], &config).expect("applies");
        assert_eq!(lowered[1], 0.0);
    }

    #[test]
    fn present_evidence_leaves_other_rows_untouched() {
        let matrix = three_actor_matrix();
        let config = RunConfig::default();
        let (next_matrix, _, _) =
            apply(&evidence("b", 0.1), &matrix, &[0.5, 0.5, 0.5], &config).expect("applies");
        assert_eq!(next_matrix.row(0), matrix.row(0));
        assert_eq!(next_matrix.row(2), matrix.row(2));
    }

    #[test]
    fn socialize_raises_issuer_weight_in_target_row_only() {
        let matrix = three_actor_matrix();
        let opinions = vec![0.5, 0.3, 0.8];
        let config = RunConfig::default();

        let (next_matrix, next_opinions, trace) =
            apply(&socialize_action("a", "c", 0.3), &matrix, &opinions, &config)
                .expect("applies");

        // The target now leans more on the issuer.
        assert!(next_matrix.weight(2, 0) > matrix.weight(2, 0));
        // Renormalization shrank at least one other entry in that row.
        assert!(
            next_matrix.weight(2, 1) < matrix.weight(2, 1)
                || next_matrix.weight(2, 2) < matrix.weight(2, 2)
        );
        assert!((next_matrix.row(2).iter().sum::<f64>() - 1.0).abs() < ROW_SUM_EPSILON);
        // Every other row is bit-for-bit unchanged, and opinions too.
        assert_eq!(next_matrix.row(0), matrix.row(0));
        assert_eq!(next_matrix.row(1), matrix.row(1));
        assert_eq!(next_opinions, opinions);

        assert!(trace.opinion_change.is_none());
        assert!(trace
            .weight_changes
            .iter()
            .any(|change| change.target_id == "a" && change.after > change.before));
    }

    #[test]
    fn unknown_target_rejects_without_state() {
        let matrix = three_actor_matrix();
        let config = RunConfig::default();
        let err = apply(&evidence("nobody", 0.2), &matrix, &[0.5, 0.5, 0.5], &config)
            .expect_err("unknown target");
        assert!(matches!(
            err,
            ScenarioError::UnknownStakeholder { ref stakeholder_id } if stakeholder_id == "nobody"
        ));
    }

    #[test]
    fn unknown_issuer_rejects_before_payload_dispatch() {
        let matrix = three_actor_matrix();
        let config = RunConfig::default();
        let err = apply(
            &socialize_action("ghost", "b", 0.2),
            &matrix,
            &[0.5, 0.5, 0.5],
            &config,
        )
        .expect_err("unknown issuer");
        assert!(matches!(err, ScenarioError::UnknownStakeholder { .. }));
    }
}
