use contracts::{ActionResult, EventType, RejectionReason};
use serde_json::json;

use super::*;
use crate::operator;

impl ConsensusScenario {
    /// Queue an intervention for the next round. At most one queued action
    /// is consumed per round; the rest wait their turn in issue order.
    pub fn queue_action(&mut self, action: Action) -> Result<(), ScenarioError> {
        if self.status.is_complete() {
            return Err(ScenarioError::RunTerminated {
                outcome: self.status.outcome,
            });
        }
        self.queued_actions.push_back(action);
        self.sync_queue_depth();
        Ok(())
    }

    /// Validate and apply one action against the round's working copy.
    ///
    /// Capital and identity problems reject the action and let the round
    /// proceed as a no-op update; only structural invalidity aborts the
    /// round, in which case the caller discards the working copy.
    pub(super) fn resolve_action(
        &mut self,
        action: Action,
        matrix: &mut TrustMatrix,
        opinions: &mut Vec<f64>,
        round: u32,
        round_events: &mut Vec<Event>,
        sequence: &mut u64,
    ) -> Result<ActionResult, ScenarioError> {
        let action_ref = format!("action:{}", action.action_id);

        if self.matrix.index_of(&action.issuer).is_none() {
            let reason = RejectionReason::UnknownStakeholder {
                stakeholder_id: action.issuer.clone(),
            };
            return Ok(self.reject(&action, reason, round, round_events, sequence, &action_ref));
        }

        let required = action.cost;
        let available = self.remaining_capital(&action.issuer);
        if available < required {
            let reason = RejectionReason::InsufficientCapital {
                required,
                available,
            };
            return Ok(self.reject(&action, reason, round, round_events, sequence, &action_ref));
        }

        match operator::apply(&action, matrix, opinions, &self.config) {
            Ok((next_matrix, next_opinions, trace)) => {
                *matrix = next_matrix;
                *opinions = next_opinions;
                *self.capital_spent.entry(action.issuer.clone()).or_insert(0) += required;

                let event = self.make_event(
                    round,
                    *sequence,
                    EventType::ActionApplied,
                    vec![action.issuer.clone(), trace.target_id.clone()],
                    vec![action_ref],
                    Some(json!({
                        "kind": trace.kind,
                        "cost": required,
                        "summary": trace.summary,
                    })),
                );
                *sequence += 1;
                round_events.push(event);

                Ok(ActionResult::accepted(action.action_id.clone(), trace))
            }
            Err(ScenarioError::UnknownStakeholder { stakeholder_id }) => {
                let reason = RejectionReason::UnknownStakeholder { stakeholder_id };
                Ok(self.reject(&action, reason, round, round_events, sequence, &action_ref))
            }
            // Structural invalidity is fatal for the round; the working
            // copy is dropped and the previous state stays live.
            Err(other) => Err(other),
        }
    }

    fn reject(
        &self,
        action: &Action,
        reason: RejectionReason,
        round: u32,
        round_events: &mut Vec<Event>,
        sequence: &mut u64,
        action_ref: &str,
    ) -> ActionResult {
        let event = self.make_event(
            round,
            *sequence,
            EventType::ActionRejected,
            vec![action.issuer.clone()],
            vec![action_ref.to_string()],
            Some(json!({ "reason": &reason })),
        );
        *sequence += 1;
        round_events.push(event);
        ActionResult::rejected(action.action_id.clone(), reason)
    }
}
