use contracts::EventType;
use serde_json::json;

use super::*;
use crate::{classifier, engine};

impl ConsensusScenario {
    /// Execute one atomic round: apply at most one due action and the
    /// update to a working copy, classify, then commit the copy. On error
    /// the previous state is retained and surfaced unchanged.
    pub fn step(&mut self) -> Result<RoundRecord, ScenarioError> {
        if self.status.is_complete() {
            return Err(ScenarioError::RunTerminated {
                outcome: self.status.outcome,
            });
        }
        let round = self.status.current_round + 1;

        let mut work_matrix = self.matrix.clone();
        let mut work_opinions = self.opinions.clone();
        let mut round_events = Vec::new();
        let mut sequence = 0_u64;

        // Drift happens at round start, so a reduction applied this round
        // persists through this round's update.
        self.apply_receptivity_decay(&mut work_matrix)?;

        let applied_action = match self.queued_actions.pop_front() {
            Some(action) => Some(self.resolve_action(
                action,
                &mut work_matrix,
                &mut work_opinions,
                round,
                &mut round_events,
                &mut sequence,
            )?),
            None => None,
        };

        let next_opinions = engine::advance(&work_matrix, &work_opinions);
        let mean = classifier::mean_support(&next_opinions);
        let outcome = classifier::classify(mean, round, &self.config);
        let trend_by_id: BTreeMap<String, f64> = self
            .matrix
            .ids()
            .iter()
            .cloned()
            .zip(classifier::trend(&self.opinions, &next_opinions))
            .collect();

        // Commit: the working copy becomes the live snapshot.
        self.matrix = work_matrix;
        self.opinions = next_opinions;
        self.status.current_round = round;
        self.status.outcome = outcome;
        self.status.mode = RunMode::Running;
        self.state_hash = snapshot::mix_state_hash(self.state_hash, round, &self.opinions);

        round_events.push(self.make_event(
            round,
            sequence,
            EventType::RoundAdvanced,
            Vec::new(),
            Vec::new(),
            Some(json!({ "mean_support": mean })),
        ));
        sequence += 1;
        if outcome.is_terminal() {
            round_events.push(self.make_event(
                round,
                sequence,
                EventType::OutcomeReached,
                Vec::new(),
                Vec::new(),
                Some(json!({ "outcome": outcome })),
            ));
            self.status.mode = RunMode::Paused;
        }
        self.event_log.append(&mut round_events);

        let record = self.round_record(round, applied_action, trend_by_id);
        self.rounds.push(record.clone());
        self.sync_queue_depth();
        Ok(record)
    }

    /// Step up to `n` rounds, stopping early at a terminal outcome.
    /// Returns the number of rounds committed.
    pub fn step_n(&mut self, n: u32) -> Result<u32, ScenarioError> {
        let mut committed = 0;
        for _ in 0..n {
            if self.status.is_complete() {
                break;
            }
            self.step()?;
            committed += 1;
        }
        Ok(committed)
    }

    /// Run rounds until the classifier reaches a terminal outcome. The
    /// round cap guarantees termination.
    pub fn run_to_completion(&mut self) -> Result<Outcome, ScenarioError> {
        while !self.status.is_complete() {
            self.step()?;
        }
        Ok(self.status.outcome)
    }

    /// Drift reduced self-weights back toward their initial values by the
    /// configured fraction. Only rows whose diagonal sits below its start
    /// value are touched.
    fn apply_receptivity_decay(&self, matrix: &mut TrustMatrix) -> Result<(), ScenarioError> {
        let Some(rate) = self.config.receptivity_decay else {
            return Ok(());
        };
        let rate = rate.clamp(0.0, 1.0);
        for i in 0..matrix.len() {
            let current = matrix.weight(i, i);
            let initial = self.initial_diagonal[i];
            if current < initial {
                matrix.set_weight(i, i, current + (initial - current) * rate);
                matrix.normalize_row(i)?;
            }
        }
        Ok(())
    }
}
