use contracts::{ActionResult, SimulationRun};

use super::*;
use crate::{classifier, influence};

impl ConsensusScenario {
    /// Build the record for a just-committed round from the live snapshot.
    /// Matrix rows are included on the configured cadence and always for
    /// round zero and terminal rounds.
    pub(super) fn round_record(
        &self,
        round: u32,
        applied_action: Option<ActionResult>,
        trend: BTreeMap<String, f64>,
    ) -> RoundRecord {
        let cadence = self.config.snapshot_every_rounds.max(1);
        let include_matrix =
            round == 0 || round % cadence == 0 || self.status.outcome.is_terminal();
        let matrix_rows = if include_matrix {
            self.matrix.rows().to_vec()
        } else {
            Vec::new()
        };

        RoundRecord {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: self.status.run_id.clone(),
            round,
            applied_action,
            opinions: self.opinions_by_id(),
            matrix_rows,
            trend,
            mean_support: classifier::mean_support(&self.opinions),
            outcome: self.status.outcome,
            state_hash: format!("{:016x}", self.state_hash),
            created_at: round_stamp(round),
        }
    }

    /// Export the full history. The influence report reflects the current
    /// matrix, so a terminal export carries the final ranking.
    pub fn to_simulation_run(&self) -> SimulationRun {
        SimulationRun {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: self.status.run_id.clone(),
            config: self.config.clone(),
            stakeholders: self.stakeholders.clone(),
            rounds: self.rounds.clone(),
            outcome: self.status.outcome,
            influence: Some(influence::analyze(&self.matrix, &self.config)),
        }
    }

    pub fn influence_report(&self) -> contracts::InfluenceReport {
        influence::analyze(&self.matrix, &self.config)
    }

    pub fn state_hash(&self) -> u64 {
        self.state_hash
    }
}

pub(super) fn round_stamp(round: u32) -> String {
    format!("round-{round:06}")
}

pub(super) fn seed_state_hash(run_id: &str) -> u64 {
    let mut hash = 0_u64;
    for byte in run_id.as_bytes() {
        hash = hash.rotate_left(5) ^ u64::from(*byte);
        hash = hash.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    }
    hash
}

pub(super) fn mix_state_hash(state_hash: u64, round: u32, opinions: &[f64]) -> u64 {
    let mut hash = state_hash ^ u64::from(round).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    for opinion in opinions {
        hash ^= opinion.to_bits().wrapping_mul(0x517C_C1B7_2722_0A95);
        hash = hash.rotate_left(17);
    }
    hash
}
