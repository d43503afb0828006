//! Scenario orchestrator: owns the single live matrix/opinion state, applies
//! at most one queued action per round, and records an append-only history.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

mod actions;
mod snapshot;
mod step;
#[cfg(test)]
mod tests;

use contracts::{
    Action, Event, EventType, Outcome, RoundRecord, RunConfig, RunMode, RunStatus, ScenarioSetup,
    Stakeholder, SCHEMA_VERSION_V1,
};
use serde_json::Value;

use crate::matrix::{MatrixError, TrustMatrix};

#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioError {
    Matrix(MatrixError),
    UnknownStakeholder {
        stakeholder_id: String,
    },
    DuplicateStakeholder {
        stakeholder_id: String,
    },
    MissingSeedOpinion {
        stakeholder_id: String,
    },
    OpinionOutOfRange {
        stakeholder_id: String,
        value: f64,
    },
    InsufficientCapital {
        issuer: String,
        required: u32,
        available: u32,
    },
    RunTerminated {
        outcome: Outcome,
    },
    EmptyRoster,
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Matrix(err) => write!(f, "invalid matrix: {err}"),
            Self::UnknownStakeholder { stakeholder_id } => {
                write!(f, "unknown stakeholder: {stakeholder_id}")
            }
            Self::DuplicateStakeholder { stakeholder_id } => {
                write!(f, "duplicate stakeholder in roster: {stakeholder_id}")
            }
            Self::MissingSeedOpinion { stakeholder_id } => {
                write!(f, "no seed opinion for stakeholder: {stakeholder_id}")
            }
            Self::OpinionOutOfRange {
                stakeholder_id,
                value,
            } => write!(
                f,
                "seed opinion {value} for {stakeholder_id} is outside [0, 1]"
            ),
            Self::InsufficientCapital {
                issuer,
                required,
                available,
            } => write!(
                f,
                "{issuer} lacks political capital: required {required}, available {available}"
            ),
            Self::RunTerminated { outcome } => {
                write!(f, "run already terminated with outcome {outcome}")
            }
            Self::EmptyRoster => write!(f, "scenario requires at least one stakeholder"),
        }
    }
}

impl std::error::Error for ScenarioError {}

impl From<MatrixError> for ScenarioError {
    fn from(value: MatrixError) -> Self {
        Self::Matrix(value)
    }
}

/// The sole owner of a run's live state. Every committed round produces a
/// new snapshot in `rounds`; prior snapshots are never mutated in place.
#[derive(Debug, Clone)]
pub struct ConsensusScenario {
    config: RunConfig,
    status: RunStatus,
    stakeholders: Vec<Stakeholder>,
    matrix: TrustMatrix,
    opinions: Vec<f64>,
    /// Diagonal at scenario start, the restore target for receptivity decay.
    initial_diagonal: Vec<f64>,
    capital_spent: BTreeMap<String, u32>,
    queued_actions: VecDeque<Action>,
    rounds: Vec<RoundRecord>,
    event_log: Vec<Event>,
    state_hash: u64,
}

impl ConsensusScenario {
    pub fn new(setup: ScenarioSetup) -> Result<Self, ScenarioError> {
        let ScenarioSetup {
            config,
            stakeholders,
            topology,
            seed_opinions,
        } = setup;

        if stakeholders.is_empty() {
            return Err(ScenarioError::EmptyRoster);
        }
        let mut seen = BTreeSet::new();
        for stakeholder in &stakeholders {
            if !seen.insert(stakeholder.stakeholder_id.as_str()) {
                return Err(ScenarioError::DuplicateStakeholder {
                    stakeholder_id: stakeholder.stakeholder_id.clone(),
                });
            }
        }
        for seeded_id in seed_opinions.keys() {
            if !seen.contains(seeded_id.as_str()) {
                return Err(ScenarioError::UnknownStakeholder {
                    stakeholder_id: seeded_id.clone(),
                });
            }
        }

        let ids: Vec<String> = stakeholders
            .iter()
            .map(|stakeholder| stakeholder.stakeholder_id.clone())
            .collect();
        let matrix = TrustMatrix::from_topology(ids.clone(), &topology)?;

        let mut opinions = Vec::with_capacity(ids.len());
        for id in &ids {
            let seed = seed_opinions
                .get(id)
                .copied()
                .ok_or_else(|| ScenarioError::MissingSeedOpinion {
                    stakeholder_id: id.clone(),
                })?;
            if !seed.is_finite() || !(0.0..=1.0).contains(&seed) {
                return Err(ScenarioError::OpinionOutOfRange {
                    stakeholder_id: id.clone(),
                    value: seed,
                });
            }
            opinions.push(seed);
        }

        let initial_diagonal = (0..matrix.len()).map(|i| matrix.weight(i, i)).collect();
        let status = RunStatus {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: config.run_id.clone(),
            current_round: 0,
            max_rounds: config.max_rounds,
            outcome: Outcome::InProgress,
            mode: RunMode::Paused,
            queue_depth: 0,
        };

        let mut scenario = Self {
            state_hash: snapshot::seed_state_hash(&config.run_id),
            config,
            status,
            stakeholders,
            matrix,
            opinions,
            initial_diagonal,
            capital_spent: BTreeMap::new(),
            queued_actions: VecDeque::new(),
            rounds: Vec::new(),
            event_log: Vec::new(),
        };

        let seed_record = scenario.round_record(0, None, BTreeMap::new());
        scenario.rounds.push(seed_record);
        let event = scenario.make_event(
            0,
            0,
            EventType::RunInitialized,
            scenario
                .stakeholders
                .iter()
                .map(|stakeholder| stakeholder.stakeholder_id.clone())
                .collect(),
            Vec::new(),
            None,
        );
        scenario.event_log.push(event);

        Ok(scenario)
    }

    pub fn run_id(&self) -> &str {
        &self.status.run_id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn stakeholders(&self) -> &[Stakeholder] {
        &self.stakeholders
    }

    pub fn matrix(&self) -> &TrustMatrix {
        &self.matrix
    }

    pub fn opinions(&self) -> &[f64] {
        &self.opinions
    }

    pub fn opinions_by_id(&self) -> BTreeMap<String, f64> {
        self.matrix
            .ids()
            .iter()
            .cloned()
            .zip(self.opinions.iter().copied())
            .collect()
    }

    pub fn rounds(&self) -> &[RoundRecord] {
        &self.rounds
    }

    pub fn events(&self) -> &[Event] {
        &self.event_log
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    /// Capital budget for an issuer, before spending.
    pub fn capital_budget(&self, issuer: &str) -> u32 {
        self.config
            .capital_budgets
            .get(issuer)
            .copied()
            .unwrap_or(self.config.default_capital)
    }

    pub fn remaining_capital(&self, issuer: &str) -> u32 {
        let spent = self.capital_spent.get(issuer).copied().unwrap_or(0);
        self.capital_budget(issuer).saturating_sub(spent)
    }

    pub(super) fn sync_queue_depth(&mut self) {
        self.status.queue_depth = self.queued_actions.len();
    }

    pub(super) fn make_event(
        &self,
        round: u32,
        sequence_in_round: u64,
        event_type: EventType,
        subject_ids: Vec<String>,
        caused_by: Vec<String>,
        details: Option<Value>,
    ) -> Event {
        Event {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            event_id: format!("evt:{round:06}:{sequence_in_round}"),
            run_id: self.status.run_id.clone(),
            round,
            sequence_in_round,
            event_type,
            subject_ids,
            caused_by,
            details,
            created_at: snapshot::round_stamp(round),
        }
    }
}
