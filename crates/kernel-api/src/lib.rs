//! In-process API facade over the consensus kernel with action validation,
//! deferred SQLite persistence, and an HTTP server.

mod persistence;
mod server;

use std::path::Path;

use contracts::{
    Action, Event, InfluenceReport, Outcome, RoundRecord, RunConfig, RunStatus, ScenarioSetup,
    SimulationRun, Stakeholder,
};
use kernel_core::engine::{self, ProbeResult};
use kernel_core::scenario::{ConsensusScenario, ScenarioError};
use persistence::SqliteRunStore;
pub use persistence::{PersistedRunSummary, PersistenceError, ReplaySlice};
pub use server::{serve, ServerError};

#[derive(Debug)]
struct PersistenceState {
    store: SqliteRunStore,
    persisted_action_count: usize,
    persisted_round_count: usize,
    persisted_event_count: usize,
}

/// Owns one live scenario. Every mutation commits to the in-memory history
/// first; persistence is flushed afterwards, so a storage failure can warn
/// but never corrupt the run.
#[derive(Debug)]
pub struct EngineApi {
    engine: ConsensusScenario,
    action_log: Vec<Action>,
    persistence: Option<PersistenceState>,
    last_persistence_error: Option<String>,
}

impl EngineApi {
    pub fn from_setup(setup: ScenarioSetup) -> Result<Self, ScenarioError> {
        Ok(Self {
            engine: ConsensusScenario::new(setup)?,
            action_log: Vec::new(),
            persistence: None,
            last_persistence_error: None,
        })
    }

    pub fn run_id(&self) -> &str {
        self.engine.run_id()
    }

    pub fn config(&self) -> &RunConfig {
        self.engine.config()
    }

    pub fn status(&self) -> &RunStatus {
        self.engine.status()
    }

    pub fn stakeholders(&self) -> &[Stakeholder] {
        self.engine.stakeholders()
    }

    pub fn rounds(&self) -> &[RoundRecord] {
        self.engine.rounds()
    }

    pub fn events(&self) -> &[Event] {
        self.engine.events()
    }

    pub fn action_log(&self) -> &[Action] {
        &self.action_log
    }

    pub fn remaining_capital(&self, issuer: &str) -> u32 {
        self.engine.remaining_capital(issuer)
    }

    pub fn influence_report(&self) -> InfluenceReport {
        self.engine.influence_report()
    }

    pub fn export_run(&self) -> SimulationRun {
        self.engine.to_simulation_run()
    }

    /// Batch-mode convergence probe of the current matrix and opinions.
    /// Read-only; the live run is not advanced.
    pub fn probe(&self, max_steps: Option<u32>, tolerance: Option<f64>) -> ProbeResult {
        let config = self.engine.config();
        engine::probe_convergence(
            self.engine.matrix(),
            self.engine.opinions(),
            max_steps.unwrap_or(config.probe_max_steps),
            tolerance.unwrap_or(config.probe_tolerance),
        )
    }

    pub fn queue_action(&mut self, action: Action) -> Result<RunStatus, ScenarioError> {
        self.engine.queue_action(action.clone())?;
        self.action_log.push(action);
        self.flush_persistence();
        Ok(self.engine.status().clone())
    }

    /// Step up to `rounds` rounds, then flush the new history.
    pub fn step(&mut self, rounds: u32) -> Result<(RunStatus, u32), ScenarioError> {
        let committed = self.engine.step_n(rounds)?;
        self.flush_persistence();
        Ok((self.engine.status().clone(), committed))
    }

    pub fn run_to_completion(&mut self) -> Result<(RunStatus, Outcome), ScenarioError> {
        let outcome = self.engine.run_to_completion()?;
        self.flush_persistence();
        Ok((self.engine.status().clone(), outcome))
    }

    pub fn attach_sqlite_store(&mut self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let store = SqliteRunStore::open(path)?;
        self.persistence = Some(PersistenceState {
            store,
            persisted_action_count: 0,
            persisted_round_count: 0,
            persisted_event_count: 0,
        });
        Ok(())
    }

    /// Claim the run id in the attached store and persist the bootstrap
    /// snapshot (the seed round).
    pub fn initialize_run_storage(
        &mut self,
        replace_existing_run: bool,
    ) -> Result<(), PersistenceError> {
        let Some(state) = self.persistence.as_mut() else {
            return Err(PersistenceError::NotAttached);
        };

        let run_id = self.engine.run_id().to_string();
        if state.store.run_exists(&run_id)? {
            if replace_existing_run {
                state.store.delete_run(&run_id)?;
                state.persisted_action_count = 0;
                state.persisted_round_count = 0;
                state.persisted_event_count = 0;
            } else {
                return Err(PersistenceError::RunAlreadyExists(run_id));
            }
        }

        self.last_persistence_error = None;
        self.flush_persistence_checked()
    }

    /// Flush anything not yet persisted; errors are returned to the caller.
    pub fn flush_persistence_checked(&mut self) -> Result<(), PersistenceError> {
        let run = self.engine.to_simulation_run();
        let Some(state) = self.persistence.as_mut() else {
            return Err(PersistenceError::NotAttached);
        };

        let new_actions = &self.action_log[state.persisted_action_count..];
        let new_rounds = &self.engine.rounds()[state.persisted_round_count..];
        let new_events = &self.engine.events()[state.persisted_event_count..];

        state.store.persist_delta(
            self.engine.config(),
            self.engine.status(),
            &run,
            new_actions,
            new_rounds,
            new_events,
        )?;

        state.persisted_action_count = self.action_log.len();
        state.persisted_round_count = self.engine.rounds().len();
        state.persisted_event_count = self.engine.events().len();

        self.last_persistence_error = None;
        Ok(())
    }

    /// Best-effort flush after a committed state transition. The engine
    /// state is already durable in the in-memory history, so a storage
    /// failure is recorded and surfaced as a warning, not an error.
    fn flush_persistence(&mut self) {
        if self.persistence.is_none() {
            return;
        }
        if let Err(err) = self.flush_persistence_checked() {
            self.last_persistence_error = Some(err.to_string());
        }
    }

    pub fn last_persistence_error(&self) -> Option<&str> {
        self.last_persistence_error.as_deref()
    }

    pub fn list_runs(&self, page_size: usize) -> Result<Vec<PersistedRunSummary>, PersistenceError> {
        let Some(state) = self.persistence.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };
        state.store.list_runs(page_size)
    }

    pub fn load_run(&self, run_id: &str) -> Result<Option<SimulationRun>, PersistenceError> {
        let Some(state) = self.persistence.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };
        state.store.load_run(run_id)
    }

    pub fn load_rounds_range(
        &self,
        run_id: &str,
        from_round: u32,
        to_round: u32,
    ) -> Result<Vec<RoundRecord>, PersistenceError> {
        let Some(state) = self.persistence.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };
        state.store.load_rounds_range(run_id, from_round, to_round)
    }

    pub fn replay_at_round(&self, run_id: &str, round: u32) -> Result<ReplaySlice, PersistenceError> {
        let Some(state) = self.persistence.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };
        state.store.replay_at_round(run_id, round)
    }

    pub fn opinions_by_id(&self) -> std::collections::BTreeMap<String, f64> {
        self.engine.opinions_by_id()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use contracts::{ActionPayload, TrustTopology};

    use super::*;

    fn demo_setup(run_id: &str) -> ScenarioSetup {
        ScenarioSetup {
            config: RunConfig {
                run_id: run_id.to_string(),
                ..RunConfig::default()
            },
            stakeholders: vec![
                Stakeholder::new("sh:finance", "Finance", "finance"),
                Stakeholder::new("sh:sales", "Sales", "sales"),
            ],
            topology: TrustTopology::Explicit {
                rows: vec![vec![0.9, 0.1], vec![0.5, 0.5]],
            },
            seed_opinions: BTreeMap::from([
                ("sh:finance".to_string(), 0.2),
                ("sh:sales".to_string(), 0.8),
            ]),
        }
    }

    fn temp_sqlite_path(label: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("consensus_api_{label}_{}.sqlite", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn persisted_history_round_trips_through_sqlite() {
        let path = temp_sqlite_path("round_trip");
        let mut api = EngineApi::from_setup(demo_setup("run_persist")).expect("valid setup");
        api.attach_sqlite_store(&path).expect("store opens");
        api.initialize_run_storage(true).expect("storage ready");

        api.queue_action(Action::new(
            "act:1",
            "run_persist",
            0,
            "sh:sales",
            1,
            ActionPayload::Socialize {
                target_id: "sh:finance".to_string(),
                delta: 0.3,
            },
        ))
        .expect("queued");
        let (status, _outcome) = api.run_to_completion().expect("terminates");
        assert!(status.is_complete());
        assert!(api.last_persistence_error().is_none());

        let stored = api
            .load_run("run_persist")
            .expect("load works")
            .expect("run present");
        assert_eq!(stored, api.export_run());

        let rounds = api
            .load_rounds_range("run_persist", 0, status.current_round)
            .expect("rounds load");
        assert_eq!(rounds.len(), api.rounds().len());

        let replay = api
            .replay_at_round("run_persist", status.current_round)
            .expect("replay slice");
        assert!(replay.round.is_some());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn initialize_refuses_duplicate_run_without_replace() {
        let path = temp_sqlite_path("duplicate");
        let mut first = EngineApi::from_setup(demo_setup("run_dup")).expect("valid setup");
        first.attach_sqlite_store(&path).expect("store opens");
        first.initialize_run_storage(true).expect("storage ready");

        let mut second = EngineApi::from_setup(demo_setup("run_dup")).expect("valid setup");
        second.attach_sqlite_store(&path).expect("store opens");
        let err = second
            .initialize_run_storage(false)
            .expect_err("run id is taken");
        assert!(matches!(err, PersistenceError::RunAlreadyExists(_)));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn list_runs_surfaces_summaries() {
        let path = temp_sqlite_path("list");
        let mut api = EngineApi::from_setup(demo_setup("run_list")).expect("valid setup");
        api.attach_sqlite_store(&path).expect("store opens");
        api.initialize_run_storage(true).expect("storage ready");
        api.run_to_completion().expect("terminates");

        let runs = api.list_runs(10).expect("list works");
        assert!(runs.iter().any(|summary| summary.run_id == "run_list"
            && summary.outcome.is_terminal()));

        let _ = std::fs::remove_file(&path);
    }
}
