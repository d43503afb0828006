//! Batch execution of independent scenarios on a worker pool, e.g. to
//! compare alternative intervention orders as a planning aid. Each plan
//! owns a private state copy; results are reduced only after every run
//! reaches a terminal classification.

use contracts::{Action, ScenarioSetup, SimulationRun};
use rayon::prelude::*;

use crate::scenario::{ConsensusScenario, ScenarioError};

/// One independent run: a setup plus the actions to queue before stepping.
/// Actions are consumed one per round in issue order.
#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    pub setup: ScenarioSetup,
    pub actions: Vec<Action>,
}

/// Run every plan to completion in parallel. Output order matches input
/// order, and each entry is the plan's own terminal history or the error
/// that stopped it.
pub fn run_batch(plans: Vec<ScenarioPlan>) -> Vec<Result<SimulationRun, ScenarioError>> {
    plans.into_par_iter().map(run_plan).collect()
}

fn run_plan(plan: ScenarioPlan) -> Result<SimulationRun, ScenarioError> {
    let mut scenario = ConsensusScenario::new(plan.setup)?;
    for action in plan.actions {
        scenario.queue_action(action)?;
    }
    scenario.run_to_completion()?;
    Ok(scenario.to_simulation_run())
}
