use contracts::{ActionPayload, RejectionReason, TrustTopology};

use super::*;
use crate::engine;

fn roster(ids: &[&str]) -> Vec<Stakeholder> {
    ids.iter()
        .map(|id| Stakeholder::new(*id, id.to_uppercase(), "member"))
        .collect()
}

fn seeds(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs
        .iter()
        .map(|(id, value)| (id.to_string(), *value))
        .collect()
}

fn three_actor_setup() -> ScenarioSetup {
    ScenarioSetup {
        config: RunConfig::default(),
        stakeholders: roster(&["a", "b", "c"]),
        topology: TrustTopology::Explicit {
            rows: vec![
                vec![0.5, 0.5, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.3, 0.3, 0.4],
            ],
        },
        seed_opinions: seeds(&[("a", 0.2), ("b", 0.9), ("c", 0.1)]),
    }
}

fn evidence(action_id: &str, issuer: &str, target: &str, delta: f64, cost: u32) -> Action {
    Action::new(
        action_id,
        "run_local_001",
        0,
        issuer,
        cost,
        ActionPayload::PresentEvidence {
            target_id: target.to_string(),
            delta,
        },
    )
}

#[test]
fn construction_records_a_seed_round() {
    let scenario = ConsensusScenario::new(three_actor_setup()).expect("valid setup");
    assert_eq!(scenario.rounds().len(), 1);
    let seed = &scenario.rounds()[0];
    assert_eq!(seed.round, 0);
    assert_eq!(seed.outcome, Outcome::InProgress);
    assert!(seed.applied_action.is_none());
    assert_eq!(seed.opinions.get("b"), Some(&0.9));
    assert!(!seed.matrix_rows.is_empty());
    assert_eq!(scenario.events().len(), 1);
    assert_eq!(scenario.events()[0].event_type, EventType::RunInitialized);
}

#[test]
fn construction_rejects_bad_setups() {
    let mut empty = three_actor_setup();
    empty.stakeholders.clear();
    empty.seed_opinions.clear();
    assert!(matches!(
        ConsensusScenario::new(empty),
        Err(ScenarioError::EmptyRoster)
    ));

    let mut duplicate = three_actor_setup();
    duplicate.stakeholders.push(Stakeholder::new("a", "A", "dup"));
    assert!(matches!(
        ConsensusScenario::new(duplicate),
        Err(ScenarioError::DuplicateStakeholder { .. })
    ));

    let mut missing_seed = three_actor_setup();
    missing_seed.seed_opinions.remove("c");
    assert!(matches!(
        ConsensusScenario::new(missing_seed),
        Err(ScenarioError::MissingSeedOpinion { .. })
    ));

    let mut out_of_range = three_actor_setup();
    out_of_range.seed_opinions.insert("c".to_string(), 1.4);
    assert!(matches!(
        ConsensusScenario::new(out_of_range),
        Err(ScenarioError::OpinionOutOfRange { .. })
    ));

    let mut stray_seed = three_actor_setup();
    stray_seed.seed_opinions.insert("zz".to_string(), 0.5);
    assert!(matches!(
        ConsensusScenario::new(stray_seed),
        Err(ScenarioError::UnknownStakeholder { .. })
    ));
}

#[test]
fn one_round_without_action_matches_exact_arithmetic() {
    let mut scenario = ConsensusScenario::new(three_actor_setup()).expect("valid setup");
    let record = scenario.step().expect("round commits");

    assert_eq!(record.round, 1);
    assert!((record.opinions["a"] - 0.55).abs() < 1e-12);
    assert!((record.opinions["b"] - 0.9).abs() < 1e-12);
    assert!((record.opinions["c"] - 0.37).abs() < 1e-12);
    assert!((record.trend["a"] - 0.35).abs() < 1e-12);
    assert_eq!(record.outcome, Outcome::InProgress);
}

#[test]
fn at_most_one_action_is_consumed_per_round() {
    let mut scenario = ConsensusScenario::new(three_actor_setup()).expect("valid setup");
    scenario
        .queue_action(evidence("act:1", "b", "a", 0.1, 1))
        .expect("queued");
    scenario
        .queue_action(evidence("act:2", "b", "c", 0.1, 1))
        .expect("queued");
    assert_eq!(scenario.status().queue_depth, 2);

    let record = scenario.step().expect("round commits");
    let applied = record.applied_action.as_ref().expect("action consumed");
    assert_eq!(applied.action_id, "act:1");
    assert!(applied.accepted);
    assert_eq!(scenario.status().queue_depth, 1);
}

#[test]
fn accepted_action_spends_capital_and_leaves_a_trace() {
    let mut scenario = ConsensusScenario::new(three_actor_setup()).expect("valid setup");
    let budget = scenario.remaining_capital("b");
    scenario
        .queue_action(evidence("act:1", "b", "a", 0.2, 2))
        .expect("queued");

    let record = scenario.step().expect("round commits");
    assert_eq!(scenario.remaining_capital("b"), budget - 2);

    let applied = record.applied_action.as_ref().expect("applied");
    let trace = applied.trace.as_ref().expect("trace recorded");
    assert_eq!(trace.issuer, "b");
    assert_eq!(trace.target_id, "a");
    assert!(trace.summary.contains("presented evidence"));
    assert!(scenario
        .events()
        .iter()
        .any(|event| event.event_type == EventType::ActionApplied));
}

#[test]
fn capital_exhaustion_rejects_and_round_runs_as_noop() {
    let mut setup = three_actor_setup();
    setup.config.default_capital = 2;
    let mut scenario = ConsensusScenario::new(setup).expect("valid setup");

    scenario
        .queue_action(evidence("act:1", "b", "a", 0.1, 2))
        .expect("queued");
    scenario.step().expect("first action applies");
    assert_eq!(scenario.remaining_capital("b"), 0);

    scenario
        .queue_action(evidence("act:2", "b", "c", 0.1, 2))
        .expect("queued");
    let before_matrix = scenario.matrix().clone();
    let before_opinions = scenario.opinions().to_vec();
    let expected = engine::advance(&before_matrix, &before_opinions);

    let record = scenario.step().expect("round still commits");
    let applied = record.applied_action.as_ref().expect("rejection recorded");
    assert!(!applied.accepted);
    assert_eq!(
        applied.rejection,
        Some(RejectionReason::InsufficientCapital {
            required: 2,
            available: 0,
        })
    );
    // The update executed exactly as if nothing had been queued.
    assert_eq!(scenario.opinions(), expected.as_slice());
    assert_eq!(scenario.matrix(), &before_matrix);
    assert!(scenario
        .events()
        .iter()
        .any(|event| event.event_type == EventType::ActionRejected));
}

#[test]
fn unknown_stakeholder_action_rejects_and_round_proceeds() {
    let mut scenario = ConsensusScenario::new(three_actor_setup()).expect("valid setup");
    scenario
        .queue_action(evidence("act:1", "b", "ghost", 0.1, 1))
        .expect("queued");

    let record = scenario.step().expect("round commits");
    let applied = record.applied_action.as_ref().expect("rejection recorded");
    assert!(!applied.accepted);
    assert!(matches!(
        applied.rejection,
        Some(RejectionReason::UnknownStakeholder { .. })
    ));
    assert_eq!(record.round, 1);
    assert!((record.opinions["a"] - 0.55).abs() < 1e-12);
}

#[test]
fn structural_invalidity_aborts_the_round_and_keeps_prior_state() {
    let mut scenario = ConsensusScenario::new(three_actor_setup()).expect("valid setup");
    scenario
        .queue_action(Action::new(
            "act:nan",
            "run_local_001",
            0,
            "b",
            1,
            ActionPayload::Socialize {
                target_id: "a".to_string(),
                delta: f64::NAN,
            },
        ))
        .expect("queued");

    let before_opinions = scenario.opinions().to_vec();
    let before_rounds = scenario.rounds().len();
    let err = scenario.step().expect_err("round aborts");
    assert!(matches!(err, ScenarioError::Matrix(_)));
    assert_eq!(scenario.opinions(), before_opinions.as_slice());
    assert_eq!(scenario.rounds().len(), before_rounds);
    assert_eq!(scenario.status().current_round, 0);

    // The faulty action was consumed; the next round commits cleanly.
    let record = scenario.step().expect("recovered");
    assert_eq!(record.round, 1);
    assert!(record.applied_action.is_none());
}

#[test]
fn terminal_outcome_freezes_the_run() {
    let mut setup = three_actor_setup();
    setup.seed_opinions = seeds(&[("a", 0.9), ("b", 0.95), ("c", 0.85)]);
    let mut scenario = ConsensusScenario::new(setup).expect("valid setup");

    let outcome = scenario.run_to_completion().expect("terminates");
    assert_eq!(outcome, Outcome::ConsensusReached);
    let history_len = scenario.rounds().len();

    let err = scenario.step().expect_err("frozen");
    assert!(matches!(
        err,
        ScenarioError::RunTerminated {
            outcome: Outcome::ConsensusReached
        }
    ));
    let err = scenario
        .queue_action(evidence("act:late", "b", "a", 0.1, 1))
        .expect_err("frozen queue");
    assert!(matches!(err, ScenarioError::RunTerminated { .. }));
    assert_eq!(scenario.rounds().len(), history_len);
}

#[test]
fn round_cap_exhaustion_rejects() {
    let mut setup = three_actor_setup();
    // A deadlocked middle ground: uniform attention keeps the mean at 0.5.
    setup.topology = TrustTopology::Uniform;
    setup.seed_opinions = seeds(&[("a", 0.5), ("b", 0.6), ("c", 0.4)]);
    let mut scenario = ConsensusScenario::new(setup).expect("valid setup");

    let outcome = scenario.run_to_completion().expect("terminates");
    assert_eq!(outcome, Outcome::Rejected);
    assert_eq!(scenario.status().current_round, 10);
}

#[test]
fn fragmented_cliques_never_reach_consensus() {
    let setup = ScenarioSetup {
        config: RunConfig::default(),
        stakeholders: roster(&["a", "b", "c", "d"]),
        topology: TrustTopology::Explicit {
            rows: vec![
                vec![0.5, 0.5, 0.0, 0.0],
                vec![0.5, 0.5, 0.0, 0.0],
                vec![0.0, 0.0, 0.5, 0.5],
                vec![0.0, 0.0, 0.5, 0.5],
            ],
        },
        seed_opinions: seeds(&[("a", 0.9), ("b", 0.9), ("c", 0.1), ("d", 0.1)]),
    };
    let mut scenario = ConsensusScenario::new(setup).expect("valid setup");

    let outcome = scenario.run_to_completion().expect("terminates");
    assert_eq!(outcome, Outcome::Rejected);
    assert!(scenario
        .rounds()
        .iter()
        .all(|record| record.outcome != Outcome::ConsensusReached));

    let report = scenario.influence_report();
    assert!(report.fragmented);
    assert_eq!(report.cliques.len(), 2);
}

#[test]
fn receptivity_decay_restores_self_weight_when_configured() {
    let mut setup = three_actor_setup();
    setup.config.receptivity_decay = Some(0.5);
    setup.topology = TrustTopology::SelfAnchored { self_weight: 0.8 };
    let mut scenario = ConsensusScenario::new(setup).expect("valid setup");

    scenario
        .queue_action(evidence("act:1", "b", "a", 0.1, 1))
        .expect("queued");
    scenario.step().expect("action round");
    let a = scenario.matrix().index_of("a").expect("known id");
    let reduced = scenario.matrix().weight(a, a);
    assert!(reduced < 0.8);

    scenario.step().expect("decay round");
    let restored = scenario.matrix().weight(a, a);
    assert!(restored > reduced);
    assert!(restored <= 0.8 + 1e-9);
}

#[test]
fn permanent_reduction_without_decay() {
    let mut setup = three_actor_setup();
    setup.topology = TrustTopology::SelfAnchored { self_weight: 0.8 };
    let mut scenario = ConsensusScenario::new(setup).expect("valid setup");

    scenario
        .queue_action(evidence("act:1", "b", "a", 0.1, 1))
        .expect("queued");
    scenario.step().expect("action round");
    let a = scenario.matrix().index_of("a").expect("known id");
    let reduced = scenario.matrix().weight(a, a);

    scenario.step().expect("quiet round");
    assert!((scenario.matrix().weight(a, a) - reduced).abs() < 1e-12);
}

#[test]
fn exported_run_carries_history_and_influence() {
    let mut scenario = ConsensusScenario::new(three_actor_setup()).expect("valid setup");
    scenario.run_to_completion().expect("terminates");

    let run = scenario.to_simulation_run();
    assert!(run.is_terminal());
    assert_eq!(run.rounds.len(), scenario.rounds().len());
    assert_eq!(run.stakeholders.len(), 3);
    let report = run.influence.as_ref().expect("influence attached");
    assert!(!report.ranking.is_empty());

    let raw = serde_json::to_string(&run).expect("serialize");
    let decoded: contracts::SimulationRun = serde_json::from_str(&raw).expect("deserialize");
    assert_eq!(run, decoded);
}
