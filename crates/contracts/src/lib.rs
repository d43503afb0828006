//! v1 cross-boundary contracts for the consensus kernel, API, persistence,
//! and observer surfaces.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SCHEMA_VERSION_V1: &str = "1.0";

pub const DEFAULT_ACCEPT_THRESHOLD: f64 = 0.7;
pub const DEFAULT_REJECT_THRESHOLD: f64 = 0.3;
pub const DEFAULT_MAX_ROUNDS: u32 = 10;
pub const DEFAULT_RECEPTIVITY_DROP: f64 = 0.25;
pub const DEFAULT_CAPITAL: u32 = 3;
pub const DEFAULT_PROBE_MAX_STEPS: u32 = 100;
pub const DEFAULT_PROBE_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Stakeholders and topology
// ---------------------------------------------------------------------------

/// Immutable identity record for one actor in the consensus process.
/// Created once at scenario setup and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stakeholder {
    pub stakeholder_id: String,
    pub display_name: String,
    /// Free-form role tag, e.g. "finance", "sales", "sponsor".
    pub role: String,
}

impl Stakeholder {
    pub fn new(
        stakeholder_id: impl Into<String>,
        display_name: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            stakeholder_id: stakeholder_id.into(),
            display_name: display_name.into(),
            role: role.into(),
        }
    }
}

/// Named trust topology used to seed the matrix at scenario start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrustTopology {
    /// Explicit row-major weights, one row per stakeholder in roster order.
    Explicit { rows: Vec<Vec<f64>> },
    /// Every stakeholder spreads attention uniformly over all actors.
    Uniform,
    /// Fixed self-weight on the diagonal, remainder spread uniformly.
    SelfAnchored { self_weight: f64 },
    /// Everyone leans on a single hub actor with the given weight; the
    /// remainder (including self-attention) is spread uniformly.
    Hub { hub_id: String, hub_weight: f64 },
}

/// Everything needed to start a run: roster, topology, seed opinions, and
/// the run configuration. Supplied by upstream collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioSetup {
    pub config: RunConfig,
    pub stakeholders: Vec<Stakeholder>,
    pub topology: TrustTopology,
    /// Initial support level per stakeholder id, each in [0, 1].
    pub seed_opinions: BTreeMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Run configuration and status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    pub schema_version: String,
    pub run_id: String,
    /// Mean support at or above which the run terminates as consensus.
    pub accept_threshold: f64,
    /// Mean support at or below which the run terminates as rejected.
    pub reject_threshold: f64,
    pub max_rounds: u32,
    /// Fraction by which a direct-opinion action reduces the target's
    /// self-weight, making the actor more receptive afterwards.
    pub receptivity_drop: f64,
    /// Per-round drift of reduced self-weights back toward their initial
    /// values. `None` means the reduction is permanent for the run.
    pub receptivity_decay: Option<f64>,
    /// Political capital granted to issuers absent an explicit budget entry.
    pub default_capital: u32,
    #[serde(default)]
    pub capital_budgets: BTreeMap<String, u32>,
    /// Step cap for convergence probing of a fixed matrix.
    pub probe_max_steps: u32,
    /// Tolerance under which successive probe vectors count as converged.
    pub probe_tolerance: f64,
    /// Persist a full matrix snapshot every N rounds (1 = every round).
    pub snapshot_every_rounds: u32,
    pub notes: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: "run_local_001".to_string(),
            accept_threshold: DEFAULT_ACCEPT_THRESHOLD,
            reject_threshold: DEFAULT_REJECT_THRESHOLD,
            max_rounds: DEFAULT_MAX_ROUNDS,
            receptivity_drop: DEFAULT_RECEPTIVITY_DROP,
            receptivity_decay: None,
            default_capital: DEFAULT_CAPITAL,
            capital_budgets: BTreeMap::new(),
            probe_max_steps: DEFAULT_PROBE_MAX_STEPS,
            probe_tolerance: DEFAULT_PROBE_TOLERANCE,
            snapshot_every_rounds: 1,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Running,
    Paused,
}

/// Terminal classification of a run, evaluated after every round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    InProgress,
    ConsensusReached,
    Rejected,
}

impl Outcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Outcome::InProgress)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::InProgress => "in_progress",
            Outcome::ConsensusReached => "consensus_reached",
            Outcome::Rejected => "rejected",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStatus {
    pub schema_version: String,
    pub run_id: String,
    pub current_round: u32,
    pub max_rounds: u32,
    pub outcome: Outcome,
    pub mode: RunMode,
    pub queue_depth: usize,
}

impl RunStatus {
    pub fn is_complete(&self) -> bool {
        self.outcome.is_terminal()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={} round={}/{} outcome={} mode={:?} queue_depth={}",
            self.run_id,
            self.current_round,
            self.max_rounds,
            self.outcome,
            self.mode,
            self.queue_depth
        )
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    PresentEvidence,
    Socialize,
}

/// Closed set of intervention payloads. New kinds extend this enum and the
/// uniform apply contract in kernel-core; there is no ad hoc dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPayload {
    /// Add a signed delta to the target's support, clamped to [0, 1], and
    /// lower the target's self-weight to make it more receptive.
    PresentEvidence { target_id: String, delta: f64 },
    /// Increase the weight the target places on the issuer; the target's
    /// row is renormalized, proportionally shrinking its other weights.
    Socialize { target_id: String, delta: f64 },
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::PresentEvidence { .. } => ActionKind::PresentEvidence,
            ActionPayload::Socialize { .. } => ActionKind::Socialize,
        }
    }

    pub fn target_id(&self) -> &str {
        match self {
            ActionPayload::PresentEvidence { target_id, .. } => target_id,
            ActionPayload::Socialize { target_id, .. } => target_id,
        }
    }
}

/// One queued intervention. Constructed by the caller, consumed exactly once
/// by the orchestrator, immutable once issued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub schema_version: String,
    pub action_id: String,
    pub run_id: String,
    pub issued_in_round: u32,
    /// Stakeholder spending political capital to issue this action.
    pub issuer: String,
    pub cost: u32,
    pub payload: ActionPayload,
}

impl Action {
    pub fn new(
        action_id: impl Into<String>,
        run_id: impl Into<String>,
        issued_in_round: u32,
        issuer: impl Into<String>,
        cost: u32,
        payload: ActionPayload,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            action_id: action_id.into(),
            run_id: run_id.into(),
            issued_in_round,
            issuer: issuer.into(),
            cost,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RejectionReason {
    UnknownStakeholder {
        stakeholder_id: String,
    },
    InsufficientCapital {
        required: u32,
        available: u32,
    },
    RunTerminated {
        outcome: Outcome,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub schema_version: String,
    pub action_id: String,
    pub accepted: bool,
    pub rejection: Option<RejectionReason>,
    pub trace: Option<ActionTrace>,
}

impl ActionResult {
    pub fn accepted(action_id: impl Into<String>, trace: ActionTrace) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            action_id: action_id.into(),
            accepted: true,
            rejection: None,
            trace: Some(trace),
        }
    }

    pub fn rejected(action_id: impl Into<String>, reason: RejectionReason) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            action_id: action_id.into(),
            accepted: false,
            rejection: Some(reason),
            trace: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Causal explanation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpinionChange {
    pub stakeholder_id: String,
    pub before: f64,
    pub after: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightChange {
    /// Row owner: the stakeholder whose attention shifted.
    pub source_id: String,
    /// Column: the stakeholder the attention now points at.
    pub target_id: String,
    pub before: f64,
    pub after: f64,
}

/// What an applied action changed and why, for audit and for downstream
/// narration by an external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionTrace {
    pub action_id: String,
    pub round: u32,
    pub kind: ActionKind,
    pub issuer: String,
    pub target_id: String,
    pub opinion_change: Option<OpinionChange>,
    pub weight_changes: Vec<WeightChange>,
    pub summary: String,
}

// ---------------------------------------------------------------------------
// Round history
// ---------------------------------------------------------------------------

/// Snapshot of one committed round: the action applied (if any), the opinion
/// vector, the matrix rows, per-stakeholder trend, and the classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundRecord {
    pub schema_version: String,
    pub run_id: String,
    pub round: u32,
    pub applied_action: Option<ActionResult>,
    pub opinions: BTreeMap<String, f64>,
    /// Row-major weights in roster order; empty when the snapshot cadence
    /// skipped this round.
    pub matrix_rows: Vec<Vec<f64>>,
    /// Signed per-stakeholder delta from the previous round.
    pub trend: BTreeMap<String, f64>,
    pub mean_support: f64,
    pub outcome: Outcome,
    pub state_hash: String,
    pub created_at: String,
}

/// Complete history of one run. Owned by the orchestrator while live;
/// immutable once a terminal outcome is recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationRun {
    pub schema_version: String,
    pub run_id: String,
    pub config: RunConfig,
    pub stakeholders: Vec<Stakeholder>,
    pub rounds: Vec<RoundRecord>,
    pub outcome: Outcome,
    pub influence: Option<InfluenceReport>,
}

impl SimulationRun {
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Influence analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InfluenceMethod {
    /// Stationary distribution of the trust matrix (left eigenvector for
    /// eigenvalue 1).
    Stationary,
    /// Total incoming weight, the cheaper proxy used when the network is
    /// fragmented and no unique stationary distribution exists.
    IncomingWeight,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfluenceScore {
    pub stakeholder_id: String,
    pub score: f64,
}

/// Advisory ranking of stakeholders by latent influence over the eventual
/// consensus value. Never mutates run state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfluenceReport {
    pub schema_version: String,
    pub method: InfluenceMethod,
    pub fragmented: bool,
    /// Reachability components of the positive-weight graph; singleton list
    /// when the network is connected.
    pub cliques: Vec<Vec<String>>,
    pub ranking: Vec<InfluenceScore>,
    /// Whom to lobby first, per the ranking.
    pub lobby_first: Option<String>,
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunInitialized,
    ActionApplied,
    ActionRejected,
    RoundAdvanced,
    OutcomeReached,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub schema_version: String,
    pub event_id: String,
    pub run_id: String,
    pub round: u32,
    pub sequence_in_round: u64,
    pub event_type: EventType,
    pub subject_ids: Vec<String>,
    /// References to causally prior records, e.g. `action:<id>`.
    pub caused_by: Vec<String>,
    pub details: Option<Value>,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// API error envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidQuery,
    InvalidAction,
    RunNotFound,
    RunStateConflict,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiError {
    pub schema_version: String,
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            code,
            message: message.into(),
            details,
        }
    }
}
