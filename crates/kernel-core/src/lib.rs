//! Deterministic consensus-dynamics kernel: row-stochastic trust matrix,
//! DeGroot opinion updates, costed interventions, outcome classification,
//! and influence analysis. No I/O, no clocks, no randomness.

pub mod classifier;
pub mod engine;
pub mod explore;
pub mod influence;
pub mod matrix;
pub mod operator;
pub mod scenario;

pub use matrix::{MatrixError, TrustMatrix, ROW_SUM_EPSILON};
pub use scenario::{ConsensusScenario, ScenarioError};
