//! Cascade evaluation: heuristic filter, single judge, then CLEV voting.

pub mod controller;
pub mod judge;
pub mod voting;

pub use controller::{CascadeController, SINGLE_JUDGE_SAVINGS};
pub use judge::{call_judge, SingleJudgeEvaluator};
pub use voting::{accuracy_weight, weighted_quorum, ConsensusVoter, VoteRound, WeightedVerdict};

/// Error type for cascade evaluation
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    /// Every judge of the pass failed; the session cannot continue
    #[error("No judge responded: {}", failures.join("; "))]
    NoJudgeResponse { failures: Vec<String> },
}
