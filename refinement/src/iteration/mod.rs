//! Iteration Controller: the session state machine
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            ▼                                              │
//!   Cascade evaluate ──▶ boundary checks ──continue──▶ Arbiter plan ──▶ execute
//!                              │
//!                              └──stop──▶ ACCEPTED | ACCEPTED_WITH_WARNING
//!                                         ESCALATED | BEST_EFFORT
//! ```
//!
//! Terminal states never transition again. Semi-auto sessions may end
//! ESCALATED for a human; full-auto sessions always resolve without one.

pub mod best_effort;
pub mod controller;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::cascade::CascadeError;
use crate::config::{ConfigError, ModeThresholds, OperationMode};
use crate::state::{
    CascadeResult, Document, IterationState, RegressionRecord, SectionId, SessionStatus,
    TargetedIssue,
};

pub use best_effort::{select_best, selection_for, BestEffortSelection, QualityStatus};
pub use controller::IterationController;

/// Session-fatal failures
#[derive(Debug, thiserror::Error)]
pub enum RefinementError {
    #[error("Evaluation failed at iteration {iteration}: {source}")]
    Evaluation {
        iteration: u32,
        #[source]
        source: CascadeError,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Why a session stopped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    IterationLimit { max_iterations: u32 },
    BudgetExhausted { tokens_used: u64 },
    Accepted { score: f64 },
    GoodEnough { score: f64 },
    Converged { score_delta: f64 },
    /// Every remaining issue is blocked, filtered or unlocated
    NoActionableIssues,
    FullRegenerate { reason: String },
}

impl StopReason {
    /// Terminal status this reason maps to in `mode`
    pub fn status(&self, mode: OperationMode) -> SessionStatus {
        match (self, mode) {
            (Self::Accepted { .. }, _) => SessionStatus::Accepted,
            (Self::GoodEnough { .. }, OperationMode::SemiAuto) => SessionStatus::Accepted,
            (Self::GoodEnough { .. }, OperationMode::FullAuto) => {
                SessionStatus::AcceptedWithWarning
            }
            (_, OperationMode::SemiAuto) => SessionStatus::Escalated,
            (_, OperationMode::FullAuto) => SessionStatus::BestEffort,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IterationLimit { max_iterations } => {
                write!(f, "iteration limit of {} reached", max_iterations)
            }
            Self::BudgetExhausted { tokens_used } => {
                write!(f, "budget exhausted after {} tokens", tokens_used)
            }
            Self::Accepted { score } => write!(f, "score {:.3} meets accept threshold", score),
            Self::GoodEnough { score } => {
                write!(f, "score {:.3} good enough with no critical issue", score)
            }
            Self::Converged { score_delta } => {
                write!(f, "converged, last score change {:+.3}", score_delta)
            }
            Self::NoActionableIssues => write!(f, "no actionable issue left"),
            Self::FullRegenerate { reason } => write!(f, "full regeneration required: {}", reason),
        }
    }
}

/// Boundary checks, in order: hard limits, accept, good-enough, convergence.
///
/// `max_iterations` bounds refinement rounds, so a session evaluates at most
/// `max_iterations + 1` times. Convergence looks at the signed improvement:
/// a falling score has converged too. Returns `None` when the session should
/// refine another round.
pub fn boundary_decision(
    state: &IterationState,
    result: &CascadeResult,
    thresholds: ModeThresholds,
    convergence_epsilon: f64,
) -> Option<StopReason> {
    if state.rounds_completed() >= state.limits.max_iterations {
        return Some(StopReason::IterationLimit {
            max_iterations: state.limits.max_iterations,
        });
    }
    if state.budget_exhausted() {
        return Some(StopReason::BudgetExhausted {
            tokens_used: state.tokens_used,
        });
    }
    let score = result.final_score;
    if score >= thresholds.accept {
        return Some(StopReason::Accepted { score });
    }
    if score >= thresholds.good_enough && !result.has_critical_issue() {
        return Some(StopReason::GoodEnough { score });
    }
    match state.last_improvement() {
        Some(delta) if delta < convergence_epsilon => {
            Some(StopReason::Converged { score_delta: delta })
        }
        _ => None,
    }
}

/// Final record handed back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    pub stop_reason: StopReason,
    pub final_score: f64,
    pub iterations_used: u32,
    pub tokens_used: u64,
    pub unresolved_issues: Vec<TargetedIssue>,
    pub content: Document,
    pub human_review_required: bool,
    pub quality_status: QualityStatus,
    /// Set when the session ended BEST_EFFORT
    pub best_effort: Option<BestEffortSelection>,
    pub full_regeneration_required: bool,
    pub regressions: Vec<RegressionRecord>,
    /// Sections frozen by the oscillation guard
    pub locked_sections: BTreeSet<SectionId>,
    pub score_history: Vec<f64>,
}

impl RefinementOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Accepted | SessionStatus::AcceptedWithWarning
        )
    }
}
