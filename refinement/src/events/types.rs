//! Progress events streamed to external monitors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{CascadeStage, FixAction, SectionId, SessionStatus};

/// Why a task did not land
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskFailure {
    /// Transport/format/timeout failures exhausted the retry budget
    CallFailed { error: String },
    /// Section-scoped heuristic re-check failed
    HeuristicRejected { reasons: Vec<String> },
    /// Delta judge said the issue was not addressed
    NotAddressed { rationale: String },
    /// A locked criterion dropped beyond tolerance
    RegressionDetected { criteria: Vec<String> },
    /// Section vanished from the document
    MissingSection,
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CallFailed { error } => write!(f, "call failed: {}", error),
            Self::HeuristicRejected { reasons } => {
                write!(f, "heuristic rejected: {}", reasons.join("; "))
            }
            Self::NotAddressed { rationale } => write!(f, "not addressed: {}", rationale),
            Self::RegressionDetected { criteria } => {
                write!(f, "regression on {}", criteria.join(", "))
            }
            Self::MissingSection => write!(f, "section missing"),
        }
    }
}

/// All refinement progress events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefinementEvent {
    /// A session started
    RefinementStart {
        session_id: String,
        iteration: u32,
        section_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// An execution batch was dispatched
    BatchStarted {
        session_id: String,
        iteration: u32,
        batch_index: usize,
        section_ids: Vec<SectionId>,
        timestamp: DateTime<Utc>,
    },

    /// A single section task started
    TaskStarted {
        session_id: String,
        iteration: u32,
        section_id: SectionId,
        action: FixAction,
        timestamp: DateTime<Utc>,
    },

    /// A patch passed verification and was applied
    PatchApplied {
        session_id: String,
        iteration: u32,
        section_id: SectionId,
        action: FixAction,
        timestamp: DateTime<Utc>,
    },

    /// Verification finished for a task
    VerificationResult {
        session_id: String,
        iteration: u32,
        section_id: SectionId,
        passed: bool,
        failure: Option<TaskFailure>,
        timestamp: DateTime<Utc>,
    },

    /// An iteration boundary evaluation finished
    IterationComplete {
        session_id: String,
        iteration: u32,
        score: f64,
        score_delta: Option<f64>,
        stage: CascadeStage,
        timestamp: DateTime<Utc>,
    },

    /// Scores stopped improving
    ConvergenceDetected {
        session_id: String,
        iteration: u32,
        score_delta: f64,
        timestamp: DateTime<Utc>,
    },

    /// Best snapshot chosen in full-auto mode
    BestEffortSelected {
        session_id: String,
        iteration: u32,
        selected_iteration: u32,
        score: f64,
        timestamp: DateTime<Utc>,
    },

    /// Session handed to a human
    EscalationTriggered {
        session_id: String,
        iteration: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Session reached a terminal state
    RefinementComplete {
        session_id: String,
        iteration: u32,
        status: SessionStatus,
        final_score: f64,
        timestamp: DateTime<Utc>,
    },
}

impl RefinementEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RefinementEvent::RefinementStart { timestamp, .. } => *timestamp,
            RefinementEvent::BatchStarted { timestamp, .. } => *timestamp,
            RefinementEvent::TaskStarted { timestamp, .. } => *timestamp,
            RefinementEvent::PatchApplied { timestamp, .. } => *timestamp,
            RefinementEvent::VerificationResult { timestamp, .. } => *timestamp,
            RefinementEvent::IterationComplete { timestamp, .. } => *timestamp,
            RefinementEvent::ConvergenceDetected { timestamp, .. } => *timestamp,
            RefinementEvent::BestEffortSelected { timestamp, .. } => *timestamp,
            RefinementEvent::EscalationTriggered { timestamp, .. } => *timestamp,
            RefinementEvent::RefinementComplete { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            RefinementEvent::RefinementStart { .. } => "refinement_start",
            RefinementEvent::BatchStarted { .. } => "batch_started",
            RefinementEvent::TaskStarted { .. } => "task_started",
            RefinementEvent::PatchApplied { .. } => "patch_applied",
            RefinementEvent::VerificationResult { .. } => "verification_result",
            RefinementEvent::IterationComplete { .. } => "iteration_complete",
            RefinementEvent::ConvergenceDetected { .. } => "convergence_detected",
            RefinementEvent::BestEffortSelected { .. } => "best_effort_selected",
            RefinementEvent::EscalationTriggered { .. } => "escalation_triggered",
            RefinementEvent::RefinementComplete { .. } => "refinement_complete",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            RefinementEvent::RefinementStart { session_id, .. }
            | RefinementEvent::BatchStarted { session_id, .. }
            | RefinementEvent::TaskStarted { session_id, .. }
            | RefinementEvent::PatchApplied { session_id, .. }
            | RefinementEvent::VerificationResult { session_id, .. }
            | RefinementEvent::IterationComplete { session_id, .. }
            | RefinementEvent::ConvergenceDetected { session_id, .. }
            | RefinementEvent::BestEffortSelected { session_id, .. }
            | RefinementEvent::EscalationTriggered { session_id, .. }
            | RefinementEvent::RefinementComplete { session_id, .. } => session_id,
        }
    }

    pub fn iteration(&self) -> u32 {
        match self {
            RefinementEvent::RefinementStart { iteration, .. }
            | RefinementEvent::BatchStarted { iteration, .. }
            | RefinementEvent::TaskStarted { iteration, .. }
            | RefinementEvent::PatchApplied { iteration, .. }
            | RefinementEvent::VerificationResult { iteration, .. }
            | RefinementEvent::IterationComplete { iteration, .. }
            | RefinementEvent::ConvergenceDetected { iteration, .. }
            | RefinementEvent::BestEffortSelected { iteration, .. }
            | RefinementEvent::EscalationTriggered { iteration, .. }
            | RefinementEvent::RefinementComplete { iteration, .. } => *iteration,
        }
    }

    /// Get the section ID if this event is section-scoped
    pub fn section_id(&self) -> Option<&str> {
        match self {
            RefinementEvent::TaskStarted { section_id, .. } => Some(section_id),
            RefinementEvent::PatchApplied { section_id, .. } => Some(section_id),
            RefinementEvent::VerificationResult { section_id, .. } => Some(section_id),
            _ => None,
        }
    }

    /// Score change carried by the event, where applicable
    pub fn score_delta(&self) -> Option<f64> {
        match self {
            RefinementEvent::IterationComplete { score_delta, .. } => *score_delta,
            RefinementEvent::ConvergenceDetected { score_delta, .. } => Some(*score_delta),
            _ => None,
        }
    }
}
