//! Shared data model and session state.

pub mod results;
pub mod session;
pub mod types;

pub use results::{
    AgreementTier, BatchKind, CascadeResult, CascadeStage, ConsensusMethod, ExecutionBatch,
    HeuristicMetrics, HeuristicResult, PlanStatus, RefinementPlan, SectionRefinementTask,
};
pub use session::{
    ContentSnapshot, IterationState, QualityLock, QualityLockRegistry, RegressionRecord,
    SessionStatus, OSCILLATION_EDIT_LIMIT,
};
pub use types::{
    Confidence, ContentSpec, ContextWindow, Criterion, CriterionScores, Document,
    FailureCategory, FixAction, FixVerification, GeneratedText, JudgeVerdict, Recommendation,
    Rubric, Section, SectionExcerpt, SectionId, SectionScores, SectionSpec, Severity,
    TargetedIssue, HEURISTIC_RATER, TRANSITION_RATER,
};
