//! Capability interfaces consumed from the generation-model collaborator.
//!
//! The core depends only on these contracts. Implementations live outside
//! this crate (see `refine-agents`) or in tests as scripted fakes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::state::{
    ContextWindow, Document, FixVerification, GeneratedText, JudgeVerdict, Rubric,
    SectionRefinementTask, SectionSpec, TargetedIssue,
};

/// Failure of a single model call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelCallError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Call timed out after {0}ms")]
    Timeout(u64),
}

impl ModelCallError {
    /// Transport, format and timeout failures are all worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::MalformedResponse(_) | Self::Timeout(_) => true,
        }
    }
}

/// Scores content against a rubric
#[async_trait]
pub trait Judge: Send + Sync {
    /// Stable identifier recorded on verdicts and issues
    fn model_id(&self) -> &str;

    /// Historical agreement with human graders, on a logit-like scale.
    /// Voting weight is `1 / (1 + exp(-accuracy))`.
    fn historical_accuracy(&self) -> f64 {
        0.0
    }

    async fn evaluate(
        &self,
        content: &Document,
        rubric: &Rubric,
    ) -> Result<JudgeVerdict, ModelCallError>;
}

/// Applies a targeted edit to one section
#[async_trait]
pub trait Patcher: Send + Sync {
    async fn apply_fix(
        &self,
        task: &SectionRefinementTask,
        context: &ContextWindow,
    ) -> Result<GeneratedText, ModelCallError>;
}

/// Rewrites one section from its specification
#[async_trait]
pub trait SectionRegenerator: Send + Sync {
    async fn regenerate_section(
        &self,
        spec: &SectionSpec,
        context: &ContextWindow,
    ) -> Result<GeneratedText, ModelCallError>;
}

/// Cheap "was this addressed?" check
#[async_trait]
pub trait FixVerifier: Send + Sync {
    async fn verify_fix(
        &self,
        issue: &TargetedIssue,
        before: &str,
        after: &str,
    ) -> Result<FixVerification, ModelCallError>;
}

pub type SharedJudge = Arc<dyn Judge>;

/// Judges wired into the cascade
#[derive(Clone)]
pub struct JudgePanel {
    /// Single-judge stage
    pub primary: SharedJudge,
    /// Concurrent voters for the consensus stage
    pub voters: Vec<SharedJudge>,
    /// Invoked only when the voters disagree
    pub tiebreaker: Option<SharedJudge>,
}

/// Every collaborator a refinement session needs
#[derive(Clone)]
pub struct Collaborators {
    pub judges: JudgePanel,
    pub patcher: Arc<dyn Patcher>,
    pub regenerator: Arc<dyn SectionRegenerator>,
    pub fix_verifier: Arc<dyn FixVerifier>,
}
