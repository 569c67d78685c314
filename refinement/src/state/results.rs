//! Outcome records produced by the cascade and consumed by planning.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::types::{
    Confidence, CriterionScores, FixAction, JudgeVerdict, Recommendation, SectionId,
    SectionScores, TargetedIssue,
};

/// Metrics collected by the heuristic filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeuristicMetrics {
    pub word_count: usize,
    pub readability_grade: f64,
    pub example_count: usize,
    pub exercise_count: usize,
    pub foreign_script_ratio: f64,
    pub unbalanced_fence_sections: Vec<SectionId>,
    pub invalid_diagram_sections: Vec<SectionId>,
    pub missing_sections: Vec<String>,
    /// Fraction of hard checks that passed
    pub structural_score: f64,
}

/// Deterministic check outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeuristicResult {
    /// False when any hard check failed
    pub passed: bool,
    pub metrics: HeuristicMetrics,
    pub failure_reasons: Vec<String>,
    /// Soft findings (readability, example counts) that do not stop the cascade
    pub warnings: Vec<String>,
    pub issues: Vec<TargetedIssue>,
}

/// Cascade stage that produced the final result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStage {
    Heuristic,
    SingleJudge,
    ClevVoting,
}

impl std::fmt::Display for CascadeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Heuristic => write!(f, "heuristic"),
            Self::SingleJudge => write!(f, "single_judge"),
            Self::ClevVoting => write!(f, "clev_voting"),
        }
    }
}

/// How the multi-judge vote reached its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    Unanimous,
    Majority,
    TieBreaker,
}

/// Outcome of one evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeResult {
    pub stage: CascadeStage,
    pub stage_reason: String,
    pub heuristic: HeuristicResult,
    /// Verdicts the final result was computed from, in call order
    pub verdicts: Vec<JudgeVerdict>,
    pub consensus_method: Option<ConsensusMethod>,
    pub final_score: f64,
    pub final_recommendation: Recommendation,
    pub confidence: Confidence,
    pub per_criterion_scores: CriterionScores,
    pub section_scores: SectionScores,
    /// Heuristic issues plus every judge issue, tagged with its rater
    pub issues: Vec<TargetedIssue>,
    pub tokens_used: u64,
    pub cost_savings_ratio: f64,
    /// Quorum was lost and the result fell back to a single verdict
    pub degraded: bool,
}

impl CascadeResult {
    pub fn has_critical_issue(&self) -> bool {
        self.issues.iter().any(TargetedIssue::is_critical)
    }
}

/// Planned fix for one section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRefinementTask {
    pub section_id: SectionId,
    pub section_index: usize,
    pub action: FixAction,
    pub synthesized_instructions: String,
    /// Lower is more urgent
    pub priority: u8,
    pub source_issues: Vec<TargetedIssue>,
}

impl SectionRefinementTask {
    /// Most severe, highest-priority source issue; the one handed to the delta judge
    pub fn primary_issue(&self) -> Option<&TargetedIssue> {
        self.source_issues
            .iter()
            .min_by_key(|i| (i.severity, i.criterion))
    }
}

/// Kind of work in an execution batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Surgical,
    Regeneration,
}

/// Group of tasks that may run concurrently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionBatch {
    pub kind: BatchKind,
    /// Section ids in ascending section order
    pub section_ids: Vec<SectionId>,
}

/// Lifecycle of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    /// The damage is too broad for targeted repair
    FullRegenerate { reason: String },
    Executing,
    Completed,
    /// A budget ran out between batches
    Aborted,
}

/// Agreement tier selected from Krippendorff's alpha
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementTier {
    /// alpha >= 0.80: apply everything
    High,
    /// 0.67 <= alpha < 0.80: apply issues raised by at least two judges
    Moderate,
    /// alpha < 0.67: apply only critical issues
    Low,
}

/// Full repair plan for one iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementPlan {
    pub tasks: Vec<SectionRefinementTask>,
    pub execution_batches: Vec<ExecutionBatch>,
    pub agreement_score: f64,
    pub agreement_tier: AgreementTier,
    pub status: PlanStatus,
    /// Dropped by agreement filtering; shown to humans, never auto-applied
    pub surfaced_issues: Vec<TargetedIssue>,
    /// Raised against sections locked by the oscillation guard
    pub blocked_issues: Vec<TargetedIssue>,
    /// Document-level issues with no section to repair
    pub unlocated_issues: Vec<TargetedIssue>,
    /// Neighbours of regenerated sections that need a transition check
    pub transition_checks: BTreeSet<SectionId>,
}

impl RefinementPlan {
    pub fn task(&self, section_id: &str) -> Option<&SectionRefinementTask> {
        self.tasks.iter().find(|t| t.section_id == section_id)
    }

    pub fn is_full_regenerate(&self) -> bool {
        matches!(self.status, PlanStatus::FullRegenerate { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::{Criterion, Severity};

    #[test]
    fn test_stage_escalation_order() {
        assert!(CascadeStage::Heuristic < CascadeStage::SingleJudge);
        assert!(CascadeStage::SingleJudge < CascadeStage::ClevVoting);
        assert_eq!(CascadeStage::ClevVoting.to_string(), "clev_voting");
    }

    #[test]
    fn test_primary_issue_prefers_severity_then_priority() {
        let task = SectionRefinementTask {
            section_id: "s1".to_string(),
            section_index: 0,
            action: FixAction::SurgicalEdit,
            synthesized_instructions: String::new(),
            priority: 3,
            source_issues: vec![
                TargetedIssue::new(Criterion::FactualAccuracy, Severity::Minor, Some("s1"), "a"),
                TargetedIssue::new(Criterion::Completeness, Severity::Major, Some("s1"), "b"),
                TargetedIssue::new(Criterion::ClarityReadability, Severity::Major, Some("s1"), "c"),
            ],
        };
        assert_eq!(task.primary_issue().unwrap().fix_instructions, "c");
    }
}
