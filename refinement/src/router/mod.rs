//! Router: deterministic mapping from issue to fix action
//!
//! No model is consulted. Routing is a total function over
//! (failure category, criterion, severity):
//!
//! | Category | Criterion | Severity | Action |
//! |----------|-----------|----------|--------|
//! | structural | any | critical | REGENERATE_SECTION |
//! | structural | any | major/minor | SURGICAL_EDIT |
//! | content | any | minor | SURGICAL_EDIT |
//! | content | factual accuracy, completeness | critical/major | REGENERATE_SECTION |
//! | content | clarity, engagement | critical/major | SURGICAL_EDIT |
//! | content | objectives, structure | critical | REGENERATE_SECTION |
//! | content | objectives, structure | major | judge hint, else SURGICAL_EDIT |
//!
//! Before any per-task routing, [`Router::global_check`] decides whether the
//! damage is too broad for targeted repair.

pub mod batcher;

use std::collections::BTreeSet;

use tracing::warn;

use crate::config::ArbiterConfig;
use crate::state::{
    CascadeResult, CascadeStage, Criterion, FailureCategory, FixAction, SectionId, Severity,
    TargetedIssue,
};

pub use batcher::build_batches;

/// Stateless issue router
#[derive(Debug, Clone, Copy, Default)]
pub struct Router {
    config: ArbiterConfig,
}

impl Router {
    pub fn new(config: ArbiterConfig) -> Self {
        Self { config }
    }

    /// Fix action for a single issue
    pub fn route(&self, issue: &TargetedIssue) -> FixAction {
        use Criterion::*;

        match (issue.category, issue.criterion, issue.severity) {
            (FailureCategory::Structural, _, Severity::Critical) => FixAction::RegenerateSection,
            (FailureCategory::Structural, _, _) => FixAction::SurgicalEdit,
            (FailureCategory::Content, _, Severity::Minor) => FixAction::SurgicalEdit,
            (FailureCategory::Content, FactualAccuracy | Completeness, _) => {
                FixAction::RegenerateSection
            }
            (FailureCategory::Content, ClarityReadability | EngagementExamples, _) => {
                FixAction::SurgicalEdit
            }
            (
                FailureCategory::Content,
                LearningObjectiveAlignment | PedagogicalStructure,
                Severity::Critical,
            ) => FixAction::RegenerateSection,
            (
                FailureCategory::Content,
                LearningObjectiveAlignment | PedagogicalStructure,
                Severity::Major,
            ) => issue.fix_action.unwrap_or(FixAction::SurgicalEdit),
        }
    }

    /// A section is regenerated when any of its issues routes to regeneration
    pub fn route_section<'a>(
        &self,
        issues: impl IntoIterator<Item = &'a TargetedIssue>,
    ) -> FixAction {
        if issues
            .into_iter()
            .any(|i| self.route(i) == FixAction::RegenerateSection)
        {
            FixAction::RegenerateSection
        } else {
            FixAction::SurgicalEdit
        }
    }

    /// Aggregate structural score of the evaluated content
    pub fn structural_score(&self, result: &CascadeResult) -> f64 {
        if result.stage == CascadeStage::Heuristic {
            return result.heuristic.metrics.structural_score;
        }
        result
            .per_criterion_scores
            .get(&Criterion::PedagogicalStructure)
            .copied()
            .unwrap_or(result.heuristic.metrics.structural_score)
    }

    /// Decide whether the whole document must be regenerated.
    ///
    /// `critical_sections` are the sections carrying a critical issue after
    /// agreement filtering. Returns the reason when targeted repair is off the table.
    pub fn global_check(
        &self,
        result: &CascadeResult,
        critical_sections: &BTreeSet<SectionId>,
        section_count: usize,
    ) -> Option<String> {
        let structural = self.structural_score(result);
        if structural < self.config.full_regenerate_structural_floor {
            warn!(structural, "Structural score below floor, full regeneration");
            return Some(format!(
                "structural score {:.2} below {:.2}",
                structural, self.config.full_regenerate_structural_floor
            ));
        }

        if section_count > 0 {
            let ratio = critical_sections.len() as f64 / section_count as f64;
            if ratio > self.config.full_regenerate_critical_ratio {
                warn!(ratio, "Too many critical sections, full regeneration");
                return Some(format!(
                    "{} of {} sections carry a critical issue",
                    critical_sections.len(),
                    section_count
                ));
            }
        }

        // Document-level hard failures (length, missing sections) have no section to repair
        let unlocated_hard_failure = result.stage == CascadeStage::Heuristic
            && result
                .issues
                .iter()
                .any(|i| i.is_deterministic() && i.is_critical() && i.section_id.is_none());
        if unlocated_hard_failure {
            warn!("Document-level heuristic failure, full regeneration");
            return Some(format!(
                "document-level failure: {}",
                result.heuristic.failure_reasons.join("; ")
            ));
        }
        None
    }
}
