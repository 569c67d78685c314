//! Verifier: cheap patch checks plus the Quality Lock regression guard
//!
//! ```text
//! patched text ──▶ tier 1: section heuristics (free)
//!              ──▶ tier 2: delta judge "was this addressed?" (one cheap call)
//!              ──▶ quality lock: locked criteria must stay above lock − tolerance
//! ```
//!
//! Full cascade re-evaluation happens once per iteration boundary, where
//! [`enforce_boundary_locks`] re-checks every locked section.

use tracing::{debug, warn};

use crate::collaborators::{FixVerifier, ModelCallError};
use crate::config::{HeuristicConfig, VerifierConfig};
use crate::heuristics::rules;
use crate::resilience::RetryPolicy;
use crate::state::{
    CriterionScores, FixAction, FixVerification, IterationState, QualityLockRegistry,
    RegressionRecord, SectionScores, Severity, TargetedIssue,
};

/// Raised-by marker for issues re-queued after a Quality Lock trip
pub const QUALITY_LOCK_RATER: &str = "quality_lock";

/// Per-patch verification
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier {
    heuristics: HeuristicConfig,
    config: VerifierConfig,
}

impl Verifier {
    pub fn new(heuristics: HeuristicConfig, config: VerifierConfig) -> Self {
        Self { heuristics, config }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Tier 1: section-scoped re-run of the heuristic rule family.
    ///
    /// Only damage introduced by the patch counts; problems already present
    /// in `before` do not fail it.
    pub fn check_section(&self, before: &str, after: &str, action: FixAction) -> Vec<String> {
        let mut reasons = Vec::new();

        if after.trim().is_empty() {
            reasons.push("patched section is empty".to_string());
            return reasons;
        }

        let old_len = before.chars().count();
        if old_len > 0 {
            let (low, high) = match action {
                FixAction::SurgicalEdit => self.heuristics.edit_length_ratio,
                FixAction::RegenerateSection => self.heuristics.regenerate_length_ratio,
            };
            let ratio = after.chars().count() as f64 / old_len as f64;
            if ratio < low || ratio > high {
                reasons.push(format!(
                    "length changed by factor {:.2}, allowed {:.2}-{:.2}",
                    ratio, low, high
                ));
            }
        }

        let old_script = rules::script_profile(before);
        let new_script = rules::script_profile(after);
        let limit = self.heuristics.max_foreign_script_ratio;
        let newly_mixed = new_script.foreign_ratio > limit && old_script.foreign_ratio <= limit;
        let switched = old_script.dominant.is_some()
            && new_script.dominant.is_some()
            && old_script.dominant != new_script.dominant;
        if newly_mixed || switched {
            reasons.push(format!(
                "script mixing introduced ({:.1}% foreign letters)",
                new_script.foreign_ratio * 100.0
            ));
        }

        if rules::fences_balanced(before) && !rules::fences_balanced(after) {
            reasons.push("code fences no longer balanced".to_string());
        }

        let old_diagrams = rules::invalid_diagrams(before).len();
        let new_diagrams = rules::invalid_diagrams(after);
        if new_diagrams.len() > old_diagrams {
            reasons.push(format!("diagram broken: {}", new_diagrams.join("; ")));
        }

        if !reasons.is_empty() {
            debug!(reasons = ?reasons, "Tier 1 verification failed");
        }
        reasons
    }

    /// Tier 2: ask the delta judge whether the issue was addressed
    pub async fn delta_check(
        &self,
        fix_verifier: &dyn FixVerifier,
        retry: &RetryPolicy,
        issue: &TargetedIssue,
        before: &str,
        after: &str,
    ) -> Result<FixVerification, ModelCallError> {
        let verification = retry
            .call("delta_judge", move || async move {
                let verification = fix_verifier.verify_fix(issue, before, after).await?;
                if let Some((criterion, score)) = verification
                    .criterion_scores
                    .iter()
                    .find(|(_, s)| !(s.is_finite() && (0.0..=1.0).contains(*s)))
                {
                    return Err(ModelCallError::MalformedResponse(format!(
                        "{} score out of range: {}",
                        criterion, score
                    )));
                }
                Ok(verification)
            })
            .await?;
        debug!(
            addressed = verification.addressed,
            rationale = %verification.rationale,
            "Delta judge answered"
        );
        Ok(verification)
    }

    /// Lock criteria of a freshly patched section that are passing
    pub fn lock_section(
        &self,
        registry: &mut QualityLockRegistry,
        section_id: &str,
        scores: &CriterionScores,
        text: &str,
    ) {
        registry.lock_passing(
            section_id,
            scores,
            self.config.criterion_pass_threshold,
            self.config.lock_tolerance,
            text,
        );
    }
}

/// Regression records for every locked criterion below its floor
pub fn regressions_for(
    registry: &QualityLockRegistry,
    iteration: u32,
    section_id: &str,
    observed: &CriterionScores,
) -> Vec<RegressionRecord> {
    registry
        .find_regressions(section_id, observed)
        .into_iter()
        .map(|(criterion, lock, observed_score)| RegressionRecord {
            iteration,
            section_id: section_id.to_string(),
            criterion,
            locked_score: lock.locked_score,
            observed_score,
        })
        .collect()
}

/// Issue re-queued for the next iteration after a regression
pub fn requeue_issue(record: &RegressionRecord, tolerance: f64) -> TargetedIssue {
    TargetedIssue::new(
        record.criterion,
        Severity::Major,
        Some(&record.section_id),
        format!(
            "Restore {} to at least {:.2} without undoing earlier fixes",
            record.criterion.label(),
            record.locked_score - tolerance
        ),
    )
    .from_rater(QUALITY_LOCK_RATER)
}

/// Boundary Quality Lock check against the cascade's section scores.
///
/// Regressed sections revert to the text they had when their locks were set;
/// the regressions are recorded and their criteria re-queued.
pub fn enforce_boundary_locks(
    state: &mut IterationState,
    section_scores: &SectionScores,
    tolerance: f64,
) -> Vec<RegressionRecord> {
    let mut found = Vec::new();
    for (section_id, observed) in section_scores {
        let records = regressions_for(&state.quality_locks, state.iteration(), section_id, observed);
        if records.is_empty() {
            continue;
        }
        if let Some(baseline) = state.quality_locks.baseline(section_id).map(str::to_string) {
            state.content.set_body(section_id, baseline);
        }
        for record in &records {
            warn!(
                section_id = %record.section_id,
                criterion = %record.criterion,
                locked = record.locked_score,
                observed = record.observed_score,
                "Quality lock regression at iteration boundary, section reverted"
            );
            state.carried_issues.push(requeue_issue(record, tolerance));
        }
        found.extend(records);
    }
    state.regressions.extend(found.iter().cloned());
    found
}

/// Criteria a section is judged on when no fresh scores exist
pub fn fallback_scores(section_scores: &SectionScores, section_id: &str) -> CriterionScores {
    section_scores.get(section_id).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OperationMode, SessionLimits};
    use crate::state::{Criterion, Document, Section};

    fn verifier() -> Verifier {
        Verifier::default()
    }

    #[test]
    fn test_tier1_accepts_reasonable_edit() {
        let before = "Water boils at 100 degrees Celsius at sea level.";
        let after = "At sea level, water boils at 100 degrees Celsius.";
        assert!(verifier()
            .check_section(before, after, FixAction::SurgicalEdit)
            .is_empty());
    }

    #[test]
    fn test_tier1_rejects_catastrophic_length_change() {
        let before = "A fairly long paragraph about the water cycle and evaporation.";
        let reasons = verifier().check_section(before, "Water.", FixAction::SurgicalEdit);
        assert!(reasons[0].contains("length"));
        // Regeneration tolerates a wider band
        let longer = before.repeat(3);
        assert!(verifier()
            .check_section(before, &longer, FixAction::RegenerateSection)
            .is_empty());
    }

    #[test]
    fn test_tier1_rejects_new_script_mixing_and_broken_fences() {
        let before = "Evaporation moves water into the air.";
        let mixed = "Evaporation перемещает воду into the air.";
        let reasons = verifier().check_section(before, mixed, FixAction::SurgicalEdit);
        assert!(reasons.iter().any(|r| r.contains("script")));

        let unbalanced = "Evaporation moves water.\n```python\nprint(1)";
        let reasons = verifier().check_section(before, unbalanced, FixAction::RegenerateSection);
        assert!(reasons.iter().any(|r| r.contains("fences")));
    }

    #[test]
    fn test_boundary_lock_reverts_and_requeues() {
        let document = Document::new(vec![Section::new("s1", "One", "patched text")]);
        let mut state =
            IterationState::new(document, OperationMode::FullAuto, SessionLimits::default());
        let mut scores = CriterionScores::new();
        scores.insert(Criterion::ClarityReadability, 0.9);
        verifier().lock_section(&mut state.quality_locks, "s1", &scores, "locked text");

        let mut observed = SectionScores::new();
        let mut dropped = CriterionScores::new();
        dropped.insert(Criterion::ClarityReadability, 0.8);
        observed.insert("s1".to_string(), dropped);

        let records = enforce_boundary_locks(&mut state, &observed, 0.05);
        assert_eq!(records.len(), 1);
        assert_eq!(state.regressions.len(), 1);
        assert_eq!(state.content.section("s1").unwrap().body, "locked text");
        assert_eq!(state.carried_issues.len(), 1);
        assert_eq!(state.carried_issues[0].raised_by, QUALITY_LOCK_RATER);
    }

    #[test]
    fn test_small_drop_within_tolerance_is_not_regression() {
        let mut registry = QualityLockRegistry::new();
        let mut scores = CriterionScores::new();
        scores.insert(Criterion::FactualAccuracy, 0.9);
        verifier().lock_section(&mut registry, "s1", &scores, "t");
        scores.insert(Criterion::FactualAccuracy, 0.86);
        assert!(regressions_for(&registry, 1, "s1", &scores).is_empty());
    }
}
