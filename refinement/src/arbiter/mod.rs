//! Arbiter: consolidates verdicts into a conflict-resolved refinement plan
//!
//! Pure planning: the Arbiter never touches content and never calls a model.
//! Identical inputs always produce an identical plan (ordered maps only).
//!
//! # Pipeline
//!
//! ```text
//! CascadeResult ──▶ alpha over criteria × judges ──▶ tier
//!      │
//!      ▼
//! issues ──▶ locate (unlocated / locked / sections)
//!        ──▶ cluster by (section, criterion)
//!        ──▶ filter by tier (deterministic issues always pass)
//!        ──▶ resolve conflicts per section
//!        ──▶ Router (global check, per-task action)
//!        ──▶ Batcher
//! ```

pub mod agreement;
pub mod conflict;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::config::ArbiterConfig;
use crate::router::{build_batches, Router};
use crate::state::{
    AgreementTier, CascadeResult, Criterion, Document, FixAction, PlanStatus, RefinementPlan,
    SectionId, SectionRefinementTask, TargetedIssue,
};

pub use agreement::{agreement_tier, krippendorff_alpha_interval, verdict_agreement};
pub use conflict::{resolve, Polarity, ResolvedInstructions};

/// Plan builder
#[derive(Debug, Clone, Copy, Default)]
pub struct Arbiter {
    config: ArbiterConfig,
    router: Router,
}

/// Issues sorted by where they can be applied
#[derive(Debug, Default)]
struct LocatedIssues {
    by_cluster: BTreeMap<(SectionId, Criterion), Vec<TargetedIssue>>,
    unlocated: Vec<TargetedIssue>,
    blocked: Vec<TargetedIssue>,
}

impl Arbiter {
    pub fn new(config: ArbiterConfig) -> Self {
        Self {
            config,
            router: Router::new(config),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Build the plan for one iteration.
    ///
    /// `carried` are issues re-queued from the previous iteration (regressions,
    /// failed transition checks); they bypass agreement filtering.
    pub fn plan(
        &self,
        result: &CascadeResult,
        document: &Document,
        locked_sections: &BTreeSet<SectionId>,
        carried: &[TargetedIssue],
    ) -> RefinementPlan {
        let alpha = verdict_agreement(&result.verdicts, result.confidence);
        let tier = agreement_tier(alpha, &self.config);
        debug!(alpha, tier = ?tier, verdicts = result.verdicts.len(), "Agreement computed");

        let located = self.locate(
            result.issues.iter().chain(carried.iter()),
            document,
            locked_sections,
        );
        let carried_keys: BTreeSet<(Option<&str>, Criterion, &str)> = carried
            .iter()
            .map(|i| (i.section_id.as_deref(), i.criterion, i.fix_instructions.as_str()))
            .collect();

        let mut kept: BTreeMap<SectionId, Vec<TargetedIssue>> = BTreeMap::new();
        let mut surfaced = Vec::new();
        for ((section_id, _), cluster) in located.by_cluster {
            let raters: BTreeSet<&str> = cluster
                .iter()
                .filter(|i| !i.is_deterministic())
                .map(|i| i.raised_by.as_str())
                .collect();
            let rater_count = raters.len();
            for issue in cluster {
                let trusted = issue.is_deterministic()
                    || carried_keys.contains(&(
                        issue.section_id.as_deref(),
                        issue.criterion,
                        issue.fix_instructions.as_str(),
                    ));
                let keep = trusted
                    || match tier {
                        AgreementTier::High => true,
                        AgreementTier::Moderate => {
                            rater_count >= 2
                                || (self.config.moderate_keeps_critical && issue.is_critical())
                        }
                        AgreementTier::Low => issue.is_critical(),
                    };
                if keep {
                    kept.entry(section_id.clone()).or_default().push(issue);
                } else {
                    surfaced.push(issue);
                }
            }
        }

        let critical_sections: BTreeSet<SectionId> = kept
            .iter()
            .filter(|(_, issues)| issues.iter().any(TargetedIssue::is_critical))
            .map(|(id, _)| id.clone())
            .chain(
                located
                    .blocked
                    .iter()
                    .filter(|i| i.is_critical())
                    .filter_map(|i| i.section_id.clone()),
            )
            .collect();

        let mut tasks: Vec<SectionRefinementTask> = kept
            .into_iter()
            .filter_map(|(section_id, issues)| self.build_task(section_id, issues, document))
            .collect();
        tasks.sort_by_key(|t| t.section_index);

        let mut transition_checks = BTreeSet::new();
        for task in tasks
            .iter()
            .filter(|t| t.action == FixAction::RegenerateSection)
        {
            let neighbours = [task.section_index.checked_sub(1), Some(task.section_index + 1)];
            for index in neighbours.into_iter().flatten() {
                let Some(neighbour) = document.sections.get(index) else {
                    continue;
                };
                let regenerated = tasks.iter().any(|t| {
                    t.section_id == neighbour.id && t.action == FixAction::RegenerateSection
                });
                if !regenerated {
                    transition_checks.insert(neighbour.id.clone());
                }
            }
        }

        let global = self
            .router
            .global_check(result, &critical_sections, document.sections.len());
        let (status, execution_batches) = match global {
            Some(reason) => (PlanStatus::FullRegenerate { reason }, Vec::new()),
            None => (PlanStatus::Pending, build_batches(&tasks)),
        };

        info!(
            alpha,
            tier = ?tier,
            tasks = tasks.len(),
            batches = execution_batches.len(),
            surfaced = surfaced.len(),
            blocked = located.blocked.len(),
            full_regenerate = matches!(status, PlanStatus::FullRegenerate { .. }),
            "Refinement plan built"
        );

        RefinementPlan {
            tasks,
            execution_batches,
            agreement_score: alpha,
            agreement_tier: tier,
            status,
            surfaced_issues: surfaced,
            blocked_issues: located.blocked,
            unlocated_issues: located.unlocated,
            transition_checks,
        }
    }

    fn locate<'a>(
        &self,
        issues: impl Iterator<Item = &'a TargetedIssue>,
        document: &Document,
        locked_sections: &BTreeSet<SectionId>,
    ) -> LocatedIssues {
        let mut located = LocatedIssues::default();
        for issue in issues {
            match issue.section_id.as_deref() {
                Some(id) if document.index_of(id).is_some() => {
                    if locked_sections.contains(id) {
                        located.blocked.push(issue.clone());
                    } else {
                        located
                            .by_cluster
                            .entry((id.to_string(), issue.criterion))
                            .or_default()
                            .push(issue.clone());
                    }
                }
                _ => located.unlocated.push(issue.clone()),
            }
        }
        located
    }

    fn build_task(
        &self,
        section_id: SectionId,
        issues: Vec<TargetedIssue>,
        document: &Document,
    ) -> Option<SectionRefinementTask> {
        let section_index = document.index_of(&section_id)?;
        if issues.is_empty() {
            return None;
        }
        let action = self.router.route_section(&issues);
        let synthesized_instructions = resolve(&issues).render();
        let priority = issues
            .iter()
            .map(|i| i.severity as u8 * Criterion::ALL.len() as u8 + i.criterion.priority_rank())
            .min()
            .unwrap_or(u8::MAX);
        Some(SectionRefinementTask {
            section_id,
            section_index,
            action,
            synthesized_instructions,
            priority,
            source_issues: issues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        Confidence, CriterionScores, HeuristicMetrics, HeuristicResult, JudgeVerdict,
        Recommendation, Section, SectionScores, Severity,
    };
    use crate::state::{CascadeStage, HEURISTIC_RATER};

    fn document(n: usize) -> Document {
        Document::new(
            (0..n)
                .map(|i| Section::new(format!("s{}", i), format!("Section {}", i), "body"))
                .collect(),
        )
    }

    fn verdict(model: &str, scores: [f64; 2], issues: Vec<TargetedIssue>) -> JudgeVerdict {
        let mut per_criterion_scores = CriterionScores::new();
        per_criterion_scores.insert(Criterion::FactualAccuracy, scores[0]);
        per_criterion_scores.insert(Criterion::ClarityReadability, scores[1]);
        JudgeVerdict {
            model_id: model.to_string(),
            overall_score: 0.7,
            per_criterion_scores,
            section_scores: SectionScores::new(),
            confidence: Confidence::Medium,
            issues,
            recommendation: Recommendation::Refine,
            tokens_used: 0,
        }
    }

    fn judged(model: &str, criterion: Criterion, severity: Severity, section: &str, fix: &str) -> TargetedIssue {
        TargetedIssue::new(criterion, severity, Some(section), fix).from_rater(model)
    }

    fn result(verdicts: Vec<JudgeVerdict>) -> CascadeResult {
        let issues = verdicts.iter().flat_map(|v| v.issues.clone()).collect();
        CascadeResult {
            stage: CascadeStage::ClevVoting,
            stage_reason: String::new(),
            heuristic: HeuristicResult {
                passed: true,
                metrics: HeuristicMetrics {
                    structural_score: 1.0,
                    ..Default::default()
                },
                failure_reasons: vec![],
                warnings: vec![],
                issues: vec![],
            },
            verdicts,
            consensus_method: None,
            final_score: 0.7,
            final_recommendation: Recommendation::Refine,
            confidence: Confidence::Medium,
            per_criterion_scores: CriterionScores::new(),
            section_scores: SectionScores::new(),
            issues,
            tokens_used: 0,
            cost_savings_ratio: 0.0,
            degraded: false,
        }
    }

    #[test]
    fn test_high_agreement_keeps_everything() {
        let r = result(vec![
            verdict(
                "a",
                [0.9, 0.5],
                vec![judged("a", Criterion::ClarityReadability, Severity::Minor, "s1", "simplify")],
            ),
            verdict("b", [0.9, 0.5], vec![]),
        ]);
        let plan = Arbiter::default().plan(&r, &document(5), &BTreeSet::new(), &[]);
        assert_eq!(plan.agreement_tier, AgreementTier::High);
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].action, FixAction::SurgicalEdit);
        assert!(plan.surfaced_issues.is_empty());
        assert_eq!(plan.status, PlanStatus::Pending);
    }

    #[test]
    fn test_low_agreement_keeps_only_critical() {
        let r = result(vec![
            verdict(
                "a",
                [0.9, 0.2],
                vec![
                    judged("a", Criterion::ClarityReadability, Severity::Minor, "s1", "simplify"),
                    judged("a", Criterion::FactualAccuracy, Severity::Critical, "s3", "fix date"),
                ],
            ),
            verdict("b", [0.2, 0.9], vec![]),
        ]);
        let plan = Arbiter::default().plan(&r, &document(5), &BTreeSet::new(), &[]);
        assert_eq!(plan.agreement_tier, AgreementTier::Low);
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].section_id, "s3");
        assert_eq!(plan.tasks[0].action, FixAction::RegenerateSection);
        assert_eq!(plan.surfaced_issues.len(), 1);
        // Neighbours of a regenerated section get a transition check
        let checks: Vec<&str> = plan.transition_checks.iter().map(String::as_str).collect();
        assert_eq!(checks, vec!["s2", "s4"]);
        assert!(plan.agreement_score >= -1.0 && plan.agreement_score <= 1.0);
    }

    fn moderate_result() -> CascadeResult {
        result(vec![
            verdict(
                "a",
                [0.9, 0.5],
                vec![
                    judged("a", Criterion::ClarityReadability, Severity::Minor, "s1", "simplify"),
                    judged("a", Criterion::FactualAccuracy, Severity::Critical, "s3", "fix date"),
                ],
            ),
            verdict(
                "b",
                [0.7, 0.5],
                vec![judged("b", Criterion::ClarityReadability, Severity::Major, "s1", "shorten")],
            ),
        ])
    }

    #[test]
    fn test_moderate_agreement_needs_two_raters() {
        let plan = Arbiter::default().plan(&moderate_result(), &document(5), &BTreeSet::new(), &[]);
        assert_eq!(plan.agreement_tier, AgreementTier::Moderate);
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].section_id, "s1");
        assert_eq!(plan.tasks[0].source_issues.len(), 2);
        // A critical issue from a single judge is surfaced, not applied
        assert_eq!(plan.surfaced_issues.len(), 1);
        assert_eq!(plan.surfaced_issues[0].section_id.as_deref(), Some("s3"));
    }

    #[test]
    fn test_moderate_agreement_can_keep_critical() {
        let arbiter = Arbiter::new(ArbiterConfig {
            moderate_keeps_critical: true,
            ..Default::default()
        });
        let plan = arbiter.plan(&moderate_result(), &document(5), &BTreeSet::new(), &[]);
        assert_eq!(plan.agreement_tier, AgreementTier::Moderate);
        let sections: Vec<&str> = plan.tasks.iter().map(|t| t.section_id.as_str()).collect();
        assert_eq!(sections, vec!["s1", "s3"]);
        assert!(plan.surfaced_issues.is_empty());
    }

    #[test]
    fn test_locked_and_unlocated_issues_are_set_aside() {
        let mut stray = judged("a", Criterion::Completeness, Severity::Major, "s1", "x");
        stray.section_id = None;
        let r = result(vec![
            verdict(
                "a",
                [0.9, 0.5],
                vec![
                    judged("a", Criterion::ClarityReadability, Severity::Minor, "s1", "simplify"),
                    judged("a", Criterion::ClarityReadability, Severity::Minor, "ghost", "y"),
                    stray,
                ],
            ),
            verdict("b", [0.9, 0.5], vec![]),
        ]);
        let locked: BTreeSet<SectionId> = ["s1".to_string()].into_iter().collect();
        let plan = Arbiter::default().plan(&r, &document(3), &locked, &[]);
        assert!(plan.tasks.is_empty());
        assert_eq!(plan.blocked_issues.len(), 1);
        assert_eq!(plan.unlocated_issues.len(), 2);
    }

    #[test]
    fn test_conflicting_instructions_resolved_in_task() {
        let r = result(vec![
            verdict(
                "a",
                [0.9, 0.5],
                vec![
                    judged("a", Criterion::Completeness, Severity::Minor, "s2", "add detail"),
                    judged("a", Criterion::ClarityReadability, Severity::Minor, "s2", "simplify"),
                ],
            ),
            verdict("b", [0.9, 0.5], vec![]),
        ]);
        let plan = Arbiter::default().plan(&r, &document(5), &BTreeSet::new(), &[]);
        let task = plan.task("s2").unwrap();
        assert!(task.synthesized_instructions.contains("simplify"));
        assert!(task
            .synthesized_instructions
            .contains("do not reduce completeness"));
        assert_eq!(task.source_issues.len(), 2);
    }

    #[test]
    fn test_too_many_critical_sections_forces_full_regenerate() {
        let issues: Vec<_> = (0..3)
            .map(|i| {
                judged(
                    "a",
                    Criterion::FactualAccuracy,
                    Severity::Critical,
                    &format!("s{}", i),
                    "wrong",
                )
            })
            .collect();
        let r = result(vec![verdict("a", [0.9, 0.5], issues), verdict("b", [0.9, 0.5], vec![])]);
        let plan = Arbiter::default().plan(&r, &document(5), &BTreeSet::new(), &[]);
        assert!(plan.is_full_regenerate());
        assert!(plan.execution_batches.is_empty());
    }

    #[test]
    fn test_deterministic_issues_bypass_low_agreement() {
        let heuristic_issue = TargetedIssue::new(
            Criterion::ClarityReadability,
            Severity::Minor,
            Some("s0"),
            "close the fence",
        )
        .from_rater(HEURISTIC_RATER);
        let mut r = result(vec![verdict("a", [0.9, 0.1], vec![]), verdict("b", [0.1, 0.9], vec![])]);
        r.issues.push(heuristic_issue);
        let plan = Arbiter::default().plan(&r, &document(4), &BTreeSet::new(), &[]);
        assert_eq!(plan.agreement_tier, AgreementTier::Low);
        assert_eq!(plan.tasks.len(), 1);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let make = || {
            result(vec![
                verdict(
                    "a",
                    [0.8, 0.6],
                    vec![
                        judged("a", Criterion::EngagementExamples, Severity::Major, "s4", "add example"),
                        judged("a", Criterion::ClarityReadability, Severity::Minor, "s0", "shorten"),
                    ],
                ),
                verdict(
                    "b",
                    [0.82, 0.58],
                    vec![judged("b", Criterion::EngagementExamples, Severity::Minor, "s4", "add story")],
                ),
            ])
        };
        let arbiter = Arbiter::default();
        let first = arbiter.plan(&make(), &document(6), &BTreeSet::new(), &[]);
        let second = arbiter.plan(&make(), &document(6), &BTreeSet::new(), &[]);
        assert_eq!(first, second);
        assert!(first.tasks.iter().all(|t| !t.source_issues.is_empty()));
    }
}
