//! Cascade and arbiter integration tests: staged evaluation against scripted judges.
//!
//! Tests verify:
//! - Hard heuristic failures never reach a judge
//! - A confident single judge settles the evaluation without voting
//! - Disagreeing voters pull in the tiebreaker
//! - Quorum loss degrades instead of failing
//! - Conflicting instructions for one section are resolved by priority

mod common;

use std::collections::BTreeSet;

use common::*;
use refinement::cascade::{CascadeController, CascadeError, SINGLE_JUDGE_SAVINGS};
use refinement::config::{CascadeConfig, HeuristicConfig, OperationMode};
use refinement::heuristics::HeuristicFilter;
use refinement::resilience::RetryPolicy;
use refinement::state::{
    CascadeStage, Confidence, ConsensusMethod, Criterion, FixAction, Recommendation, Severity,
    TargetedIssue,
};
use refinement::{Arbiter, JudgePanel, SharedJudge};

fn controller(panel: JudgePanel) -> CascadeController {
    let config = fast_config(OperationMode::SemiAuto);
    CascadeController::new(
        HeuristicFilter::new(HeuristicConfig::default()),
        panel,
        RetryPolicy::new(&config.retry),
        CascadeConfig::default(),
    )
}

fn panel(
    primary: &std::sync::Arc<ScriptedJudge>,
    voters: &[&std::sync::Arc<ScriptedJudge>],
    tiebreaker: Option<&std::sync::Arc<ScriptedJudge>>,
) -> JudgePanel {
    JudgePanel {
        primary: primary.clone(),
        voters: voters.iter().map(|v| (*v).clone() as SharedJudge).collect(),
        tiebreaker: tiebreaker.map(|t| t.clone() as SharedJudge),
    }
}

// ── Heuristic stage ────────────────────────────────────────────────

#[tokio::test]
async fn test_short_content_stops_at_heuristics() {
    let primary = ScriptedJudge::new(
        "primary",
        vec![Ok(verdict(0.9, Confidence::High, Recommendation::Accept, vec![]))],
    );
    let voter = ScriptedJudge::new("voter", vec![]);
    let cascade = controller(panel(&primary, &[&voter, &voter], None));

    let document = lesson(1, 120);
    let result = cascade.evaluate(&document, &rubric()).await.unwrap();

    assert_eq!(result.stage, CascadeStage::Heuristic);
    assert_eq!(result.final_recommendation, Recommendation::Regenerate);
    assert!((result.cost_savings_ratio - 1.0).abs() < f64::EPSILON);
    assert!(!result.heuristic.passed);
    assert_eq!(result.tokens_used, 0);
    assert_eq!(primary.calls(), 0);
    assert_eq!(voter.calls(), 0);
}

// ── Single judge stage ─────────────────────────────────────────────

#[tokio::test]
async fn test_confident_single_judge_accepts() {
    let primary = ScriptedJudge::new(
        "primary",
        vec![Ok(verdict(0.93, Confidence::High, Recommendation::Accept, vec![]))],
    );
    let voter_a = ScriptedJudge::new("voter-a", vec![]);
    let voter_b = ScriptedJudge::new("voter-b", vec![]);
    let cascade = controller(panel(&primary, &[&voter_a, &voter_b], None));

    let result = cascade.evaluate(&lesson(4, 150), &rubric()).await.unwrap();

    assert_eq!(result.stage, CascadeStage::SingleJudge);
    assert_eq!(result.final_recommendation, Recommendation::Accept);
    assert!((result.final_score - 0.93).abs() < 1e-9);
    assert!((result.cost_savings_ratio - SINGLE_JUDGE_SAVINGS).abs() < 1e-9);
    assert_eq!(result.verdicts.len(), 1);
    assert_eq!(result.verdicts[0].model_id, "primary");
    assert_eq!(voter_a.calls() + voter_b.calls(), 0);
}

#[tokio::test]
async fn test_medium_confidence_escalates_to_voting() {
    let primary = ScriptedJudge::new(
        "primary",
        vec![Ok(verdict(0.93, Confidence::Medium, Recommendation::Accept, vec![]))],
    );
    let voter_a = ScriptedJudge::new(
        "voter-a",
        vec![Ok(verdict(0.90, Confidence::High, Recommendation::Accept, vec![]))],
    );
    let voter_b = ScriptedJudge::new(
        "voter-b",
        vec![Ok(verdict(0.88, Confidence::High, Recommendation::Accept, vec![]))],
    );
    let cascade = controller(panel(&primary, &[&voter_a, &voter_b], None));

    let result = cascade.evaluate(&lesson(4, 150), &rubric()).await.unwrap();

    assert_eq!(result.stage, CascadeStage::ClevVoting);
    assert_eq!(result.consensus_method, Some(ConsensusMethod::Unanimous));
    assert_eq!(result.confidence, Confidence::High);
    assert!((result.final_score - 0.89).abs() < 1e-9);
    assert_eq!(result.cost_savings_ratio, 0.0);
    // Primary tokens still count even though its verdict was not decisive
    assert_eq!(result.tokens_used, 300);
}

// ── Voting stage ───────────────────────────────────────────────────

#[tokio::test]
async fn test_disagreement_invokes_tiebreaker() {
    let primary = ScriptedJudge::new(
        "primary",
        vec![Ok(verdict(0.72, Confidence::Medium, Recommendation::Refine, vec![]))],
    );
    let voter_a = ScriptedJudge::new(
        "voter-a",
        vec![Ok(verdict(0.60, Confidence::High, Recommendation::Regenerate, vec![]))],
    );
    let voter_b = ScriptedJudge::new(
        "voter-b",
        vec![Ok(verdict(0.85, Confidence::High, Recommendation::Accept, vec![]))],
    );
    let tiebreaker = ScriptedJudge::new(
        "tiebreaker",
        vec![Ok(verdict(0.80, Confidence::High, Recommendation::Refine, vec![]))],
    );
    let cascade = controller(panel(&primary, &[&voter_a, &voter_b], Some(&tiebreaker)));

    let result = cascade.evaluate(&lesson(4, 150), &rubric()).await.unwrap();

    assert_eq!(result.stage, CascadeStage::ClevVoting);
    assert_eq!(result.consensus_method, Some(ConsensusMethod::TieBreaker));
    assert_eq!(tiebreaker.calls(), 1);
    assert_eq!(result.verdicts.len(), 3);
    assert!((result.final_score - 0.75).abs() < 1e-9);
}

#[tokio::test]
async fn test_agreeing_voters_skip_tiebreaker() {
    let primary = ScriptedJudge::new(
        "primary",
        vec![Ok(verdict(0.70, Confidence::Low, Recommendation::Refine, vec![]))],
    );
    let voter_a = ScriptedJudge::new(
        "voter-a",
        vec![Ok(verdict(0.70, Confidence::High, Recommendation::Refine, vec![]))],
    );
    let voter_b = ScriptedJudge::new(
        "voter-b",
        vec![Ok(verdict(0.74, Confidence::High, Recommendation::Refine, vec![]))],
    );
    let tiebreaker = ScriptedJudge::new("tiebreaker", vec![]);
    let cascade = controller(panel(&primary, &[&voter_a, &voter_b], Some(&tiebreaker)));

    let result = cascade.evaluate(&lesson(4, 150), &rubric()).await.unwrap();

    assert_eq!(tiebreaker.calls(), 0);
    assert_eq!(result.consensus_method, Some(ConsensusMethod::Unanimous));
}

#[tokio::test]
async fn test_quorum_loss_degrades_to_single_verdict() {
    let primary = ScriptedJudge::failing("primary");
    let voter_a = ScriptedJudge::new(
        "voter-a",
        vec![Ok(verdict(0.70, Confidence::High, Recommendation::Refine, vec![]))],
    );
    let voter_b = ScriptedJudge::failing("voter-b");
    let cascade = controller(panel(&primary, &[&voter_a, &voter_b], None));

    let result = cascade.evaluate(&lesson(4, 150), &rubric()).await.unwrap();

    assert!(result.degraded);
    assert_eq!(result.stage, CascadeStage::ClevVoting);
    assert_eq!(result.confidence, Confidence::Low);
    assert_eq!(result.verdicts.len(), 1);
    assert_eq!(result.verdicts[0].model_id, "voter-a");
    // Initial attempt plus two retries
    assert_eq!(voter_b.calls(), 3);
}

#[tokio::test]
async fn test_malformed_verdict_is_dropped() {
    let primary = ScriptedJudge::failing("primary");
    let voter_a = ScriptedJudge::new(
        "voter-a",
        vec![Ok(verdict(1.7, Confidence::High, Recommendation::Accept, vec![]))],
    );
    let voter_b = ScriptedJudge::new(
        "voter-b",
        vec![Ok(verdict(0.70, Confidence::High, Recommendation::Refine, vec![]))],
    );
    let cascade = controller(panel(&primary, &[&voter_a, &voter_b], None));

    let result = cascade.evaluate(&lesson(4, 150), &rubric()).await.unwrap();

    assert!(result.degraded);
    assert!((result.final_score - 0.70).abs() < 1e-9);
}

#[tokio::test]
async fn test_no_judge_response_is_fatal() {
    let primary = ScriptedJudge::failing("primary");
    let voter_a = ScriptedJudge::failing("voter-a");
    let voter_b = ScriptedJudge::failing("voter-b");
    let cascade = controller(panel(&primary, &[&voter_a, &voter_b], None));

    let error = cascade
        .evaluate(&lesson(4, 150), &rubric())
        .await
        .unwrap_err();
    let CascadeError::NoJudgeResponse { failures } = error;
    assert_eq!(failures.len(), 2);
}

// ── Arbiter over a real cascade result ─────────────────────────────

#[tokio::test]
async fn test_conflicting_instructions_resolved_by_priority() {
    let issues = vec![
        TargetedIssue::new(
            Criterion::Completeness,
            Severity::Minor,
            Some("s2"),
            "Add more detail on the light reactions",
        ),
        TargetedIssue::new(
            Criterion::ClarityReadability,
            Severity::Minor,
            Some("s2"),
            "Simplify the explanation",
        ),
    ];
    let panel = SessionPanel::new(vec![(0.70, issues)]);
    let cascade = controller(panel.panel());
    let document = lesson(4, 150);

    let result = cascade.evaluate(&document, &rubric()).await.unwrap();
    let plan = Arbiter::default().plan(&result, &document, &BTreeSet::new(), &[]);

    assert_eq!(plan.tasks.len(), 1);
    let task = &plan.tasks[0];
    assert_eq!(task.section_id, "s2");
    assert_eq!(task.action, FixAction::SurgicalEdit);
    assert!(task
        .synthesized_instructions
        .starts_with("[clarity] Simplify the explanation"));
    assert!(task
        .synthesized_instructions
        .contains("do not reduce completeness"));
    assert!(!task.synthesized_instructions.contains("light reactions"));
    // Both voters raised both issues
    assert_eq!(task.source_issues.len(), 4);
}

#[tokio::test]
async fn test_identical_verdicts_give_identical_plans() {
    let issues = vec![
        clarity_issue("s1"),
        clarity_issue("s3"),
        TargetedIssue::new(
            Criterion::FactualAccuracy,
            Severity::Major,
            Some("s4"),
            "Oxygen is released, not absorbed",
        ),
    ];
    let document = lesson(4, 150);

    let first = SessionPanel::new(vec![(0.70, issues.clone())]);
    let second = SessionPanel::new(vec![(0.70, issues)]);
    let a = controller(first.panel())
        .evaluate(&document, &rubric())
        .await
        .unwrap();
    let b = controller(second.panel())
        .evaluate(&document, &rubric())
        .await
        .unwrap();

    let arbiter = Arbiter::default();
    let plan_a = arbiter.plan(&a, &document, &BTreeSet::new(), &[]);
    let plan_b = arbiter.plan(&b, &document, &BTreeSet::new(), &[]);
    assert_eq!(plan_a, plan_b);
    assert_eq!(plan_a.tasks.len(), 3);
    assert!(plan_a
        .tasks
        .iter()
        .all(|t| !t.source_issues.is_empty()));
    assert!((-1.0..=1.0).contains(&plan_a.agreement_score));
}
