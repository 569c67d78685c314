//! Batch execution of a refinement plan
//!
//! Batches run strictly in plan order. Tasks inside a surgical batch run
//! concurrently, bounded by a semaphore of `concurrency` permits, and all read
//! the document as it was when the batch started. Results are verified
//! before anything touches the session content; a failed task leaves its
//! section untouched, which is the revert.
//!
//! Token and wall-clock budgets are checked at every batch boundary: calls in
//! flight finish, but no new batch is dispatched once a budget is spent.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::collaborators::{FixVerifier, Patcher, SectionRegenerator};
use crate::config::ExecutionConfig;
use crate::events::{RefinementEvent, SharedEventBus, TaskFailure};
use crate::resilience::RetryPolicy;
use crate::state::{
    ContextWindow, Criterion, CriterionScores, Document, FixAction, IterationState, PlanStatus,
    QualityLockRegistry, RefinementPlan, RegressionRecord, Rubric, SectionId,
    SectionRefinementTask, SectionScores, SectionSpec, Severity, TargetedIssue, TRANSITION_RATER,
};
use crate::verifier::{fallback_scores, regressions_for, requeue_issue, Verifier};

/// Summary of one plan execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    pub applied: Vec<SectionId>,
    pub failed: Vec<(SectionId, TaskFailure)>,
    pub batches_run: usize,
    /// A budget ran out before every batch was dispatched
    pub aborted: bool,
    pub tokens_used: u64,
    /// Neighbours whose transition check failed
    pub transition_failures: Vec<SectionId>,
}

struct PatchedSection {
    text: String,
    scores: CriterionScores,
}

struct TaskOutcome {
    section_id: SectionId,
    action: FixAction,
    tokens_used: u64,
    result: Result<PatchedSection, TaskFailure>,
    regressions: Vec<RegressionRecord>,
}

/// Runs plan batches against the patcher, regenerator and delta judge
pub struct BatchExecutor {
    patcher: Arc<dyn Patcher>,
    regenerator: Arc<dyn SectionRegenerator>,
    fix_verifier: Arc<dyn FixVerifier>,
    verifier: Verifier,
    retry: RetryPolicy,
    config: ExecutionConfig,
    limiter: Semaphore,
    events: SharedEventBus,
}

impl BatchExecutor {
    pub fn new(
        patcher: Arc<dyn Patcher>,
        regenerator: Arc<dyn SectionRegenerator>,
        fix_verifier: Arc<dyn FixVerifier>,
        verifier: Verifier,
        retry: RetryPolicy,
        config: ExecutionConfig,
        events: SharedEventBus,
    ) -> Self {
        Self {
            patcher,
            regenerator,
            fix_verifier,
            verifier,
            retry,
            limiter: Semaphore::new(config.concurrency.max(1)),
            config,
            events,
        }
    }

    /// Execute every batch of the plan, mutating the session content in place.
    ///
    /// `section_scores` are the boundary evaluation's scores, used to lock a
    /// patched section when the delta judge returns no fresh scores.
    pub async fn execute(
        &self,
        plan: &mut RefinementPlan,
        state: &mut IterationState,
        rubric: &Rubric,
        section_scores: &SectionScores,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        let batches = plan.execution_batches.clone();
        let mut regenerated: Vec<(SectionId, String)> = Vec::new();
        plan.status = PlanStatus::Executing;

        for (batch_index, batch) in batches.iter().enumerate() {
            if state.budget_exhausted() {
                warn!(
                    batch_index,
                    tokens = state.tokens_used,
                    "Budget exhausted at batch boundary, stopping execution"
                );
                report.aborted = true;
                break;
            }

            let iteration = state.iteration();
            self.events.publish(RefinementEvent::BatchStarted {
                session_id: state.session_id.clone(),
                iteration,
                batch_index,
                section_ids: batch.section_ids.clone(),
                timestamp: Utc::now(),
            });
            debug!(batch_index, kind = ?batch.kind, sections = ?batch.section_ids, "Dispatching batch");

            let snapshot = state.content.clone();
            let outcomes = {
                let locks = &state.quality_locks;
                let session_id = state.session_id.as_str();
                join_all(
                    batch
                        .section_ids
                        .iter()
                        .filter_map(|id| plan.task(id))
                        .map(|task| {
                            self.run_task(task, &snapshot, locks, rubric, session_id, iteration)
                        }),
                )
                .await
            };

            for outcome in outcomes {
                report.tokens_used += outcome.tokens_used;
                state.add_tokens(outcome.tokens_used);
                self.apply_outcome(outcome, state, section_scores, &snapshot, &mut report, &mut regenerated);
            }
            report.batches_run += 1;
        }

        if !report.aborted && !regenerated.is_empty() {
            self.check_transitions(plan, state, &regenerated, &mut report)
                .await;
        }

        plan.status = if report.aborted {
            PlanStatus::Aborted
        } else {
            PlanStatus::Completed
        };
        info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            batches = report.batches_run,
            aborted = report.aborted,
            tokens = report.tokens_used,
            "Plan execution finished"
        );
        report
    }

    fn apply_outcome(
        &self,
        outcome: TaskOutcome,
        state: &mut IterationState,
        section_scores: &SectionScores,
        snapshot: &Document,
        report: &mut ExecutionReport,
        regenerated: &mut Vec<(SectionId, String)>,
    ) {
        let TaskOutcome {
            section_id,
            action,
            result,
            regressions,
            ..
        } = outcome;
        let iteration = state.iteration();

        match result {
            Ok(patched) => {
                let before = snapshot
                    .section(&section_id)
                    .map(|s| s.body.clone())
                    .unwrap_or_default();
                // Locks revert to the text their scores were measured on
                let (scores, baseline) = if patched.scores.is_empty() {
                    (fallback_scores(section_scores, &section_id), before.as_str())
                } else {
                    (patched.scores, patched.text.as_str())
                };
                self.verifier
                    .lock_section(&mut state.quality_locks, &section_id, &scores, baseline);
                state.content.set_body(&section_id, patched.text);
                if action == FixAction::RegenerateSection {
                    regenerated.push((section_id.clone(), before));
                }

                self.events.publish(RefinementEvent::VerificationResult {
                    session_id: state.session_id.clone(),
                    iteration,
                    section_id: section_id.clone(),
                    passed: true,
                    failure: None,
                    timestamp: Utc::now(),
                });
                self.events.publish(RefinementEvent::PatchApplied {
                    session_id: state.session_id.clone(),
                    iteration,
                    section_id: section_id.clone(),
                    action,
                    timestamp: Utc::now(),
                });
                info!(section_id = %section_id, action = %action, "Patch applied");
                report.applied.push(section_id);
            }
            Err(failure) => {
                let tolerance = self.verifier.config().lock_tolerance;
                for record in &regressions {
                    warn!(
                        section_id = %record.section_id,
                        criterion = %record.criterion,
                        locked = record.locked_score,
                        observed = record.observed_score,
                        "Quality lock regression, patch discarded"
                    );
                    state.carried_issues.push(requeue_issue(record, tolerance));
                }
                state.regressions.extend(regressions);

                self.events.publish(RefinementEvent::VerificationResult {
                    session_id: state.session_id.clone(),
                    iteration,
                    section_id: section_id.clone(),
                    passed: false,
                    failure: Some(failure.clone()),
                    timestamp: Utc::now(),
                });
                warn!(section_id = %section_id, failure = %failure, "Task failed, section kept as before");
                report.failed.push((section_id, failure));
            }
        }
    }

    async fn run_task(
        &self,
        task: &SectionRefinementTask,
        snapshot: &Document,
        locks: &QualityLockRegistry,
        rubric: &Rubric,
        session_id: &str,
        iteration: u32,
    ) -> TaskOutcome {
        let _permit = self.limiter.acquire().await.ok();
        self.events.publish(RefinementEvent::TaskStarted {
            session_id: session_id.to_string(),
            iteration,
            section_id: task.section_id.clone(),
            action: task.action,
            timestamp: Utc::now(),
        });

        let mut tokens_used = 0;
        let mut regressions = Vec::new();
        let result = self
            .patch_and_verify(
                task,
                snapshot,
                locks,
                rubric,
                iteration,
                &mut tokens_used,
                &mut regressions,
            )
            .await;

        TaskOutcome {
            section_id: task.section_id.clone(),
            action: task.action,
            tokens_used,
            result,
            regressions,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn patch_and_verify(
        &self,
        task: &SectionRefinementTask,
        snapshot: &Document,
        locks: &QualityLockRegistry,
        rubric: &Rubric,
        iteration: u32,
        tokens_used: &mut u64,
        regressions: &mut Vec<RegressionRecord>,
    ) -> Result<PatchedSection, TaskFailure> {
        let window = snapshot
            .index_of(&task.section_id)
            .and_then(|index| {
                ContextWindow::around(snapshot, index, self.config.context_excerpt_chars)
            })
            .ok_or(TaskFailure::MissingSection)?;
        let before = window.target.body.clone();

        let generated = match task.action {
            FixAction::SurgicalEdit => {
                let patcher = self.patcher.as_ref();
                let window = &window;
                self.retry
                    .call("patcher", move || async move {
                        patcher.apply_fix(task, window).await
                    })
                    .await
            }
            FixAction::RegenerateSection => {
                let spec = SectionSpec {
                    section_id: task.section_id.clone(),
                    title: window.target.title.clone(),
                    instructions: task.synthesized_instructions.clone(),
                    objectives: rubric.objectives.clone(),
                    audience: rubric.audience.clone(),
                };
                let regenerator = self.regenerator.as_ref();
                let (spec, window) = (&spec, &window);
                self.retry
                    .call("regenerator", move || async move {
                        regenerator.regenerate_section(spec, window).await
                    })
                    .await
            }
        }
        .map_err(|e| TaskFailure::CallFailed {
            error: e.to_string(),
        })?;
        *tokens_used += generated.tokens_used;

        let reasons = self
            .verifier
            .check_section(&before, &generated.text, task.action);
        if !reasons.is_empty() {
            return Err(TaskFailure::HeuristicRejected { reasons });
        }

        let Some(issue) = task.primary_issue() else {
            return Err(TaskFailure::NotAddressed {
                rationale: "task has no source issue".to_string(),
            });
        };
        let verification = self
            .verifier
            .delta_check(
                self.fix_verifier.as_ref(),
                &self.retry,
                issue,
                &before,
                &generated.text,
            )
            .await
            .map_err(|e| TaskFailure::CallFailed {
                error: e.to_string(),
            })?;
        *tokens_used += verification.tokens_used;
        if !verification.addressed {
            return Err(TaskFailure::NotAddressed {
                rationale: verification.rationale,
            });
        }

        let found = regressions_for(
            locks,
            iteration,
            &task.section_id,
            &verification.criterion_scores,
        );
        if !found.is_empty() {
            let criteria = found.iter().map(|r| r.criterion.to_string()).collect();
            *regressions = found;
            return Err(TaskFailure::RegressionDetected { criteria });
        }

        Ok(PatchedSection {
            text: generated.text,
            scores: verification.criterion_scores,
        })
    }

    /// Re-check the seams next to regenerated sections.
    ///
    /// A failed or unanswered check carries a minor clarity issue into the
    /// next iteration.
    async fn check_transitions(
        &self,
        plan: &RefinementPlan,
        state: &mut IterationState,
        regenerated: &[(SectionId, String)],
        report: &mut ExecutionReport,
    ) {
        for neighbour_id in &plan.transition_checks {
            if state.budget_exhausted() {
                warn!("Budget exhausted, skipping remaining transition checks");
                break;
            }
            if state.is_locked(neighbour_id) {
                continue;
            }
            let Some(neighbour_index) = state.content.index_of(neighbour_id) else {
                continue;
            };
            let adjacent = regenerated.iter().find_map(|(id, old)| {
                let index = state.content.index_of(id)?;
                (index.abs_diff(neighbour_index) == 1).then_some((index, id, old))
            });
            let Some((regen_index, regen_id, old_body)) = adjacent else {
                continue;
            };
            let (Some(neighbour), Some(regen)) = (
                state.content.sections.get(neighbour_index),
                state.content.sections.get(regen_index),
            ) else {
                continue;
            };

            let seam = |regen_body: &str| {
                if neighbour_index < regen_index {
                    format!("{}\n\n{}", neighbour.body, regen_body)
                } else {
                    format!("{}\n\n{}", regen_body, neighbour.body)
                }
            };
            let before = seam(old_body);
            let after = seam(&regen.body);
            let issue = TargetedIssue::new(
                Criterion::ClarityReadability,
                Severity::Minor,
                Some(neighbour_id.as_str()),
                format!(
                    "Smooth the transition between '{}' and the rewritten '{}'",
                    neighbour.title, regen.title
                ),
            )
            .from_rater(TRANSITION_RATER);

            let checked = self
                .verifier
                .delta_check(
                    self.fix_verifier.as_ref(),
                    &self.retry,
                    &issue,
                    &before,
                    &after,
                )
                .await;
            match checked {
                Ok(verification) => {
                    state.add_tokens(verification.tokens_used);
                    report.tokens_used += verification.tokens_used;
                    if !verification.addressed {
                        info!(
                            section_id = %neighbour_id,
                            regenerated = %regen_id,
                            "Transition check failed, carrying issue"
                        );
                        report.transition_failures.push(neighbour_id.clone());
                        state.carried_issues.push(issue);
                    }
                }
                Err(error) => {
                    warn!(
                        section_id = %neighbour_id,
                        regenerated = %regen_id,
                        error = %error,
                        "Transition check call failed, carrying issue"
                    );
                    report.transition_failures.push(neighbour_id.clone());
                    state.carried_issues.push(issue);
                }
            }
        }
    }
}
