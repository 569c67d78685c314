use chrono::Utc;
use tracing::{error, info, warn};

use super::best_effort::{select_best, selection_for, QualityStatus};
use super::{boundary_decision, RefinementError, RefinementOutcome, StopReason};
use crate::arbiter::Arbiter;
use crate::cascade::CascadeController;
use crate::collaborators::Collaborators;
use crate::config::{OperationMode, RefinementConfig, SessionLimits, ThresholdConfig};
use crate::events::{RefinementEvent, SharedEventBus};
use crate::executor::BatchExecutor;
use crate::heuristics::HeuristicFilter;
use crate::resilience::RetryPolicy;
use crate::state::{
    CascadeResult, ContentSpec, Document, IterationState, PlanStatus, Rubric, SessionStatus,
    TargetedIssue,
};
use crate::verifier::{enforce_boundary_locks, Verifier};

/// Drives one refinement session from first evaluation to a terminal state
pub struct IterationController {
    cascade: CascadeController,
    arbiter: Arbiter,
    executor: BatchExecutor,
    mode: OperationMode,
    limits: SessionLimits,
    thresholds: ThresholdConfig,
    lock_tolerance: f64,
    events: SharedEventBus,
}

impl IterationController {
    pub fn new(
        config: &RefinementConfig,
        collaborators: Collaborators,
        events: SharedEventBus,
    ) -> Result<Self, RefinementError> {
        config.validate()?;
        let retry = RetryPolicy::new(&config.retry);
        let cascade = CascadeController::new(
            HeuristicFilter::new(config.heuristics),
            collaborators.judges,
            retry,
            config.cascade,
        );
        let executor = BatchExecutor::new(
            collaborators.patcher,
            collaborators.regenerator,
            collaborators.fix_verifier,
            Verifier::new(config.heuristics, config.verifier),
            retry,
            config.execution,
            events.clone(),
        );
        Ok(Self {
            cascade,
            arbiter: Arbiter::new(config.arbiter),
            executor,
            mode: config.mode,
            limits: config.limits,
            thresholds: config.thresholds,
            lock_tolerance: config.verifier.lock_tolerance,
            events,
        })
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    /// Run a full session over `document`.
    ///
    /// Only a cascade pass in which no judge answered is an error; every other
    /// failure ends in one of the terminal statuses.
    pub async fn run(
        &self,
        document: Document,
        spec: &ContentSpec,
    ) -> Result<RefinementOutcome, RefinementError> {
        let thresholds = self.thresholds.for_mode(self.mode);
        let rubric = Rubric::from_spec(spec, thresholds.accept);
        let mut state = IterationState::new(document, self.mode, self.limits);

        info!(
            session_id = %state.session_id,
            mode = %self.mode,
            sections = state.content.sections.len(),
            max_iterations = self.limits.max_iterations,
            "Refinement session started"
        );
        self.events.publish(RefinementEvent::RefinementStart {
            session_id: state.session_id.clone(),
            iteration: state.iteration(),
            section_count: state.content.sections.len(),
            timestamp: Utc::now(),
        });

        loop {
            let iteration = state.iteration();
            let result = self
                .cascade
                .evaluate(&state.content, &rubric)
                .await
                .map_err(|source| {
                    error!(iteration, error = %source, "Cascade evaluation failed");
                    RefinementError::Evaluation { iteration, source }
                })?;

            state.record_evaluation(&result);
            let score_delta = state.last_improvement();
            enforce_boundary_locks(&mut state, &result.section_scores, self.lock_tolerance);
            info!(
                iteration,
                score = result.final_score,
                stage = %result.stage,
                issues = result.issues.len(),
                tokens = state.tokens_used,
                "Iteration evaluated"
            );
            self.events.publish(RefinementEvent::IterationComplete {
                session_id: state.session_id.clone(),
                iteration,
                score: result.final_score,
                score_delta,
                stage: result.stage,
                timestamp: Utc::now(),
            });

            if let Some(reason) = boundary_decision(
                &state,
                &result,
                thresholds,
                self.thresholds.convergence_epsilon,
            ) {
                return Ok(self.finish(state, reason, &result, Vec::new(), false));
            }

            let carried = std::mem::take(&mut state.carried_issues);
            let mut plan =
                self.arbiter
                    .plan(&result, &state.content, state.locked_sections(), &carried);

            if let PlanStatus::FullRegenerate { reason } = &plan.status {
                let reason = StopReason::FullRegenerate {
                    reason: reason.clone(),
                };
                return Ok(self.finish(state, reason, &result, carried, true));
            }
            if plan.tasks.is_empty() {
                return Ok(self.finish(
                    state,
                    StopReason::NoActionableIssues,
                    &result,
                    carried,
                    false,
                ));
            }

            for task in &plan.tasks {
                state.record_edit(&task.section_id);
            }
            let report = self
                .executor
                .execute(&mut plan, &mut state, &rubric, &result.section_scores)
                .await;

            if report.aborted || state.budget_exhausted() {
                let reason = StopReason::BudgetExhausted {
                    tokens_used: state.tokens_used,
                };
                return Ok(self.finish(state, reason, &result, carried, false));
            }
            state.advance_iteration();
        }
    }

    /// Resolve the terminal status and build the outcome record
    fn finish(
        &self,
        mut state: IterationState,
        reason: StopReason,
        last: &CascadeResult,
        pending: Vec<TargetedIssue>,
        full_regeneration_required: bool,
    ) -> RefinementOutcome {
        let status = reason.status(self.mode);
        state.status = status;
        let iteration = state.iteration();

        if let StopReason::Converged { score_delta } = reason {
            info!(iteration, score_delta, "Convergence detected");
            self.events.publish(RefinementEvent::ConvergenceDetected {
                session_id: state.session_id.clone(),
                iteration,
                score_delta,
                timestamp: Utc::now(),
            });
        }

        let best = if status == SessionStatus::BestEffort {
            select_best(&state.content_history).cloned()
        } else {
            None
        };

        let (final_score, content, unresolved_issues) = match &best {
            Some(snapshot) => (
                snapshot.score,
                snapshot.content.clone(),
                snapshot.issues.clone(),
            ),
            None => {
                let mut unresolved: Vec<TargetedIssue> = Vec::new();
                for issue in last
                    .issues
                    .iter()
                    .chain(pending.iter())
                    .chain(state.carried_issues.iter())
                {
                    if !unresolved.contains(issue) {
                        unresolved.push(issue.clone());
                    }
                }
                (last.final_score, state.content.clone(), unresolved)
            }
        };
        let best_effort = best.as_ref().map(selection_for);

        match status {
            SessionStatus::Escalated => {
                warn!(iteration, reason = %reason, "Escalating to human review");
                self.events.publish(RefinementEvent::EscalationTriggered {
                    session_id: state.session_id.clone(),
                    iteration,
                    reason: reason.to_string(),
                    timestamp: Utc::now(),
                });
            }
            SessionStatus::BestEffort => {
                if let Some(selection) = &best_effort {
                    info!(
                        iteration,
                        selected = selection.iteration,
                        score = selection.score,
                        quality = %selection.quality_status,
                        "Best-effort snapshot selected"
                    );
                    self.events.publish(RefinementEvent::BestEffortSelected {
                        session_id: state.session_id.clone(),
                        iteration,
                        selected_iteration: selection.iteration,
                        score: selection.score,
                        timestamp: Utc::now(),
                    });
                }
            }
            _ => {}
        }

        info!(
            session_id = %state.session_id,
            status = %status,
            reason = %reason,
            final_score,
            iterations = iteration,
            tokens = state.tokens_used,
            "Refinement session finished"
        );
        self.events.publish(RefinementEvent::RefinementComplete {
            session_id: state.session_id.clone(),
            iteration,
            status,
            final_score,
            timestamp: Utc::now(),
        });

        let locked_sections = state.locked_sections().clone();
        RefinementOutcome {
            session_id: state.session_id,
            status,
            stop_reason: reason,
            final_score,
            iterations_used: iteration,
            tokens_used: state.tokens_used,
            unresolved_issues,
            content,
            human_review_required: status == SessionStatus::Escalated,
            quality_status: QualityStatus::classify(final_score),
            best_effort,
            full_regeneration_required,
            locked_sections,
            regressions: state.regressions,
            score_history: state.score_history,
        }
    }
}
