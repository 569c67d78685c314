//! Cascade Controller: cheapest sufficient evaluation
//!
//! ```text
//! HeuristicFilter ──hard fail──▶ stage=heuristic, REGENERATE, savings 1.0
//!        │ pass
//!        ▼
//! SingleJudge ──high confidence & clear score──▶ stage=single_judge, savings 0.67
//!        │ ambiguous / judge failed
//!        ▼
//! ConsensusVoter ──quorum──▶ stage=clev_voting, savings 0.0
//!        │ quorum lost
//!        ▼
//! surviving verdict, confidence=low (degraded)
//! ```

use tracing::{info, warn};

use super::judge::SingleJudgeEvaluator;
use super::voting::{ConsensusVoter, VoteRound};
use super::CascadeError;
use crate::collaborators::JudgePanel;
use crate::config::CascadeConfig;
use crate::heuristics::HeuristicFilter;
use crate::resilience::RetryPolicy;
use crate::state::{
    CascadeResult, CascadeStage, Confidence, ConsensusMethod, Document, HeuristicResult,
    JudgeVerdict, Recommendation, Rubric,
};

/// Savings when the single judge settles the evaluation (one call out of three)
pub const SINGLE_JUDGE_SAVINGS: f64 = 2.0 / 3.0;

/// Orchestrates heuristic, single-judge and voting stages
pub struct CascadeController {
    filter: HeuristicFilter,
    single: SingleJudgeEvaluator,
    voter: ConsensusVoter,
    config: CascadeConfig,
}

impl CascadeController {
    pub fn new(
        filter: HeuristicFilter,
        panel: JudgePanel,
        retry: RetryPolicy,
        config: CascadeConfig,
    ) -> Self {
        Self {
            filter,
            single: SingleJudgeEvaluator::new(panel.primary, retry, config),
            voter: ConsensusVoter::new(panel.voters, panel.tiebreaker, retry, config),
            config,
        }
    }

    pub fn heuristic_filter(&self) -> &HeuristicFilter {
        &self.filter
    }

    /// Evaluate the content. Fails only when no judge responded at all.
    pub async fn evaluate(
        &self,
        content: &Document,
        rubric: &Rubric,
    ) -> Result<CascadeResult, CascadeError> {
        let heuristic = self.filter.evaluate(content, rubric);
        if !heuristic.passed {
            let result = self.heuristic_result(heuristic);
            info!(
                stage = %result.stage,
                score = result.final_score,
                reason = %result.stage_reason,
                "Cascade stopped at heuristic stage"
            );
            return Ok(result);
        }

        let mut tokens_used = 0;
        let primary = match self.single.evaluate(content, rubric).await {
            Ok(verdict) => {
                tokens_used += verdict.tokens_used;
                if self.single.is_decisive(&verdict) {
                    return Ok(self.single_judge_result(heuristic, verdict));
                }
                Some(verdict)
            }
            Err(error) => {
                warn!(
                    model_id = self.single.model_id(),
                    error = %error,
                    "Primary judge failed, escalating to voting"
                );
                None
            }
        };

        let round = self.voter.vote(content, rubric).await;
        tokens_used += round.tokens_used();

        if round.responded() >= self.config.quorum {
            return Ok(self.voting_result(heuristic, round, tokens_used));
        }

        // Quorum lost: fall back to the single-judge verdict, else any survivor
        let responded = round.responded();
        let failures: Vec<String> = round
            .failures
            .iter()
            .map(|(model, error)| format!("{}: {}", model, error))
            .collect();
        let fallback = primary.or_else(|| round.verdicts.into_iter().next().map(|v| v.verdict));
        let Some(verdict) = fallback else {
            warn!(failures = ?failures, "No judge responded");
            return Err(CascadeError::NoJudgeResponse { failures });
        };
        warn!(
            responded,
            quorum = self.config.quorum,
            model_id = %verdict.model_id,
            "Voting quorum lost, degrading to single verdict"
        );
        Ok(self.degraded_result(heuristic, verdict, responded, tokens_used))
    }

    fn recommend(&self, score: f64) -> Recommendation {
        Recommendation::for_score(
            score,
            self.config.accept_threshold,
            self.config.reject_threshold,
        )
    }

    fn heuristic_result(&self, heuristic: HeuristicResult) -> CascadeResult {
        // Stays below the reject threshold, scaled by how many hard checks passed
        let final_score = self.config.reject_threshold * heuristic.metrics.structural_score;
        CascadeResult {
            stage: CascadeStage::Heuristic,
            stage_reason: format!(
                "hard heuristic failure: {}",
                heuristic.failure_reasons.join("; ")
            ),
            verdicts: Vec::new(),
            consensus_method: None,
            final_score,
            final_recommendation: Recommendation::Regenerate,
            confidence: Confidence::High,
            per_criterion_scores: Default::default(),
            section_scores: Default::default(),
            issues: heuristic.issues.clone(),
            tokens_used: 0,
            cost_savings_ratio: 1.0,
            degraded: false,
            heuristic,
        }
    }

    fn single_judge_result(
        &self,
        heuristic: HeuristicResult,
        verdict: JudgeVerdict,
    ) -> CascadeResult {
        let mut issues = heuristic.issues.clone();
        issues.extend(verdict.issues.iter().cloned());
        CascadeResult {
            stage: CascadeStage::SingleJudge,
            stage_reason: format!(
                "single judge {} decisive at {:.2} with high confidence",
                verdict.model_id, verdict.overall_score
            ),
            consensus_method: None,
            final_score: verdict.overall_score,
            final_recommendation: self.recommend(verdict.overall_score),
            confidence: verdict.confidence,
            per_criterion_scores: verdict.per_criterion_scores.clone(),
            section_scores: verdict.section_scores.clone(),
            issues,
            tokens_used: verdict.tokens_used,
            cost_savings_ratio: SINGLE_JUDGE_SAVINGS,
            degraded: false,
            verdicts: vec![verdict],
            heuristic,
        }
    }

    fn voting_result(
        &self,
        heuristic: HeuristicResult,
        round: VoteRound,
        tokens_used: u64,
    ) -> CascadeResult {
        let method = round.consensus_method();
        let final_score = round.score().unwrap_or(0.0);
        let confidence = match method {
            ConsensusMethod::Unanimous => Confidence::High,
            ConsensusMethod::Majority | ConsensusMethod::TieBreaker => Confidence::Medium,
        };
        let mut issues = heuristic.issues.clone();
        for v in &round.verdicts {
            issues.extend(v.verdict.issues.iter().cloned());
        }
        let per_criterion_scores = round.criterion_scores();
        let section_scores = round.section_scores();
        let stage_reason = format!(
            "{:?} consensus of {} judges{}",
            method,
            round.responded(),
            if round.tiebreaker_invoked {
                " after tiebreaker"
            } else {
                ""
            }
        );

        info!(
            score = final_score,
            method = ?method,
            judges = round.responded(),
            "Cascade settled by voting"
        );

        CascadeResult {
            stage: CascadeStage::ClevVoting,
            stage_reason,
            verdicts: round.verdicts.into_iter().map(|v| v.verdict).collect(),
            consensus_method: Some(method),
            final_score,
            final_recommendation: self.recommend(final_score),
            confidence,
            per_criterion_scores,
            section_scores,
            issues,
            tokens_used,
            cost_savings_ratio: 0.0,
            degraded: false,
            heuristic,
        }
    }

    fn degraded_result(
        &self,
        heuristic: HeuristicResult,
        verdict: JudgeVerdict,
        responded: usize,
        tokens_used: u64,
    ) -> CascadeResult {
        let verdict = verdict.with_low_confidence();
        let mut issues = heuristic.issues.clone();
        issues.extend(verdict.issues.iter().cloned());
        CascadeResult {
            stage: CascadeStage::ClevVoting,
            stage_reason: format!(
                "quorum lost ({} of {} required judges responded), degraded to verdict of {}",
                responded, self.config.quorum, verdict.model_id
            ),
            consensus_method: None,
            final_score: verdict.overall_score,
            final_recommendation: self.recommend(verdict.overall_score),
            confidence: Confidence::Low,
            per_criterion_scores: verdict.per_criterion_scores.clone(),
            section_scores: verdict.section_scores.clone(),
            issues,
            tokens_used,
            cost_savings_ratio: 0.0,
            degraded: true,
            verdicts: vec![verdict],
            heuristic,
        }
    }
}
