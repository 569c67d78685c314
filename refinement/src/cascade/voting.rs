//! CLEV voting: multi-judge consensus
//!
//! Voters are called concurrently; a failed voter is dropped from the vote
//! rather than blocking the others. The tiebreaker is only called when the
//! voters disagree.
//!
//! Aggregation is a generic weighted quorum over `(score, weight)` pairs,
//! so the panel size is not fixed. Each judge's weight is derived from its
//! historical accuracy: `w = 1 / (1 + e^(-accuracy))`.

use std::collections::BTreeMap;

use futures::future::join_all;
use tracing::{info, warn};

use super::judge::call_judge;
use crate::collaborators::{ModelCallError, SharedJudge};
use crate::config::CascadeConfig;
use crate::resilience::RetryPolicy;
use crate::state::{
    ConsensusMethod, CriterionScores, Document, JudgeVerdict, Rubric, SectionScores,
};

/// Voting weight for a judge with the given historical accuracy
pub fn accuracy_weight(historical_accuracy: f64) -> f64 {
    1.0 / (1.0 + (-historical_accuracy).exp())
}

/// Weighted mean of `(score, weight)` pairs. `None` when there is no weight.
pub fn weighted_quorum(votes: &[(f64, f64)]) -> Option<f64> {
    let total_weight: f64 = votes.iter().map(|(_, w)| w).sum();
    if votes.is_empty() || total_weight <= 0.0 {
        return None;
    }
    let weighted: f64 = votes.iter().map(|(s, w)| s * w).sum();
    Some((weighted / total_weight).clamp(0.0, 1.0))
}

/// A verdict together with its voting weight
#[derive(Debug, Clone)]
pub struct WeightedVerdict {
    pub verdict: JudgeVerdict,
    pub weight: f64,
}

/// Result of one voting round
#[derive(Debug, Clone, Default)]
pub struct VoteRound {
    /// Successful verdicts in panel order, tiebreaker last
    pub verdicts: Vec<WeightedVerdict>,
    /// Judges dropped from the vote
    pub failures: Vec<(String, ModelCallError)>,
    pub tiebreaker_invoked: bool,
    pub tiebreaker_counted: bool,
}

impl VoteRound {
    pub fn responded(&self) -> usize {
        self.verdicts.len()
    }

    pub fn tokens_used(&self) -> u64 {
        self.verdicts.iter().map(|v| v.verdict.tokens_used).sum()
    }

    /// Aggregate overall score
    pub fn score(&self) -> Option<f64> {
        let votes: Vec<(f64, f64)> = self
            .verdicts
            .iter()
            .map(|v| (v.verdict.overall_score, v.weight))
            .collect();
        weighted_quorum(&votes)
    }

    /// Weighted per-criterion scores; a criterion only counts the judges that scored it
    pub fn criterion_scores(&self) -> CriterionScores {
        let mut votes: BTreeMap<_, Vec<(f64, f64)>> = BTreeMap::new();
        for v in &self.verdicts {
            for (criterion, score) in &v.verdict.per_criterion_scores {
                votes.entry(*criterion).or_default().push((*score, v.weight));
            }
        }
        votes
            .into_iter()
            .filter_map(|(c, pairs)| weighted_quorum(&pairs).map(|s| (c, s)))
            .collect()
    }

    /// Weighted per-section, per-criterion scores
    pub fn section_scores(&self) -> SectionScores {
        let mut votes: BTreeMap<_, BTreeMap<_, Vec<(f64, f64)>>> = BTreeMap::new();
        for v in &self.verdicts {
            for (section, scores) in &v.verdict.section_scores {
                let section_votes = votes.entry(section.clone()).or_default();
                for (criterion, score) in scores {
                    section_votes
                        .entry(*criterion)
                        .or_default()
                        .push((*score, v.weight));
                }
            }
        }
        votes
            .into_iter()
            .map(|(section, criteria)| {
                let scores = criteria
                    .into_iter()
                    .filter_map(|(c, pairs)| weighted_quorum(&pairs).map(|s| (c, s)))
                    .collect();
                (section, scores)
            })
            .collect()
    }

    /// How the vote was decided
    pub fn consensus_method(&self) -> ConsensusMethod {
        if self.tiebreaker_counted {
            return ConsensusMethod::TieBreaker;
        }
        let mut recommendations = self.verdicts.iter().map(|v| v.verdict.recommendation);
        match recommendations.next() {
            Some(first) if recommendations.all(|r| r == first) => ConsensusMethod::Unanimous,
            _ => ConsensusMethod::Majority,
        }
    }
}

/// Multi-judge consensus voter
pub struct ConsensusVoter {
    voters: Vec<SharedJudge>,
    tiebreaker: Option<SharedJudge>,
    retry: RetryPolicy,
    config: CascadeConfig,
}

impl ConsensusVoter {
    pub fn new(
        voters: Vec<SharedJudge>,
        tiebreaker: Option<SharedJudge>,
        retry: RetryPolicy,
        config: CascadeConfig,
    ) -> Self {
        Self {
            voters,
            tiebreaker,
            retry,
            config,
        }
    }

    /// Voters disagree when scores spread beyond the delta or recommendations oppose
    pub fn disagree(&self, verdicts: &[WeightedVerdict]) -> bool {
        verdicts.iter().enumerate().any(|(i, a)| {
            verdicts[i + 1..].iter().any(|b| {
                (a.verdict.overall_score - b.verdict.overall_score).abs()
                    > self.config.disagreement_delta
                    || a.verdict.recommendation.opposes(&b.verdict.recommendation)
            })
        })
    }

    async fn ballot(
        &self,
        judge: &SharedJudge,
        content: &Document,
        rubric: &Rubric,
    ) -> Result<WeightedVerdict, (String, ModelCallError)> {
        call_judge(judge.as_ref(), &self.retry, content, rubric)
            .await
            .map(|verdict| WeightedVerdict {
                verdict,
                weight: accuracy_weight(judge.historical_accuracy()),
            })
            .map_err(|e| (judge.model_id().to_string(), e))
    }

    /// Run one voting round
    pub async fn vote(&self, content: &Document, rubric: &Rubric) -> VoteRound {
        let ballots = join_all(
            self.voters
                .iter()
                .map(|judge| self.ballot(judge, content, rubric)),
        )
        .await;

        let mut round = VoteRound::default();
        for ballot in ballots {
            match ballot {
                Ok(verdict) => round.verdicts.push(verdict),
                Err((model_id, error)) => {
                    warn!(model_id = %model_id, error = %error, "Judge dropped from vote");
                    round.failures.push((model_id, error));
                }
            }
        }

        if round.verdicts.len() >= 2 && self.disagree(&round.verdicts) {
            if let Some(tiebreaker) = &self.tiebreaker {
                info!(model_id = tiebreaker.model_id(), "Voters disagree, calling tiebreaker");
                round.tiebreaker_invoked = true;
                match self.ballot(tiebreaker, content, rubric).await {
                    Ok(verdict) => {
                        round.verdicts.push(verdict);
                        round.tiebreaker_counted = true;
                    }
                    Err((model_id, error)) => {
                        warn!(model_id = %model_id, error = %error, "Tiebreaker dropped from vote");
                        round.failures.push((model_id, error));
                    }
                }
            }
        }

        info!(
            responded = round.responded(),
            failed = round.failures.len(),
            method = ?round.consensus_method(),
            "Voting round finished"
        );
        round
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Confidence, Criterion, Recommendation};

    fn verdict(model: &str, score: f64, rec: Recommendation) -> WeightedVerdict {
        let mut per_criterion_scores = CriterionScores::new();
        per_criterion_scores.insert(Criterion::FactualAccuracy, score);
        WeightedVerdict {
            verdict: JudgeVerdict {
                model_id: model.to_string(),
                overall_score: score,
                per_criterion_scores,
                section_scores: SectionScores::new(),
                confidence: Confidence::Medium,
                issues: vec![],
                recommendation: rec,
                tokens_used: 5,
            },
            weight: accuracy_weight(0.0),
        }
    }

    fn voter() -> ConsensusVoter {
        ConsensusVoter::new(vec![], None, RetryPolicy::default(), CascadeConfig::default())
    }

    #[test]
    fn test_accuracy_weight_is_logistic() {
        assert!((accuracy_weight(0.0) - 0.5).abs() < 1e-9);
        assert!(accuracy_weight(2.0) > accuracy_weight(1.0));
        assert!(accuracy_weight(-5.0) > 0.0);
    }

    #[test]
    fn test_weighted_quorum() {
        assert_eq!(weighted_quorum(&[]), None);
        assert_eq!(weighted_quorum(&[(0.5, 0.0)]), None);
        let score = weighted_quorum(&[(0.6, 1.0), (0.9, 2.0)]).unwrap();
        assert!((score - 0.8).abs() < 1e-9);
        // Any number of voters
        let score = weighted_quorum(&[(0.2, 1.0), (0.4, 1.0), (0.6, 1.0), (0.8, 1.0)]).unwrap();
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_disagreement_detection() {
        let v = voter();
        // Delta 0.25 > 0.15
        assert!(v.disagree(&[
            verdict("a", 0.60, Recommendation::Refine),
            verdict("b", 0.85, Recommendation::Refine),
        ]));
        // Close scores but opposite recommendations
        assert!(v.disagree(&[
            verdict("a", 0.55, Recommendation::Regenerate),
            verdict("b", 0.60, Recommendation::Accept),
        ]));
        assert!(!v.disagree(&[
            verdict("a", 0.70, Recommendation::Refine),
            verdict("b", 0.78, Recommendation::Refine),
        ]));
    }

    #[test]
    fn test_consensus_method() {
        let mut round = VoteRound {
            verdicts: vec![
                verdict("a", 0.7, Recommendation::Refine),
                verdict("b", 0.75, Recommendation::Refine),
            ],
            ..Default::default()
        };
        assert_eq!(round.consensus_method(), ConsensusMethod::Unanimous);

        round.verdicts[1].verdict.recommendation = Recommendation::Accept;
        assert_eq!(round.consensus_method(), ConsensusMethod::Majority);

        round.tiebreaker_counted = true;
        assert_eq!(round.consensus_method(), ConsensusMethod::TieBreaker);
    }

    #[test]
    fn test_round_aggregates_criteria() {
        let round = VoteRound {
            verdicts: vec![
                verdict("a", 0.6, Recommendation::Refine),
                verdict("b", 0.8, Recommendation::Refine),
            ],
            ..Default::default()
        };
        let scores = round.criterion_scores();
        assert!((scores[&Criterion::FactualAccuracy] - 0.7).abs() < 1e-9);
        assert!((round.score().unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(round.tokens_used(), 10);
    }
}
