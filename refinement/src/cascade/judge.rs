//! Single-judge evaluation and the shared judge-call wrapper.

use tracing::{debug, info};

use crate::collaborators::{Judge, ModelCallError, SharedJudge};
use crate::config::CascadeConfig;
use crate::resilience::RetryPolicy;
use crate::state::{Confidence, Document, JudgeVerdict, Rubric};

/// Call a judge under the retry policy, rejecting out-of-range verdicts.
///
/// Issues without provenance are tagged with the judge's model id.
pub async fn call_judge(
    judge: &dyn Judge,
    retry: &RetryPolicy,
    content: &Document,
    rubric: &Rubric,
) -> Result<JudgeVerdict, ModelCallError> {
    let model_id = judge.model_id().to_string();
    let mut verdict = retry
        .call(&model_id, move || async move {
            let verdict = judge.evaluate(content, rubric).await?;
            verdict
                .validate()
                .map_err(ModelCallError::MalformedResponse)?;
            Ok(verdict)
        })
        .await?;

    if verdict.model_id.is_empty() {
        verdict.model_id = model_id;
    }
    for issue in verdict.issues.iter_mut() {
        if issue.raised_by.is_empty() {
            issue.raised_by = verdict.model_id.clone();
        }
    }
    debug!(
        model_id = %verdict.model_id,
        score = verdict.overall_score,
        issues = verdict.issues.len(),
        "Judge verdict received"
    );
    Ok(verdict)
}

/// First model-backed stage of the cascade
pub struct SingleJudgeEvaluator {
    judge: SharedJudge,
    retry: RetryPolicy,
    config: CascadeConfig,
}

impl SingleJudgeEvaluator {
    pub fn new(judge: SharedJudge, retry: RetryPolicy, config: CascadeConfig) -> Self {
        Self {
            judge,
            retry,
            config,
        }
    }

    pub fn model_id(&self) -> &str {
        self.judge.model_id()
    }

    pub async fn evaluate(
        &self,
        content: &Document,
        rubric: &Rubric,
    ) -> Result<JudgeVerdict, ModelCallError> {
        call_judge(self.judge.as_ref(), &self.retry, content, rubric).await
    }

    /// A verdict ends the cascade when the judge is confident and the score
    /// is clearly on one side of the accept/reject band.
    pub fn is_decisive(&self, verdict: &JudgeVerdict) -> bool {
        let decisive = verdict.confidence == Confidence::High
            && (verdict.overall_score >= self.config.accept_threshold
                || verdict.overall_score < self.config.reject_threshold);
        if decisive {
            info!(
                model_id = %verdict.model_id,
                score = verdict.overall_score,
                "Single judge is decisive"
            );
        }
        decisive
    }
}
