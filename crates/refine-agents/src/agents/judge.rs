//! Rubric judge over a text model.

use async_trait::async_trait;
use tracing::{debug, warn};

use refinement::{Document, Judge, JudgeVerdict, ModelCallError, Rubric};

use super::{estimate_tokens, OaiAgent, TextModel};
use crate::parse::parse_verdict;
use crate::prompts;

/// Judge that asks a model for a JSON verdict and validates it
pub struct ModelJudge<M = OaiAgent> {
    model: M,
    model_id: String,
    historical_accuracy: f64,
}

impl<M: TextModel> ModelJudge<M> {
    pub fn new(model: M, model_id: impl Into<String>, historical_accuracy: f64) -> Self {
        Self {
            model,
            model_id: model_id.into(),
            historical_accuracy,
        }
    }
}

#[async_trait]
impl<M: TextModel> Judge for ModelJudge<M> {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn historical_accuracy(&self) -> f64 {
        self.historical_accuracy
    }

    async fn evaluate(
        &self,
        content: &Document,
        rubric: &Rubric,
    ) -> Result<JudgeVerdict, ModelCallError> {
        let prompt = prompts::judge_prompt(content, rubric);
        let reply = self.model.complete(&prompt).await?;
        let tokens = estimate_tokens(&prompt, &reply);

        match parse_verdict(&reply, &self.model_id, tokens) {
            Ok(verdict) => {
                debug!(
                    model_id = %self.model_id,
                    score = verdict.overall_score,
                    issues = verdict.issues.len(),
                    tokens,
                    "Verdict parsed"
                );
                Ok(verdict)
            }
            Err(e) => {
                warn!(model_id = %self.model_id, error = %e, "Rejected judge reply");
                Err(e)
            }
        }
    }
}
