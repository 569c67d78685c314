//! Delta judge: cheap "was this addressed?" check.

use async_trait::async_trait;
use tracing::debug;

use refinement::{FixVerification, FixVerifier, ModelCallError, TargetedIssue};

use super::{estimate_tokens, OaiAgent, TextModel};
use crate::parse::parse_fix_verification;
use crate::prompts;

pub struct ModelFixVerifier<M = OaiAgent> {
    model: M,
}

impl<M: TextModel> ModelFixVerifier<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

#[async_trait]
impl<M: TextModel> FixVerifier for ModelFixVerifier<M> {
    async fn verify_fix(
        &self,
        issue: &TargetedIssue,
        before: &str,
        after: &str,
    ) -> Result<FixVerification, ModelCallError> {
        let prompt = prompts::verify_prompt(issue, before, after);
        let reply = self.model.complete(&prompt).await?;
        let verification = parse_fix_verification(&reply, estimate_tokens(&prompt, &reply))?;
        debug!(
            section_id = issue.section_id.as_deref().unwrap_or("-"),
            criterion = %issue.criterion,
            addressed = verification.addressed,
            "Fix checked"
        );
        Ok(verification)
    }
}
