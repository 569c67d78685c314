//! Section patcher and regenerator over a text model.

use async_trait::async_trait;
use tracing::debug;

use refinement::state::SectionRefinementTask;
use refinement::{
    ContextWindow, GeneratedText, ModelCallError, Patcher, SectionRegenerator, SectionSpec,
};

use super::{estimate_tokens, OaiAgent, TextModel};
use crate::parse::clean_section_text;
use crate::prompts;

pub struct ModelPatcher<M = OaiAgent> {
    model: M,
}

impl<M: TextModel> ModelPatcher<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

#[async_trait]
impl<M: TextModel> Patcher for ModelPatcher<M> {
    async fn apply_fix(
        &self,
        task: &SectionRefinementTask,
        context: &ContextWindow,
    ) -> Result<GeneratedText, ModelCallError> {
        let prompt = prompts::patch_prompt(task, context);
        let reply = self.model.complete(&prompt).await?;
        let tokens_used = estimate_tokens(&prompt, &reply);
        let text = clean_section_text(&reply)?;
        debug!(
            section_id = %task.section_id,
            before_chars = context.target.body.len(),
            after_chars = text.len(),
            "Patch generated"
        );
        Ok(GeneratedText { text, tokens_used })
    }
}

pub struct ModelRegenerator<M = OaiAgent> {
    model: M,
}

impl<M: TextModel> ModelRegenerator<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

#[async_trait]
impl<M: TextModel> SectionRegenerator for ModelRegenerator<M> {
    async fn regenerate_section(
        &self,
        spec: &SectionSpec,
        context: &ContextWindow,
    ) -> Result<GeneratedText, ModelCallError> {
        let prompt = prompts::regenerate_prompt(spec, context);
        let reply = self.model.complete(&prompt).await?;
        let tokens_used = estimate_tokens(&prompt, &reply);
        let text = clean_section_text(&reply)?;
        debug!(section_id = %spec.section_id, chars = text.len(), "Section regenerated");
        Ok(GeneratedText { text, tokens_used })
    }
}
