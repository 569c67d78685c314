//! Model-backed collaborators.
//!
//! Each role wraps a [`TextModel`]: a rig agent in production, a canned
//! responder in tests. `build_collaborators` wires one agent per configured
//! endpoint into the [`Collaborators`] set a session consumes.

pub mod delta;
pub mod editor;
pub mod judge;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rig::agent::Agent;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use tracing::info;

use refinement::{Collaborators, JudgePanel, ModelCallError, SharedJudge};

use crate::config::{AgentsConfig, JudgeRole, ModelEndpoint};
use crate::prompts;

pub use delta::ModelFixVerifier;
pub use editor::{ModelPatcher, ModelRegenerator};
pub use judge::ModelJudge;

/// Type alias for agents built from OpenAI-compatible endpoints.
pub type OaiAgent = Agent<openai::completion::CompletionModel>;

/// One prompt in, one reply out
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ModelCallError>;
}

#[async_trait]
impl<T: TextModel + ?Sized> TextModel for Arc<T> {
    async fn complete(&self, prompt: &str) -> Result<String, ModelCallError> {
        (**self).complete(prompt).await
    }
}

#[async_trait]
impl TextModel for OaiAgent {
    async fn complete(&self, prompt: &str) -> Result<String, ModelCallError> {
        self.prompt(prompt)
            .await
            .map_err(|e| ModelCallError::Transport(e.to_string()))
    }
}

/// Rough token count for budget accounting: four characters per token.
///
/// OpenAI-compatible servers behind the agent do not surface usage through
/// the prompt API, so the estimate covers both directions.
pub fn estimate_tokens(prompt: &str, reply: &str) -> u64 {
    let chars = prompt.chars().count() + reply.chars().count();
    chars.div_ceil(4) as u64
}

fn build_agent(
    endpoint: &ModelEndpoint,
    name: &str,
    description: &str,
    preamble: &str,
    default_temperature: f64,
) -> Result<OaiAgent> {
    let client = endpoint.client()?;
    Ok(client
        .agent(&endpoint.model)
        .name(name)
        .description(description)
        .preamble(preamble)
        .temperature(endpoint.temperature.unwrap_or(default_temperature))
        .build())
}

fn build_judge(endpoint: &crate::config::JudgeEndpoint) -> Result<SharedJudge> {
    let agent = build_agent(
        &endpoint.endpoint,
        "judge",
        "Scores lesson content against the rubric",
        prompts::JUDGE_PREAMBLE,
        0.0,
    )?;
    Ok(Arc::new(ModelJudge::new(
        agent,
        endpoint.endpoint.model.clone(),
        endpoint.historical_accuracy,
    )))
}

/// Build every collaborator from endpoint configuration
pub fn build_collaborators(config: &AgentsConfig) -> Result<Collaborators> {
    config.validate()?;

    let mut primary = None;
    let mut voters = Vec::new();
    let mut tiebreaker = None;
    for endpoint in &config.judges {
        let judge = build_judge(endpoint)?;
        match endpoint.role {
            JudgeRole::Primary => primary = Some(judge),
            JudgeRole::Voter => voters.push(judge),
            JudgeRole::Tiebreaker => tiebreaker = Some(judge),
        }
    }
    let primary = primary.ok_or_else(|| anyhow::anyhow!("no primary judge configured"))?;

    let patcher = build_agent(
        &config.editor,
        "patcher",
        "Applies targeted edits to one lesson section",
        prompts::PATCHER_PREAMBLE,
        0.2,
    )?;
    let regenerator = build_agent(
        &config.editor,
        "regenerator",
        "Rewrites one lesson section from its specification",
        prompts::REGENERATOR_PREAMBLE,
        0.5,
    )?;
    let delta = build_agent(
        &config.verifier_model,
        "delta_judge",
        "Checks whether an edit resolved one issue",
        prompts::FIX_VERIFIER_PREAMBLE,
        0.0,
    )?;

    info!(
        primary = %primary.model_id(),
        voters = voters.len(),
        tiebreaker = tiebreaker.is_some(),
        editor = %config.editor.model,
        delta_judge = %config.verifier_model.model,
        prompt_version = prompts::PROMPT_VERSION,
        "Model collaborators ready"
    );

    Ok(Collaborators {
        judges: JudgePanel {
            primary,
            voters,
            tiebreaker,
        },
        patcher: Arc::new(ModelPatcher::new(patcher)),
        regenerator: Arc::new(ModelRegenerator::new(regenerator)),
        fix_verifier: Arc::new(ModelFixVerifier::new(delta)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens("", ""), 0);
        assert_eq!(estimate_tokens("abcd", "e"), 2);
        assert_eq!(estimate_tokens("abcd", "efgh"), 2);
    }

    #[tokio::test]
    async fn test_build_collaborators_wires_panel() {
        let config = AgentsConfig::from_toml_str(
            r#"
[[judges]]
role = "primary"
url = "http://localhost:9/v1"
model = "p"

[[judges]]
url = "http://localhost:9/v1"
model = "a"

[[judges]]
url = "http://localhost:9/v1"
model = "b"

[editor]
url = "http://localhost:9/v1"
model = "w"

[verifier_model]
url = "http://localhost:9/v1"
model = "d"
"#,
        )
        .unwrap();
        let collaborators = build_collaborators(&config).unwrap();
        assert_eq!(collaborators.judges.primary.model_id(), "p");
        assert_eq!(collaborators.judges.voters.len(), 2);
        assert_eq!(collaborators.judges.voters[1].model_id(), "b");
        assert!(collaborators.judges.tiebreaker.is_none());
    }
}
