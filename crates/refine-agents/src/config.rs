//! Model endpoint configuration.
//!
//! Endpoints live in the same TOML file as the session configuration:
//!
//! ```toml
//! [[judges]]
//! role = "primary"
//! url = "http://localhost:8080/v1"
//! model = "judge-large"
//!
//! [[judges]]
//! url = "http://localhost:8080/v1"
//! model = "judge-a"
//! historical_accuracy = 0.8
//!
//! [editor]
//! url = "http://localhost:8081/v1"
//! model = "writer"
//!
//! [verifier_model]
//! url = "http://localhost:8080/v1"
//! model = "judge-small"
//! ```
//!
//! Without a file, `REFINE_JUDGE_*`, `REFINE_EDITOR_*` and `REFINE_VERIFIER_*`
//! environment variables describe the endpoints instead.

use std::path::Path;

use anyhow::{bail, Context, Result};
use rig::providers::openai;
use serde::Deserialize;

const DEFAULT_URL: &str = "http://localhost:8080/v1";
const DEFAULT_API_KEY: &str = "not-needed";

/// Seat a judge occupies in the cascade
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeRole {
    Primary,
    #[default]
    Voter,
    Tiebreaker,
}

/// One OpenAI-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelEndpoint {
    pub url: String,
    pub model: String,
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl ModelEndpoint {
    /// Read `REFINE_{prefix}_URL`, `_MODEL` and `_API_KEY`
    fn from_env(prefix: &str, default_model: &str) -> Self {
        Self {
            url: std::env::var(format!("REFINE_{prefix}_URL"))
                .unwrap_or_else(|_| DEFAULT_URL.into()),
            model: std::env::var(format!("REFINE_{prefix}_MODEL"))
                .unwrap_or_else(|_| default_model.into()),
            api_key: std::env::var(format!("REFINE_{prefix}_API_KEY"))
                .unwrap_or_else(|_| DEFAULT_API_KEY.into()),
            temperature: None,
        }
    }

    /// Build a completions client for this endpoint
    pub fn client(&self) -> Result<openai::CompletionsClient> {
        openai::CompletionsClient::builder()
            .api_key(&self.api_key)
            .base_url(&self.url)
            .build()
            .with_context(|| format!("Failed to build client for {} ({})", self.model, self.url))
    }
}

/// Judge endpoint plus its cascade seat.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JudgeEndpoint {
    #[serde(default)]
    pub role: JudgeRole,
    #[serde(flatten)]
    pub endpoint: ModelEndpoint,
    /// Agreement with human graders on a logit-like scale; feeds voting weight
    #[serde(default)]
    pub historical_accuracy: f64,
}

/// All endpoints a session talks to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub judges: Vec<JudgeEndpoint>,
    /// Patcher and section regenerator
    pub editor: ModelEndpoint,
    /// Delta judge for fix verification
    pub verifier_model: ModelEndpoint,
}

impl AgentsConfig {
    /// Read the agent tables from a refinement TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid agent config in {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse agent tables")?;
        config.validate()?;
        Ok(config)
    }

    /// Endpoints from environment variables.
    ///
    /// `REFINE_JUDGE_MODELS` is a comma-separated list: the first model is the
    /// primary judge, the rest vote. All judges share `REFINE_JUDGE_URL` and
    /// `REFINE_JUDGE_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let shared = ModelEndpoint::from_env("JUDGE", "judge");
        let models = std::env::var("REFINE_JUDGE_MODELS")
            .unwrap_or_else(|_| "judge-primary,judge-a,judge-b".into());
        let judges = models
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .enumerate()
            .map(|(i, model)| JudgeEndpoint {
                role: if i == 0 {
                    JudgeRole::Primary
                } else {
                    JudgeRole::Voter
                },
                endpoint: ModelEndpoint {
                    model: model.to_string(),
                    ..shared.clone()
                },
                historical_accuracy: 0.0,
            })
            .collect();

        let config = Self {
            judges,
            editor: ModelEndpoint::from_env("EDITOR", "writer"),
            verifier_model: ModelEndpoint::from_env("VERIFIER", "judge-small"),
        };
        config.validate()?;
        Ok(config)
    }

    /// Exactly one primary, at least two voters, at most one tiebreaker
    pub fn validate(&self) -> Result<()> {
        let count = |role: JudgeRole| self.judges.iter().filter(|j| j.role == role).count();
        if count(JudgeRole::Primary) != 1 {
            bail!(
                "expected exactly one primary judge, found {}",
                count(JudgeRole::Primary)
            );
        }
        if count(JudgeRole::Voter) < 2 {
            bail!(
                "voting needs at least two voter judges, found {}",
                count(JudgeRole::Voter)
            );
        }
        if count(JudgeRole::Tiebreaker) > 1 {
            bail!("at most one tiebreaker judge is allowed");
        }
        Ok(())
    }

    pub fn judges_with_role(&self, role: JudgeRole) -> impl Iterator<Item = &JudgeEndpoint> {
        self.judges.iter().filter(move |j| j.role == role)
    }
}

fn default_api_key() -> String {
    DEFAULT_API_KEY.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
mode = "full_auto"

[limits]
max_iterations = 3

[[judges]]
role = "primary"
url = "http://judge:8080/v1"
model = "judge-large"

[[judges]]
url = "http://judge:8080/v1"
model = "judge-a"
historical_accuracy = 0.8

[[judges]]
url = "http://judge:8080/v1"
model = "judge-b"

[[judges]]
role = "tiebreaker"
url = "http://judge:8080/v1"
model = "judge-xl"
api_key = "secret"

[editor]
url = "http://writer:8081/v1"
model = "writer"
temperature = 0.4

[verifier_model]
url = "http://judge:8080/v1"
model = "judge-small"
"#;

    #[test]
    fn test_parse_agent_tables() {
        let config = AgentsConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.judges.len(), 4);
        assert_eq!(config.judges[0].role, JudgeRole::Primary);
        assert_eq!(config.judges[1].role, JudgeRole::Voter);
        assert!((config.judges[1].historical_accuracy - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.judges[0].endpoint.api_key, "not-needed");
        assert_eq!(config.judges[3].endpoint.api_key, "secret");
        assert_eq!(config.editor.temperature, Some(0.4));
        assert_eq!(config.verifier_model.model, "judge-small");
        assert_eq!(config.judges_with_role(JudgeRole::Voter).count(), 2);
    }

    #[test]
    fn test_session_tables_still_parse() {
        let session = refinement::RefinementConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(session.mode, refinement::OperationMode::FullAuto);
    }

    #[test]
    fn test_rejects_missing_primary() {
        let text = SAMPLE.replace("role = \"primary\"", "");
        let err = AgentsConfig::from_toml_str(&text).unwrap_err();
        assert!(format!("{err:#}").contains("primary"));
    }

    #[test]
    fn test_rejects_single_voter() {
        let text = r#"
[[judges]]
role = "primary"
url = "u"
model = "p"

[[judges]]
url = "u"
model = "v"

[editor]
url = "u"
model = "e"

[verifier_model]
url = "u"
model = "d"
"#;
        let err = AgentsConfig::from_toml_str(text).unwrap_err();
        assert!(format!("{err:#}").contains("two voter"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refine.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = AgentsConfig::load(&path).unwrap();
        assert_eq!(config.editor.url, "http://writer:8081/v1");
    }
}
