//! Refinement configuration.
//!
//! Loaded from a TOML file with `REFINE_*` environment overrides. Every
//! field has a default so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid environment override {var}={value}")]
    InvalidEnv { var: String, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Operation mode selected by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    /// May escalate to a human reviewer
    #[default]
    SemiAuto,
    /// Never waits for a human; always resolves on its own
    FullAuto,
}

impl std::str::FromStr for OperationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "semi_auto" => Ok(Self::SemiAuto),
            "full_auto" => Ok(Self::FullAuto),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

impl std::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SemiAuto => write!(f, "semi_auto"),
            Self::FullAuto => write!(f, "full_auto"),
        }
    }
}

/// Hard session limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    /// Refinement rounds; the session evaluates at most one more time than this
    pub max_iterations: u32,
    pub token_budget: u64,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            token_budget: 200_000,
            timeout: Duration::from_secs(900),
        }
    }
}

/// Acceptance thresholds for one operation mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeThresholds {
    pub accept: f64,
    pub good_enough: f64,
}

/// Thresholds for both modes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub semi_auto: ModeThresholds,
    pub full_auto: ModeThresholds,
    /// Minimum score change between consecutive iterations that counts as progress
    pub convergence_epsilon: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            semi_auto: ModeThresholds {
                accept: 0.90,
                good_enough: 0.85,
            },
            full_auto: ModeThresholds {
                accept: 0.85,
                good_enough: 0.80,
            },
            convergence_epsilon: 0.02,
        }
    }
}

impl ThresholdConfig {
    pub fn for_mode(&self, mode: OperationMode) -> ModeThresholds {
        match mode {
            OperationMode::SemiAuto => self.semi_auto,
            OperationMode::FullAuto => self.full_auto,
        }
    }
}

/// Cascade controller settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub accept_threshold: f64,
    pub reject_threshold: f64,
    /// Score spread between two voters that triggers the tiebreaker
    pub disagreement_delta: f64,
    /// Minimum verdicts for a valid vote
    pub quorum: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.85,
            reject_threshold: 0.50,
            disagreement_delta: 0.15,
            quorum: 2,
        }
    }
}

/// Heuristic filter settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    pub min_word_count: usize,
    pub min_readability_grade: f64,
    pub max_readability_grade: f64,
    pub min_examples: usize,
    pub min_exercises: usize,
    /// Share of letters outside the dominant script tolerated before mixing is flagged
    pub max_foreign_script_ratio: f64,
    /// Allowed new/old length ratio for a surgical edit
    pub edit_length_ratio: (f64, f64),
    /// Allowed new/old length ratio for a regenerated section
    pub regenerate_length_ratio: (f64, f64),
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            min_word_count: 500,
            min_readability_grade: 5.0,
            max_readability_grade: 14.0,
            min_examples: 1,
            min_exercises: 1,
            max_foreign_script_ratio: 0.05,
            edit_length_ratio: (0.5, 2.0),
            regenerate_length_ratio: (0.25, 4.0),
        }
    }
}

/// Arbiter and router settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    pub high_agreement: f64,
    pub moderate_agreement: f64,
    /// Below this aggregate structural score the whole document is regenerated
    pub full_regenerate_structural_floor: f64,
    /// Above this share of critically-flagged sections the whole document is regenerated
    pub full_regenerate_critical_ratio: f64,
    /// Also auto-apply single-judge critical issues in the moderate tier
    pub moderate_keeps_critical: bool,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            high_agreement: 0.80,
            moderate_agreement: 0.67,
            full_regenerate_structural_floor: 0.6,
            full_regenerate_critical_ratio: 0.40,
            moderate_keeps_critical: false,
        }
    }
}

/// Batch execution settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum concurrent calls within one surgical batch
    pub concurrency: usize,
    /// Characters of each neighbour handed to patch calls
    pub context_excerpt_chars: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            context_excerpt_chars: 600,
        }
    }
}

/// Verifier and quality lock settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub lock_tolerance: f64,
    /// Criteria scoring at least this much are locked after a patch
    pub criterion_pass_threshold: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            lock_tolerance: 0.05,
            criterion_pass_threshold: 0.70,
        }
    }
}

/// Per-call retry settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(with = "duration_secs")]
    pub call_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 250,
            max_delay_ms: 4_000,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Top-level refinement configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    pub mode: OperationMode,
    pub limits: SessionLimits,
    pub thresholds: ThresholdConfig,
    pub cascade: CascadeConfig,
    pub heuristics: HeuristicConfig,
    pub arbiter: ArbiterConfig,
    pub execution: ExecutionConfig,
    pub verifier: VerifierConfig,
    pub retry: RetryConfig,
}

impl RefinementConfig {
    /// Parse TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(var: &str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    var: var.to_string(),
                    value,
                })
        }

        if let Some(value) = lookup("REFINE_MODE") {
            self.mode = parse("REFINE_MODE", value)?;
        }
        if let Some(value) = lookup("REFINE_MAX_ITERATIONS") {
            self.limits.max_iterations = parse("REFINE_MAX_ITERATIONS", value)?;
        }
        if let Some(value) = lookup("REFINE_TOKEN_BUDGET") {
            self.limits.token_budget = parse("REFINE_TOKEN_BUDGET", value)?;
        }
        if let Some(value) = lookup("REFINE_TIMEOUT_SECS") {
            let secs: u64 = parse("REFINE_TIMEOUT_SECS", value)?;
            self.limits.timeout = Duration::from_secs(secs);
        }
        if let Some(value) = lookup("REFINE_CONCURRENCY") {
            self.execution.concurrency = parse("REFINE_CONCURRENCY", value)?;
        }
        Ok(())
    }

    /// Reject configurations that would break session invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{} must be in [0, 1], got {}", name, v)))
            }
        };

        if self.limits.max_iterations == 0 {
            return Err(ConfigError::Invalid("max_iterations must be > 0".into()));
        }
        if self.execution.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be > 0".into()));
        }
        if self.cascade.quorum < 2 {
            return Err(ConfigError::Invalid("quorum must be at least 2".into()));
        }
        for (name, t) in [
            ("semi_auto", self.thresholds.semi_auto),
            ("full_auto", self.thresholds.full_auto),
        ] {
            unit(name, t.accept)?;
            unit(name, t.good_enough)?;
            if t.good_enough > t.accept {
                return Err(ConfigError::Invalid(format!(
                    "{}: good_enough ({}) above accept ({})",
                    name, t.good_enough, t.accept
                )));
            }
        }
        unit("cascade.accept_threshold", self.cascade.accept_threshold)?;
        unit("cascade.reject_threshold", self.cascade.reject_threshold)?;
        if self.cascade.reject_threshold > self.cascade.accept_threshold {
            return Err(ConfigError::Invalid(
                "reject_threshold above accept_threshold".into(),
            ));
        }
        unit("verifier.lock_tolerance", self.verifier.lock_tolerance)?;
        unit(
            "verifier.criterion_pass_threshold",
            self.verifier.criterion_pass_threshold,
        )?;
        if self.arbiter.moderate_agreement > self.arbiter.high_agreement {
            return Err(ConfigError::Invalid(
                "moderate_agreement above high_agreement".into(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
