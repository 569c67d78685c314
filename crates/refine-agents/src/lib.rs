//! Model-backed collaborators for lesson refinement.
//!
//! Implements the `refinement` capability traits over OpenAI-compatible
//! endpoints through `rig`, and carries what the `refine-agents` binary needs
//! around them.
//!
//! # Modules
//!
//! - [`config`]: endpoint tables (`[[judges]]`, `[editor]`, `[verifier_model]`)
//! - [`agents`]: judges, patcher, regenerator and delta judge
//! - [`prompts`]: preambles and prompt builders
//! - [`parse`]: reply extraction and schema validation
//! - [`telemetry`]: event stream mirroring into logs and JSONL

pub mod agents;
pub mod config;
pub mod parse;
pub mod prompts;
pub mod telemetry;

pub use agents::{
    build_collaborators, ModelFixVerifier, ModelJudge, ModelPatcher, ModelRegenerator, TextModel,
};
pub use config::{AgentsConfig, JudgeEndpoint, JudgeRole, ModelEndpoint};
pub use telemetry::{spawn_event_logger, EventSummary};
