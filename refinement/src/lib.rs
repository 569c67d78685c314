//! Lesson Refinement Library
//!
//! Evaluates long-form lesson content as cheaply as confidence allows and
//! repairs it section by section instead of regenerating the whole document.
//!
//! # Pipeline
//!
//! ```text
//! Document ──▶ Cascade (heuristics → single judge → weighted voting)
//!                 │
//!                 ▼
//!              Arbiter (agreement gate, conflict resolution) ──▶ Router
//!                 │
//!                 ▼
//!              Batch executor (patch / regenerate, bounded concurrency)
//!                 │
//!                 ▼
//!              Verifier + Quality Lock ──▶ next iteration boundary
//! ```
//!
//! Model access goes through the capability traits in [`collaborators`];
//! this crate has no vendor dependency. Sessions publish a fire-and-forget
//! event stream on an [`events::EventBus`].
//!
//! # Usage
//!
//! ```ignore
//! let config = RefinementConfig::load("refine.toml")?;
//! let events = EventBus::new().shared();
//! let controller = IterationController::new(&config, collaborators, events)?;
//! let outcome = controller.run(document, &spec).await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod arbiter;
pub mod cascade;
pub mod collaborators;
pub mod config;
pub mod events;
pub mod executor;
pub mod heuristics;
pub mod iteration;
pub mod resilience;
pub mod router;
pub mod state;
pub mod verifier;

// Re-export key session types
pub use iteration::{
    BestEffortSelection, IterationController, QualityStatus, RefinementError, RefinementOutcome,
    StopReason,
};

// Re-export collaborator contracts
pub use collaborators::{
    Collaborators, FixVerifier, Judge, JudgePanel, ModelCallError, Patcher, SectionRegenerator,
    SharedJudge,
};

// Re-export configuration
pub use config::{ConfigError, OperationMode, RefinementConfig, SessionLimits};

// Re-export key event types
pub use events::{EventBus, EventFilter, RefinementEvent, SharedEventBus, TaskFailure};

// Re-export evaluation components
pub use arbiter::Arbiter;
pub use cascade::{CascadeController, CascadeError};
pub use executor::{BatchExecutor, ExecutionReport};
pub use heuristics::HeuristicFilter;
pub use router::Router;
pub use verifier::Verifier;

// Re-export the data model
pub use state::{
    CascadeResult, CascadeStage, Confidence, ContentSpec, ContextWindow, Criterion, Document,
    FailureCategory, FixAction, FixVerification, GeneratedText, JudgeVerdict, Recommendation,
    RefinementPlan, Rubric, Section, SectionSpec, SessionStatus, Severity, TargetedIssue,
};
