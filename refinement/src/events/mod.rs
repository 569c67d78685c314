//! Streaming observability for refinement sessions
//!
//! Events are published fire-and-forget on a Tokio broadcast bus and
//! consumed by external monitors. Every event carries the session id and
//! iteration number; section-scoped events carry the section id and
//! boundary events carry the score delta.
//!
//! # Event Flow
//!
//! ```text
//! refinement_start
//!   └─ per iteration:
//!        batch_started → task_started → verification_result → patch_applied
//!        iteration_complete
//!   └─ convergence_detected | best_effort_selected | escalation_triggered
//! refinement_complete
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::{RefinementEvent, TaskFailure};
