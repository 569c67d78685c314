//! Event stream mirroring for the CLI.
//!
//! Subscribes to a session's event bus and:
//! - mirrors every event into `tracing` with structured fields
//! - optionally appends each event as one JSON line to an events file
//!
//! The logger stops after `refinement_complete` or when the bus closes.

use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use refinement::events::FilteredReceiver;
use refinement::{EventFilter, RefinementEvent, SharedEventBus};

/// What the logger saw over one session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSummary {
    pub events: usize,
    pub patches_applied: usize,
    pub verification_failures: usize,
    pub completed: bool,
}

/// Subscribe now and drain events on a background task.
///
/// Subscribing happens before the task is spawned so no event published
/// after this call is missed.
pub fn spawn_event_logger(
    bus: &SharedEventBus,
    jsonl_path: Option<PathBuf>,
) -> JoinHandle<EventSummary> {
    let receiver = bus.subscribe_filtered(EventFilter::new());
    tokio::spawn(drain(receiver, jsonl_path))
}

async fn drain(mut receiver: FilteredReceiver, jsonl_path: Option<PathBuf>) -> EventSummary {
    let mut summary = EventSummary::default();
    loop {
        match receiver.recv().await {
            Ok(event) => {
                summary.events += 1;
                match &event {
                    RefinementEvent::PatchApplied { .. } => summary.patches_applied += 1,
                    RefinementEvent::VerificationResult { passed: false, .. } => {
                        summary.verification_failures += 1
                    }
                    _ => {}
                }
                log_event(&event);
                if let Some(path) = &jsonl_path {
                    if let Err(e) = append_jsonl(path, &event) {
                        warn!(path = %path.display(), error = %e, "Failed to append event");
                    }
                }
                if matches!(event, RefinementEvent::RefinementComplete { .. }) {
                    summary.completed = true;
                    break;
                }
            }
            Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(_)) => continue,
        }
    }
    summary
}

/// Mirror one event into the log
pub fn log_event(event: &RefinementEvent) {
    match event {
        RefinementEvent::RefinementStart {
            session_id,
            section_count,
            ..
        } => info!(%session_id, sections = section_count, "[event] refinement_start"),
        RefinementEvent::BatchStarted {
            iteration,
            batch_index,
            section_ids,
            ..
        } => info!(
            iteration,
            batch = batch_index,
            sections = %section_ids.join(","),
            "[event] batch_started"
        ),
        RefinementEvent::TaskStarted {
            iteration,
            section_id,
            action,
            ..
        } => debug!(iteration, %section_id, %action, "[event] task_started"),
        RefinementEvent::PatchApplied {
            iteration,
            section_id,
            action,
            ..
        } => info!(iteration, %section_id, %action, "[event] patch_applied"),
        RefinementEvent::VerificationResult {
            iteration,
            section_id,
            passed,
            failure,
            ..
        } => match failure {
            Some(failure) => warn!(iteration, %section_id, %failure, "[event] verification_result"),
            None => debug!(iteration, %section_id, passed, "[event] verification_result"),
        },
        RefinementEvent::IterationComplete {
            iteration,
            score,
            score_delta,
            stage,
            ..
        } => info!(
            iteration,
            score,
            score_delta = score_delta.unwrap_or(0.0),
            %stage,
            "[event] iteration_complete"
        ),
        RefinementEvent::ConvergenceDetected {
            iteration,
            score_delta,
            ..
        } => info!(iteration, score_delta, "[event] convergence_detected"),
        RefinementEvent::BestEffortSelected {
            iteration,
            selected_iteration,
            score,
            ..
        } => info!(
            iteration,
            selected_iteration, score, "[event] best_effort_selected"
        ),
        RefinementEvent::EscalationTriggered {
            iteration, reason, ..
        } => warn!(iteration, %reason, "[event] escalation_triggered"),
        RefinementEvent::RefinementComplete {
            iteration,
            status,
            final_score,
            ..
        } => info!(iteration, %status, final_score, "[event] refinement_complete"),
    }
}

fn append_jsonl(path: &Path, event: &RefinementEvent) -> std::io::Result<()> {
    let line = serde_json::to_string(event).map_err(std::io::Error::other)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", line)
}
