//! Execution Batcher: parallel-safe, order-preserving batches
//!
//! ```text
//! surgical tasks at indices 0 1 3 4 6
//!   batch 1: [0]          1 is adjacent to 0
//!   batch 2: [1, 3]       4 is adjacent to 3
//!   batch 3: [4, 6]
//! regeneration tasks: one batch each, after all surgical batches
//! ```

use crate::state::{BatchKind, ExecutionBatch, FixAction, SectionRefinementTask};

/// Minimum index gap for two surgical edits to run in the same batch
pub const MIN_CONCURRENT_GAP: usize = 2;

/// Group tasks into batches. Surgical batches come first, then one
/// regeneration batch per section, all in section order.
pub fn build_batches(tasks: &[SectionRefinementTask]) -> Vec<ExecutionBatch> {
    let mut surgical: Vec<&SectionRefinementTask> = tasks
        .iter()
        .filter(|t| t.action == FixAction::SurgicalEdit)
        .collect();
    surgical.sort_by_key(|t| t.section_index);

    let mut regeneration: Vec<&SectionRefinementTask> = tasks
        .iter()
        .filter(|t| t.action == FixAction::RegenerateSection)
        .collect();
    regeneration.sort_by_key(|t| t.section_index);

    let mut batches = Vec::new();
    let mut current: Vec<&SectionRefinementTask> = Vec::new();
    for task in surgical {
        let adjacent = current
            .last()
            .is_some_and(|last| task.section_index - last.section_index < MIN_CONCURRENT_GAP);
        if adjacent {
            batches.push(surgical_batch(&current));
            current.clear();
        }
        current.push(task);
    }
    if !current.is_empty() {
        batches.push(surgical_batch(&current));
    }

    batches.extend(regeneration.into_iter().map(|task| ExecutionBatch {
        kind: BatchKind::Regeneration,
        section_ids: vec![task.section_id.clone()],
    }));
    batches
}

fn surgical_batch(tasks: &[&SectionRefinementTask]) -> ExecutionBatch {
    ExecutionBatch {
        kind: BatchKind::Surgical,
        section_ids: tasks.iter().map(|t| t.section_id.clone()).collect(),
    }
}
