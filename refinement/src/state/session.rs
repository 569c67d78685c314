//! Session state: iteration history, oscillation locks and quality locks.
//!
//! `IterationState` is owned by the iteration controller for the whole
//! session and threaded through every call by reference. There is no
//! module-level session singleton.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::results::{CascadeResult, CascadeStage};
use super::types::{Criterion, CriterionScores, Document, SectionId, TargetedIssue};
use crate::config::{OperationMode, SessionLimits};

/// Edits after which a section is frozen for the rest of the session
pub const OSCILLATION_EDIT_LIMIT: u32 = 2;

/// Terminal and non-terminal session states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Running,
    Accepted,
    AcceptedWithWarning,
    Escalated,
    BestEffort,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Accepted => write!(f, "ACCEPTED"),
            Self::AcceptedWithWarning => write!(f, "ACCEPTED_WITH_WARNING"),
            Self::Escalated => write!(f, "ESCALATED"),
            Self::BestEffort => write!(f, "BEST_EFFORT"),
        }
    }
}

/// Content evaluated at one iteration boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSnapshot {
    pub iteration: u32,
    pub score: f64,
    pub stage: CascadeStage,
    pub content: Document,
    pub issues: Vec<TargetedIssue>,
}

/// Regression guard for one (section, criterion) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityLock {
    pub locked_score: f64,
    pub tolerance: f64,
}

impl QualityLock {
    /// Lowest score that is not a regression
    pub fn floor(&self) -> f64 {
        self.locked_score - self.tolerance
    }

    pub fn is_regression(&self, observed: f64) -> bool {
        observed < self.floor()
    }
}

/// One Quality Lock trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionRecord {
    pub iteration: u32,
    pub section_id: SectionId,
    pub criterion: Criterion,
    pub locked_score: f64,
    pub observed_score: f64,
}

/// All quality locks of a session plus the text each section had when locked
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityLockRegistry {
    locks: BTreeMap<SectionId, BTreeMap<Criterion, QualityLock>>,
    baselines: BTreeMap<SectionId, String>,
}

impl QualityLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, section_id: &str, criterion: Criterion) -> Option<QualityLock> {
        self.locks
            .get(section_id)
            .and_then(|m| m.get(&criterion))
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Text of the section at its last successful locked patch
    pub fn baseline(&self, section_id: &str) -> Option<&str> {
        self.baselines.get(section_id).map(String::as_str)
    }

    /// Criteria whose observed score fell below their lock floor
    pub fn find_regressions(
        &self,
        section_id: &str,
        observed: &CriterionScores,
    ) -> Vec<(Criterion, QualityLock, f64)> {
        let Some(section_locks) = self.locks.get(section_id) else {
            return Vec::new();
        };
        section_locks
            .iter()
            .filter_map(|(criterion, lock)| {
                observed
                    .get(criterion)
                    .filter(|score| lock.is_regression(**score))
                    .map(|score| (*criterion, *lock, *score))
            })
            .collect()
    }

    /// Lock every passing criterion of a freshly patched section.
    ///
    /// Existing locks are never lowered; a higher observed score raises the lock.
    pub fn lock_passing(
        &mut self,
        section_id: &str,
        scores: &CriterionScores,
        pass_threshold: f64,
        tolerance: f64,
        baseline_text: &str,
    ) {
        let section_locks = self.locks.entry(section_id.to_string()).or_default();
        for (criterion, score) in scores.iter().filter(|(_, s)| **s >= pass_threshold) {
            let lock = section_locks.entry(*criterion).or_insert(QualityLock {
                locked_score: *score,
                tolerance,
            });
            if *score > lock.locked_score {
                lock.locked_score = *score;
            }
        }
        self.baselines
            .insert(section_id.to_string(), baseline_text.to_string());
        debug!(section_id, locks = section_locks.len(), "Quality locks updated");
    }
}

/// Session-wide progress owned by the iteration controller
#[derive(Debug, Clone)]
pub struct IterationState {
    pub session_id: String,
    pub mode: OperationMode,
    pub limits: SessionLimits,
    /// Refinement rounds executed so far. Monotonic.
    rounds_completed: u32,
    pub status: SessionStatus,
    pub score_history: Vec<f64>,
    pub content_history: Vec<ContentSnapshot>,
    locked_sections: BTreeSet<SectionId>,
    section_edit_count: BTreeMap<SectionId, u32>,
    pub quality_locks: QualityLockRegistry,
    pub regressions: Vec<RegressionRecord>,
    /// Issues re-queued for the next iteration (regressions, transition checks)
    pub carried_issues: Vec<TargetedIssue>,
    pub tokens_used: u64,
    pub content: Document,
    started_at: Instant,
}

impl IterationState {
    pub fn new(content: Document, mode: OperationMode, limits: SessionLimits) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            mode,
            limits,
            rounds_completed: 0,
            status: SessionStatus::Running,
            score_history: Vec::new(),
            content_history: Vec::new(),
            locked_sections: BTreeSet::new(),
            section_edit_count: BTreeMap::new(),
            quality_locks: QualityLockRegistry::new(),
            regressions: Vec::new(),
            carried_issues: Vec::new(),
            tokens_used: 0,
            content,
            started_at: Instant::now(),
        }
    }

    /// Current evaluation boundary, 1-based: iteration 1 scores the input
    pub fn iteration(&self) -> u32 {
        self.rounds_completed + 1
    }

    pub fn rounds_completed(&self) -> u32 {
        self.rounds_completed
    }

    /// Move to the next boundary after a refine cycle
    pub fn advance_iteration(&mut self) {
        self.rounds_completed += 1;
    }

    pub fn locked_sections(&self) -> &BTreeSet<SectionId> {
        &self.locked_sections
    }

    pub fn is_locked(&self, section_id: &str) -> bool {
        self.locked_sections.contains(section_id)
    }

    pub fn edit_count(&self, section_id: &str) -> u32 {
        self.section_edit_count.get(section_id).copied().unwrap_or(0)
    }

    /// Count a patch/regenerate routing. Returns true when this edit locked the section.
    pub fn record_edit(&mut self, section_id: &str) -> bool {
        let count = self
            .section_edit_count
            .entry(section_id.to_string())
            .or_insert(0);
        *count += 1;
        if *count >= OSCILLATION_EDIT_LIMIT && self.locked_sections.insert(section_id.to_string())
        {
            info!(
                section_id,
                edits = *count,
                "Section locked by oscillation guard"
            );
            return true;
        }
        false
    }

    /// Record a boundary evaluation and the content it scored
    pub fn record_evaluation(&mut self, result: &CascadeResult) {
        self.tokens_used += result.tokens_used;
        self.score_history.push(result.final_score);
        self.content_history.push(ContentSnapshot {
            iteration: self.iteration(),
            score: result.final_score,
            stage: result.stage,
            content: self.content.clone(),
            issues: result.issues.clone(),
        });
    }

    pub fn add_tokens(&mut self, tokens: u64) {
        self.tokens_used += tokens;
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn token_budget_exhausted(&self) -> bool {
        self.tokens_used >= self.limits.token_budget
    }

    pub fn time_budget_exhausted(&self) -> bool {
        self.elapsed() >= self.limits.timeout
    }

    pub fn budget_exhausted(&self) -> bool {
        self.token_budget_exhausted() || self.time_budget_exhausted()
    }

    pub fn latest_snapshot(&self) -> Option<&ContentSnapshot> {
        self.content_history.last()
    }

    /// Score change between the two most recent evaluations
    pub fn last_improvement(&self) -> Option<f64> {
        match self.score_history.as_slice() {
            [.., previous, latest] => Some(latest - previous),
            _ => None,
        }
    }
}
