//! Best-effort selection for unattended sessions

use serde::{Deserialize, Serialize};

use crate::state::{ContentSnapshot, TargetedIssue};

/// Score at or above which a best-effort result is rated good
pub const GOOD_QUALITY: f64 = 0.85;
/// Score at or above which a best-effort result is rated acceptable
pub const ACCEPTABLE_QUALITY: f64 = 0.75;

/// Coarse quality band reported with the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityStatus {
    Good,
    Acceptable,
    BelowStandard,
}

impl QualityStatus {
    pub fn classify(score: f64) -> Self {
        if score >= GOOD_QUALITY {
            Self::Good
        } else if score >= ACCEPTABLE_QUALITY {
            Self::Acceptable
        } else {
            Self::BelowStandard
        }
    }
}

impl std::fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Good => write!(f, "good"),
            Self::Acceptable => write!(f, "acceptable"),
            Self::BelowStandard => write!(f, "below_standard"),
        }
    }
}

/// Snapshot chosen when no threshold was met
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestEffortSelection {
    pub iteration: u32,
    pub score: f64,
    pub quality_status: QualityStatus,
    /// One line per unresolved issue of the chosen snapshot
    pub improvement_hints: Vec<String>,
}

/// Highest-scoring snapshot; ties go to the earliest iteration.
pub fn select_best(history: &[ContentSnapshot]) -> Option<&ContentSnapshot> {
    history.iter().fold(None, |best: Option<&ContentSnapshot>, snapshot| match best {
        Some(b) if snapshot.score <= b.score => Some(b),
        _ => Some(snapshot),
    })
}

pub fn improvement_hint(issue: &TargetedIssue) -> String {
    match &issue.section_id {
        Some(section) => format!(
            "[{}] {} ({}): {}",
            section,
            issue.criterion.label(),
            issue.severity,
            issue.fix_instructions
        ),
        None => format!(
            "[document] {} ({}): {}",
            issue.criterion.label(),
            issue.severity,
            issue.fix_instructions
        ),
    }
}

/// Build the selection record for a chosen snapshot
pub fn selection_for(snapshot: &ContentSnapshot) -> BestEffortSelection {
    BestEffortSelection {
        iteration: snapshot.iteration,
        score: snapshot.score,
        quality_status: QualityStatus::classify(snapshot.score),
        improvement_hints: snapshot.issues.iter().map(improvement_hint).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CascadeStage, Criterion, Document, Severity};

    fn snapshot(iteration: u32, score: f64) -> ContentSnapshot {
        ContentSnapshot {
            iteration,
            score,
            stage: CascadeStage::SingleJudge,
            content: Document::default(),
            issues: Vec::new(),
        }
    }

    #[test]
    fn test_picks_highest_score() {
        let history = vec![snapshot(1, 0.70), snapshot(2, 0.78), snapshot(3, 0.76)];
        let best = select_best(&history).unwrap();
        assert_eq!(best.iteration, 2);
        assert_eq!(selection_for(best).quality_status, QualityStatus::Acceptable);
    }

    #[test]
    fn test_ties_go_to_earliest() {
        let history = vec![snapshot(1, 0.80), snapshot(2, 0.80), snapshot(3, 0.79)];
        assert_eq!(select_best(&history).unwrap().iteration, 1);
    }

    #[test]
    fn test_empty_history() {
        assert!(select_best(&[]).is_none());
    }

    #[test]
    fn test_quality_bands() {
        assert_eq!(QualityStatus::classify(0.85), QualityStatus::Good);
        assert_eq!(QualityStatus::classify(0.75), QualityStatus::Acceptable);
        assert_eq!(QualityStatus::classify(0.7499), QualityStatus::BelowStandard);
    }

    #[test]
    fn test_hints_carry_location() {
        let mut snap = snapshot(1, 0.6);
        snap.issues.push(crate::state::TargetedIssue::new(
            Criterion::Completeness,
            Severity::Major,
            Some("intro"),
            "Cover the second objective",
        ));
        let selection = selection_for(&snap);
        assert_eq!(selection.improvement_hints.len(), 1);
        assert!(selection.improvement_hints[0].starts_with("[intro] completeness"));
    }
}
