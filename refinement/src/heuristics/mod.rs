//! Heuristic Filter: free, deterministic pre-checks
//!
//! Hard checks stop the cascade before any model is called:
//!
//! | Check | Issue raised |
//! |-------|--------------|
//! | minimum word count | completeness, critical, document-level |
//! | required sections present | completeness, critical, document-level |
//! | balanced code fences | structural, critical, per section |
//! | valid diagram syntax | structural, critical, per section |
//! | script consistency | clarity, critical, per section |
//!
//! Readability band and example/exercise counts are soft: they only add warnings.

pub mod rules;

use tracing::debug;

use crate::config::HeuristicConfig;
use crate::state::{
    Criterion, Document, HeuristicMetrics, HeuristicResult, Rubric, Severity, TargetedIssue,
    HEURISTIC_RATER,
};

/// Number of hard checks, the denominator of the structural score
const HARD_CHECKS: usize = 5;

/// Deterministic document checks
#[derive(Debug, Clone, Default)]
pub struct HeuristicFilter {
    config: HeuristicConfig,
}

impl HeuristicFilter {
    pub fn new(config: HeuristicConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HeuristicConfig {
        &self.config
    }

    /// Run every check against the whole document
    pub fn evaluate(&self, document: &Document, rubric: &Rubric) -> HeuristicResult {
        let rendered = document.render();
        let mut metrics = HeuristicMetrics {
            word_count: document.word_count(),
            readability_grade: rules::readability_grade(&rendered),
            example_count: rules::count_examples(&rendered),
            exercise_count: rules::count_exercises(&rendered),
            foreign_script_ratio: rules::script_profile(&rendered).foreign_ratio,
            ..Default::default()
        };
        let mut failure_reasons = Vec::new();
        let mut warnings = Vec::new();
        let mut issues = Vec::new();
        let mut failed_checks = 0;

        // Word count
        if metrics.word_count < self.config.min_word_count {
            failed_checks += 1;
            failure_reasons.push(format!(
                "word count {} below minimum {}",
                metrics.word_count, self.config.min_word_count
            ));
            issues.push(heuristic_issue(
                Criterion::Completeness,
                None,
                format!(
                    "Expand the lesson to at least {} words",
                    self.config.min_word_count
                ),
            ));
        }

        // Required sections
        metrics.missing_sections = rubric
            .required_sections
            .iter()
            .filter(|required| {
                !document
                    .sections
                    .iter()
                    .any(|s| s.title.trim().eq_ignore_ascii_case(required.trim()))
            })
            .cloned()
            .collect();
        if !metrics.missing_sections.is_empty() {
            failed_checks += 1;
            failure_reasons.push(format!(
                "missing required sections: {}",
                metrics.missing_sections.join(", ")
            ));
            for missing in &metrics.missing_sections {
                issues.push(heuristic_issue(
                    Criterion::Completeness,
                    None,
                    format!("Add the required section '{}'", missing),
                ));
            }
        }

        // Structural integrity, per section
        for section in &document.sections {
            if !rules::fences_balanced(&section.body) {
                metrics.unbalanced_fence_sections.push(section.id.clone());
                issues.push(
                    heuristic_issue(
                        Criterion::PedagogicalStructure,
                        Some(&section.id),
                        "Close the unterminated code block".to_string(),
                    )
                    .structural(),
                );
            }
            for problem in rules::invalid_diagrams(&section.body) {
                if !metrics.invalid_diagram_sections.contains(&section.id) {
                    metrics.invalid_diagram_sections.push(section.id.clone());
                }
                issues.push(
                    heuristic_issue(
                        Criterion::PedagogicalStructure,
                        Some(&section.id),
                        format!("Fix the diagram syntax: {}", problem),
                    )
                    .structural(),
                );
            }
        }
        if !metrics.unbalanced_fence_sections.is_empty() {
            failed_checks += 1;
            failure_reasons.push(format!(
                "unbalanced code fences in: {}",
                metrics.unbalanced_fence_sections.join(", ")
            ));
        }
        if !metrics.invalid_diagram_sections.is_empty() {
            failed_checks += 1;
            failure_reasons.push(format!(
                "invalid diagrams in: {}",
                metrics.invalid_diagram_sections.join(", ")
            ));
        }

        // Script consistency
        if metrics.foreign_script_ratio > self.config.max_foreign_script_ratio {
            failed_checks += 1;
            failure_reasons.push(format!(
                "mixed scripts: {:.1}% of letters outside the dominant script",
                metrics.foreign_script_ratio * 100.0
            ));
            for section in &document.sections {
                let profile = rules::script_profile(&section.body);
                if profile.foreign_ratio > self.config.max_foreign_script_ratio {
                    issues.push(heuristic_issue(
                        Criterion::ClarityReadability,
                        Some(&section.id),
                        "Rewrite passages so the section uses a single language".to_string(),
                    ));
                }
            }
        }

        // Soft checks
        if metrics.readability_grade < self.config.min_readability_grade
            || metrics.readability_grade > self.config.max_readability_grade
        {
            warnings.push(format!(
                "readability grade {:.1} outside {:.1}-{:.1}",
                metrics.readability_grade,
                self.config.min_readability_grade,
                self.config.max_readability_grade
            ));
        }
        if metrics.example_count < self.config.min_examples {
            warnings.push(format!(
                "{} examples found, expected at least {}",
                metrics.example_count, self.config.min_examples
            ));
        }
        if metrics.exercise_count < self.config.min_exercises {
            warnings.push(format!(
                "{} exercises found, expected at least {}",
                metrics.exercise_count, self.config.min_exercises
            ));
        }

        metrics.structural_score = (HARD_CHECKS - failed_checks) as f64 / HARD_CHECKS as f64;
        let passed = failed_checks == 0;

        debug!(
            passed,
            failed_checks,
            words = metrics.word_count,
            warnings = warnings.len(),
            "Heuristic filter finished"
        );

        HeuristicResult {
            passed,
            metrics,
            failure_reasons,
            warnings,
            issues,
        }
    }
}

fn heuristic_issue(criterion: Criterion, section_id: Option<&str>, fix: String) -> TargetedIssue {
    TargetedIssue::new(criterion, Severity::Critical, section_id, fix).from_rater(HEURISTIC_RATER)
}
