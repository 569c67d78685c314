//! Conflict resolution between fix instructions aimed at the same section.
//!
//! Instructions are grouped by criterion and walked in criterion priority
//! order. A group whose direction (expand vs. reduce) contradicts a
//! higher-priority group is not applied; it becomes a constraint instead.

use std::collections::BTreeMap;

use crate::state::{Criterion, TargetedIssue};

const EXPAND_WORDS: &[&str] = &[
    "add", "expand", "elaborate", "more", "include", "detail", "extend", "lengthen",
];
const REDUCE_WORDS: &[&str] = &[
    "simplify", "shorten", "remove", "cut", "condense", "trim", "reduce", "fewer", "less",
];

/// Direction an instruction pushes the section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Expand,
    Reduce,
    Neutral,
}

impl Polarity {
    pub fn of(instruction: &str) -> Self {
        let lower = instruction.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let expand = words.iter().any(|w| EXPAND_WORDS.contains(w));
        let reduce = words.iter().any(|w| REDUCE_WORDS.contains(w));
        match (expand, reduce) {
            (true, false) => Self::Expand,
            (false, true) => Self::Reduce,
            _ => Self::Neutral,
        }
    }

    pub fn contradicts(&self, other: &Polarity) -> bool {
        matches!(
            (self, other),
            (Self::Expand, Self::Reduce) | (Self::Reduce, Self::Expand)
        )
    }
}

/// One criterion's worth of instructions for a section
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionGroup {
    pub criterion: Criterion,
    pub instructions: Vec<String>,
    pub polarity: Polarity,
}

/// Resolved instructions for a section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInstructions {
    /// Applied instructions, highest priority first
    pub directives: Vec<(Criterion, String)>,
    /// Criteria demoted to "do not degrade" constraints
    pub constraints: Vec<(Criterion, Polarity)>,
}

impl ResolvedInstructions {
    /// Single instruction string handed to the patcher
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = self
            .directives
            .iter()
            .map(|(criterion, text)| format!("[{}] {}", criterion.label(), text))
            .collect();
        for (criterion, polarity) in &self.constraints {
            let verb = match polarity {
                Polarity::Expand => "reduce",
                Polarity::Reduce | Polarity::Neutral => "degrade",
            };
            lines.push(format!(
                "Constraint: do not {} {} while applying the changes above.",
                verb,
                criterion.label()
            ));
        }
        lines.join("\n")
    }
}

/// Group issues by criterion, deduplicating identical instructions
pub fn group_by_criterion(issues: &[TargetedIssue]) -> Vec<InstructionGroup> {
    let mut grouped: BTreeMap<Criterion, Vec<&TargetedIssue>> = BTreeMap::new();
    for issue in issues {
        grouped.entry(issue.criterion).or_default().push(issue);
    }

    grouped
        .into_iter()
        .map(|(criterion, mut members)| {
            members.sort_by(|a, b| {
                a.severity
                    .cmp(&b.severity)
                    .then_with(|| a.fix_instructions.cmp(&b.fix_instructions))
            });
            let mut instructions: Vec<String> = Vec::new();
            for issue in members {
                let text = issue.fix_instructions.trim().to_string();
                if !text.is_empty() && !instructions.contains(&text) {
                    instructions.push(text);
                }
            }
            let polarity = instructions
                .iter()
                .map(|i| Polarity::of(i))
                .find(|p| *p != Polarity::Neutral)
                .unwrap_or(Polarity::Neutral);
            InstructionGroup {
                criterion,
                instructions,
                polarity,
            }
        })
        .collect()
}

/// Resolve contradictions by criterion priority
pub fn resolve(issues: &[TargetedIssue]) -> ResolvedInstructions {
    let mut resolved = ResolvedInstructions::default();
    let mut applied: Vec<Polarity> = Vec::new();

    for group in group_by_criterion(issues) {
        let conflicts = applied.iter().any(|p| p.contradicts(&group.polarity));
        if conflicts {
            resolved.constraints.push((group.criterion, group.polarity));
            continue;
        }
        applied.push(group.polarity);
        for text in group.instructions {
            resolved.directives.push((group.criterion, text));
        }
    }
    resolved
}
