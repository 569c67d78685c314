//! Text-level rule family shared by the document filter and the verifier.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+(\s|$)").expect("SENTENCE_END regex should compile"));

static EXAMPLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)(\bfor (example|instance)\b|\be\.g\.|^#+\s*examples?\b|^\*\*examples?\b|\bexample\s*\d*:)")
        .expect("EXAMPLE_PATTERN regex should compile")
});

static EXERCISE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)(^#+\s*(exercises?|practice|try it|quiz)\b|^\*\*(exercises?|practice)\b|\bexercise\s*\d+)")
        .expect("EXERCISE_PATTERN regex should compile")
});

/// Mermaid diagram types accepted on the first line of a block
const DIAGRAM_KEYWORDS: &[&str] = &[
    "graph",
    "flowchart",
    "sequenceDiagram",
    "classDiagram",
    "stateDiagram",
    "stateDiagram-v2",
    "erDiagram",
    "gantt",
    "pie",
    "journey",
    "mindmap",
    "timeline",
    "gitGraph",
    "quadrantChart",
];

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Prose with fenced code blocks removed
pub fn strip_code_blocks(text: &str) -> String {
    let mut in_fence = false;
    let mut prose = String::with_capacity(text.len());
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence {
            prose.push_str(line);
            prose.push('\n');
        }
    }
    prose
}

fn syllables(word: &str) -> usize {
    let lower: Vec<char> = word
        .chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_lowercase)
        .collect();
    if lower.is_empty() {
        return 0;
    }
    let is_vowel = |c: char| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
    let mut count = 0;
    let mut previous_vowel = false;
    for &c in &lower {
        let vowel = is_vowel(c);
        if vowel && !previous_vowel {
            count += 1;
        }
        previous_vowel = vowel;
    }
    if lower.len() > 2 && lower.ends_with(&['e']) && !lower.ends_with(&['l', 'e']) && count > 1 {
        count -= 1;
    }
    count.max(1)
}

/// Flesch-Kincaid grade level of the prose, 0.0 for empty text
pub fn readability_grade(text: &str) -> f64 {
    let prose = strip_code_blocks(text);
    let words: Vec<&str> = prose
        .split_whitespace()
        .filter(|w| w.chars().any(char::is_alphabetic))
        .collect();
    if words.is_empty() {
        return 0.0;
    }
    let sentences = SENTENCE_END.find_iter(&prose).count().max(1) as f64;
    let syllable_total: usize = words.iter().map(|w| syllables(w)).sum();
    let word_total = words.len() as f64;

    0.39 * (word_total / sentences) + 11.8 * (syllable_total as f64 / word_total) - 15.59
}

pub fn count_examples(text: &str) -> usize {
    EXAMPLE_PATTERN.find_iter(text).count()
}

pub fn count_exercises(text: &str) -> usize {
    EXERCISE_PATTERN.find_iter(text).count()
}

/// Every opening ``` has a closing one
pub fn fences_balanced(text: &str) -> bool {
    text.lines()
        .filter(|line| line.trim_start().starts_with("```"))
        .count()
        % 2
        == 0
}

/// Bodies of ```mermaid blocks
fn diagram_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;
    for line in text.lines() {
        let trimmed = line.trim_start();
        match current.as_mut() {
            None if trimmed.starts_with("```mermaid") => current = Some(String::new()),
            None => {}
            Some(_) if trimmed.starts_with("```") => {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
            }
            Some(block) => {
                block.push_str(line);
                block.push('\n');
            }
        }
    }
    // An unterminated block is a fence problem, but its body is still checked
    if let Some(block) = current {
        blocks.push(block);
    }
    blocks
}

fn brackets_balanced(text: &str) -> bool {
    let mut stack = Vec::new();
    let mut in_quote = false;
    for c in text.chars() {
        match c {
            '"' => in_quote = !in_quote,
            _ if in_quote => {}
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(expected) {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty() && !in_quote
}

/// Problems found in diagram blocks, one entry per invalid block
pub fn invalid_diagrams(text: &str) -> Vec<String> {
    diagram_blocks(text)
        .iter()
        .enumerate()
        .filter_map(|(i, block)| {
            let header = block.lines().map(str::trim).find(|l| !l.is_empty());
            let Some(header) = header else {
                return Some(format!("diagram {} is empty", i + 1));
            };
            let keyword = header.split_whitespace().next().unwrap_or_default();
            if !DIAGRAM_KEYWORDS.contains(&keyword) {
                return Some(format!("diagram {} has unknown type '{}'", i + 1, keyword));
            }
            if !brackets_balanced(block) {
                return Some(format!("diagram {} has unbalanced brackets", i + 1));
            }
            None
        })
        .collect()
}

/// Writing system of a letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Script {
    Latin,
    Cyrillic,
    Greek,
    Arabic,
    Hebrew,
    Devanagari,
    Cjk,
    Other,
}

impl Script {
    pub fn of(c: char) -> Option<Script> {
        if !c.is_alphabetic() {
            return None;
        }
        let script = match c as u32 {
            0x0041..=0x024F | 0x1E00..=0x1EFF => Script::Latin,
            0x0370..=0x03FF | 0x1F00..=0x1FFF => Script::Greek,
            0x0400..=0x052F => Script::Cyrillic,
            0x0590..=0x05FF => Script::Hebrew,
            0x0600..=0x06FF | 0x0750..=0x077F => Script::Arabic,
            0x0900..=0x097F => Script::Devanagari,
            0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF => Script::Cjk,
            _ => Script::Other,
        };
        Some(script)
    }
}

/// Letter distribution over scripts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScriptProfile {
    pub dominant: Option<Script>,
    /// Share of letters outside the dominant script
    pub foreign_ratio: f64,
}

pub fn script_profile(text: &str) -> ScriptProfile {
    let prose = strip_code_blocks(text);
    let mut counts: Vec<(Script, usize)> = Vec::new();
    let mut total = 0usize;
    for script in prose.chars().filter_map(Script::of) {
        total += 1;
        match counts.iter_mut().find(|(s, _)| *s == script) {
            Some((_, n)) => *n += 1,
            None => counts.push((script, 1)),
        }
    }
    let Some((dominant, max)) = counts.iter().copied().max_by_key(|(_, n)| *n) else {
        return ScriptProfile {
            dominant: None,
            foreign_ratio: 0.0,
        };
    };
    ScriptProfile {
        dominant: Some(dominant),
        foreign_ratio: (total - max) as f64 / total as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_balance() {
        assert!(fences_balanced("text\n```rust\nfn main() {}\n```\n"));
        assert!(!fences_balanced("```python\nprint(1)\n"));
        assert!(fences_balanced("no code at all"));
    }

    #[test]
    fn test_diagram_validation() {
        let good = "```mermaid\ngraph TD\n  A[Start] --> B(End)\n```";
        assert!(invalid_diagrams(good).is_empty());

        let unknown = "```mermaid\ngraf TD\n  A --> B\n```";
        assert_eq!(invalid_diagrams(unknown).len(), 1);

        let unbalanced = "```mermaid\nflowchart LR\n  A[Start --> B\n```";
        assert!(invalid_diagrams(unbalanced)[0].contains("unbalanced"));

        let quoted = "```mermaid\nflowchart LR\n  A[\"x (y\"] --> B\n```";
        assert!(invalid_diagrams(quoted).is_empty());
    }

    #[test]
    fn test_script_profile_flags_mixing() {
        let latin = script_profile("Photosynthesis converts light into chemical energy.");
        assert_eq!(latin.dominant, Some(Script::Latin));
        assert_eq!(latin.foreign_ratio, 0.0);

        let mixed = script_profile("Photosynthesis преобразует light energy");
        assert!(mixed.foreign_ratio > 0.2);
    }

    #[test]
    fn test_code_is_ignored_for_script_profile() {
        let text = "Plain English prose here.\n```\nпеременная = 1\n```\n";
        assert_eq!(script_profile(text).foreign_ratio, 0.0);
    }

    #[test]
    fn test_readability_grade_orders_texts() {
        let simple = "The cat sat. The dog ran. We had fun.";
        let dense = "Photosynthetic organisms systematically transform electromagnetic \
                     radiation into biochemically accessible energy through \
                     sophisticated molecular machinery.";
        assert!(readability_grade(simple) < readability_grade(dense));
        assert_eq!(readability_grade(""), 0.0);
    }

    #[test]
    fn test_example_and_exercise_counts() {
        let text = "For example, water boils.\n\n## Exercise 1\nTry it.\n\n### Practice\nMore.";
        assert_eq!(count_examples(text), 1);
        assert!(count_exercises(text) >= 2);
    }
}
