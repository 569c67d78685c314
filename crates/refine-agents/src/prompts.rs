//! Preambles and prompt builders for each model role.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever preamble content changes.
//! The version is written into every run report so scores can be traced back
//! to the prompts that produced them.

use std::fmt::Write;

use refinement::state::{SectionExcerpt, SectionRefinementTask};
use refinement::{ContextWindow, Criterion, Document, Rubric, SectionSpec, TargetedIssue};

use crate::parse::{FIX_SCHEMA, VERDICT_SCHEMA};

/// Prompt version. Bump on any preamble content change.
pub const PROMPT_VERSION: &str = "1.2.0";

/// Quality judge preamble.
pub const JUDGE_PREAMBLE: &str = "\
You are an experienced curriculum reviewer grading a lesson written for students.

Score the lesson against every criterion in the rubric on a scale from 0.0 to 1.0. \
Be strict: 0.9 and above means ready to publish without edits.

For every problem you find, report an issue:
- Pin it to a section by its id whenever the problem lives inside one section. \
  Use null only when the problem spans the whole lesson.
- Quote a short verbatim excerpt from the section in context_anchors.
- Write fix_instructions as a concrete edit a writer can apply, not a complaint.
- Mark structural=true only for broken formatting: unbalanced code fences, \
  invalid diagrams, missing headings.
- Severity: critical for wrong facts or content unsafe for the audience, major for \
  problems a student would notice, minor for polish.

Report per-section scores for every section you inspected closely.

Reply with a single JSON object matching the schema. No prose outside the JSON.";

/// Surgical editor preamble.
pub const PATCHER_PREAMBLE: &str = "\
You are a careful lesson editor. You receive one section of a lesson and a list of \
required changes.

Rules:
- Apply only the requested changes. Keep every other sentence as it is.
- Never remove correct content, examples or exercises.
- Keep the section's tone, reading level and formatting conventions.
- The neighbouring excerpts are for continuity only. Do not rewrite them.

Reply with the full revised section body and nothing else. No heading, no commentary.";

/// Section writer preamble.
pub const REGENERATOR_PREAMBLE: &str = "\
You are a lesson writer rewriting one section from scratch.

Rules:
- Serve the listed learning objectives at the stated audience level.
- Include at least one concrete example. Add an exercise when the section teaches a skill.
- Open so the section follows naturally from the previous excerpt, and close so the \
  next excerpt still reads as a continuation.
- Keep code fences balanced and diagrams syntactically valid.

Reply with the new section body and nothing else. No heading, no commentary.";

/// Delta judge preamble.
pub const FIX_VERIFIER_PREAMBLE: &str = "\
You check whether an edit fixed one specific problem.

Compare the text before and after the edit against the reported issue. Answer \
addressed=true only when the issue is clearly resolved in the new text. Give a \
one-line rationale. If you can, score the new text on the listed criterion from \
0.0 to 1.0 in criterion_scores.

Reply with a single JSON object matching the schema. No prose outside the JSON.";

/// Judge prompt: rubric, schema and the full lesson
pub fn judge_prompt(document: &Document, rubric: &Rubric) -> String {
    let mut out = String::new();
    out.push_str("## Rubric\n");
    for criterion in &rubric.criteria {
        let _ = writeln!(out, "- {}: {}", criterion, criterion_guidance(*criterion));
    }
    let _ = writeln!(out, "\nAudience: {}", rubric.audience);
    if !rubric.objectives.is_empty() {
        out.push_str("Learning objectives:\n");
        for objective in &rubric.objectives {
            let _ = writeln!(out, "- {}", objective);
        }
    }
    if !rubric.required_sections.is_empty() {
        let _ = writeln!(
            out,
            "Required sections: {}",
            rubric.required_sections.join(", ")
        );
    }
    let _ = writeln!(out, "Publishing threshold: {:.2}", rubric.accept_threshold);

    out.push_str("\n## Response schema\n");
    out.push_str(&VERDICT_SCHEMA);
    out.push_str("\n\n## Lesson\n");
    for section in &document.sections {
        let _ = write!(
            out,
            "\n<section id=\"{}\" title=\"{}\">\n{}\n</section>\n",
            section.id, section.title, section.body
        );
    }
    out
}

/// Patch prompt: instructions plus the context window
pub fn patch_prompt(task: &SectionRefinementTask, context: &ContextWindow) -> String {
    let mut out = String::new();
    out.push_str("## Required changes\n");
    out.push_str(&task.synthesized_instructions);
    out.push('\n');
    let anchors: Vec<&str> = task
        .source_issues
        .iter()
        .flat_map(|i| i.context_anchors.iter().map(String::as_str))
        .collect();
    if !anchors.is_empty() {
        out.push_str("\nPassages the reviewers pointed at:\n");
        for anchor in anchors {
            let _ = writeln!(out, "> {}", anchor);
        }
    }
    push_window(&mut out, context);
    out
}

/// Regeneration prompt: section spec plus the context window
pub fn regenerate_prompt(spec: &SectionSpec, context: &ContextWindow) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## Section to write\nTitle: {}", spec.title);
    let _ = writeln!(out, "Audience: {}", spec.audience);
    if !spec.objectives.is_empty() {
        out.push_str("Objectives:\n");
        for objective in &spec.objectives {
            let _ = writeln!(out, "- {}", objective);
        }
    }
    if !spec.instructions.is_empty() {
        let _ = writeln!(out, "\nReviewer notes on the old version:\n{}", spec.instructions);
    }
    push_window(&mut out, context);
    out
}

/// Delta-judge prompt
pub fn verify_prompt(issue: &TargetedIssue, before: &str, after: &str) -> String {
    format!(
        "## Issue\nCriterion: {}\nSeverity: {}\n{}\n\n## Response schema\n{}\n\n\
         ## Before\n{}\n\n## After\n{}\n",
        issue.criterion,
        issue.severity,
        issue.fix_instructions,
        FIX_SCHEMA.as_str(),
        before,
        after
    )
}

fn push_window(out: &mut String, context: &ContextWindow) {
    if let Some(previous) = &context.previous {
        push_excerpt(out, "Previous section (ending)", previous);
    }
    let _ = write!(
        out,
        "\n## Section \"{}\"\n{}\n",
        context.target.title, context.target.body
    );
    if let Some(next) = &context.next {
        push_excerpt(out, "Next section (opening)", next);
    }
}

fn push_excerpt(out: &mut String, label: &str, excerpt: &SectionExcerpt) {
    let _ = write!(
        out,
        "\n## {} \"{}\"\n{}\n",
        label, excerpt.title, excerpt.excerpt
    );
}

fn criterion_guidance(criterion: Criterion) -> &'static str {
    match criterion {
        Criterion::FactualAccuracy => "every claim is correct for the subject",
        Criterion::LearningObjectiveAlignment => "each section serves a stated objective",
        Criterion::PedagogicalStructure => "ideas build in a sensible order with recap",
        Criterion::ClarityReadability => "sentences suit the audience's reading level",
        Criterion::EngagementExamples => "concrete examples and exercises keep students active",
        Criterion::Completeness => "required topics and sections are all covered",
    }
}
