//! Core data types shared by every stage of the refinement pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier of a document section (stable across iterations)
pub type SectionId = String;

/// Per-criterion scores, ordered by criterion priority
pub type CriterionScores = BTreeMap<Criterion, f64>;

/// Per-section, per-criterion scores
pub type SectionScores = BTreeMap<SectionId, CriterionScores>;

/// A single section of a lesson document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub title: String,
    pub body: String,
}

impl Section {
    pub fn new(id: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.body.split_whitespace().count()
    }
}

/// Ordered collection of sections forming one lesson
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub sections: Vec<Section>,
}

impl Document {
    pub fn new(sections: Vec<Section>) -> Self {
        Self { sections }
    }

    /// Position of a section in document order
    pub fn index_of(&self, section_id: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.id == section_id)
    }

    pub fn section(&self, section_id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == section_id)
    }

    /// Replace a section body. Returns false if the section does not exist.
    pub fn set_body(&mut self, section_id: &str, body: String) -> bool {
        match self.sections.iter_mut().find(|s| s.id == section_id) {
            Some(section) => {
                section.body = body;
                true
            }
            None => false,
        }
    }

    pub fn word_count(&self) -> usize {
        self.sections.iter().map(Section::word_count).sum()
    }

    /// Concatenated markdown rendering used for whole-document checks and prompts
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(|s| format!("## {}\n\n{}", s.title, s.body.trim_end()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Upstream content specification the lesson must satisfy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentSpec {
    pub title: String,
    pub objectives: Vec<String>,
    pub audience: String,
    /// Section titles that must be present (case-insensitive)
    pub required_sections: Vec<String>,
}

/// Rubric handed to judges. Criteria are listed in resolution priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    pub criteria: Vec<Criterion>,
    pub objectives: Vec<String>,
    pub audience: String,
    pub required_sections: Vec<String>,
    pub accept_threshold: f64,
}

impl Rubric {
    pub fn from_spec(spec: &ContentSpec, accept_threshold: f64) -> Self {
        Self {
            criteria: Criterion::ALL.to_vec(),
            objectives: spec.objectives.clone(),
            audience: spec.audience.clone(),
            required_sections: spec.required_sections.clone(),
            accept_threshold,
        }
    }
}

/// Quality criterion. Declaration order is the conflict-resolution priority
/// (earlier wins), so `Ord` doubles as priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    FactualAccuracy,
    LearningObjectiveAlignment,
    PedagogicalStructure,
    ClarityReadability,
    EngagementExamples,
    Completeness,
}

impl Criterion {
    pub const ALL: [Criterion; 6] = [
        Criterion::FactualAccuracy,
        Criterion::LearningObjectiveAlignment,
        Criterion::PedagogicalStructure,
        Criterion::ClarityReadability,
        Criterion::EngagementExamples,
        Criterion::Completeness,
    ];

    /// 0 is the highest priority
    pub fn priority_rank(&self) -> u8 {
        *self as u8
    }

    /// Human-readable label used inside synthesized instructions
    pub fn label(&self) -> &'static str {
        match self {
            Self::FactualAccuracy => "factual accuracy",
            Self::LearningObjectiveAlignment => "learning objective alignment",
            Self::PedagogicalStructure => "pedagogical structure",
            Self::ClarityReadability => "clarity",
            Self::EngagementExamples => "engagement",
            Self::Completeness => "completeness",
        }
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FactualAccuracy => write!(f, "factual_accuracy"),
            Self::LearningObjectiveAlignment => write!(f, "learning_objective_alignment"),
            Self::PedagogicalStructure => write!(f, "pedagogical_structure"),
            Self::ClarityReadability => write!(f, "clarity_readability"),
            Self::EngagementExamples => write!(f, "engagement_examples"),
            Self::Completeness => write!(f, "completeness"),
        }
    }
}

/// Issue severity. Ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::Major => write!(f, "major"),
            Self::Minor => write!(f, "minor"),
        }
    }
}

/// What kind of failure an issue describes, independent of its severity.
///
/// A critical structural failure (broken diagram, unbalanced fence) and a
/// critical content failure (wrong fact) route differently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    #[default]
    Content,
    Structural,
}

/// Fix action for a single section
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixAction {
    SurgicalEdit,
    RegenerateSection,
}

impl std::fmt::Display for FixAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SurgicalEdit => write!(f, "SURGICAL_EDIT"),
            Self::RegenerateSection => write!(f, "REGENERATE_SECTION"),
        }
    }
}

/// Raised-by marker for issues produced by the heuristic filter
pub const HEURISTIC_RATER: &str = "heuristic";

/// Raised-by marker for issues produced by transition-coherence checks
pub const TRANSITION_RATER: &str = "transition_check";

/// A located, actionable problem in the content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetedIssue {
    pub criterion: Criterion,
    pub severity: Severity,
    #[serde(default)]
    pub category: FailureCategory,
    /// `None` for document-level issues that cannot be pinned to a section
    #[serde(default)]
    pub section_id: Option<SectionId>,
    /// Judge's suggested action; the router treats it as a hint only
    #[serde(default)]
    pub fix_action: Option<FixAction>,
    pub fix_instructions: String,
    /// Verbatim excerpts locating the problem inside the section
    #[serde(default)]
    pub context_anchors: Vec<String>,
    /// Which rater raised the issue (judge model id or a deterministic source)
    #[serde(default)]
    pub raised_by: String,
}

impl TargetedIssue {
    pub fn new(
        criterion: Criterion,
        severity: Severity,
        section_id: Option<&str>,
        fix_instructions: impl Into<String>,
    ) -> Self {
        Self {
            criterion,
            severity,
            category: FailureCategory::Content,
            section_id: section_id.map(str::to_string),
            fix_action: None,
            fix_instructions: fix_instructions.into(),
            context_anchors: Vec::new(),
            raised_by: String::new(),
        }
    }

    pub fn structural(mut self) -> Self {
        self.category = FailureCategory::Structural;
        self
    }

    pub fn from_rater(mut self, rater: impl Into<String>) -> Self {
        self.raised_by = rater.into();
        self
    }

    pub fn with_anchor(mut self, anchor: impl Into<String>) -> Self {
        self.context_anchors.push(anchor.into());
        self
    }

    pub fn with_fix_action(mut self, action: FixAction) -> Self {
        self.fix_action = Some(action);
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    /// Issues from deterministic sources are trusted regardless of judge agreement
    pub fn is_deterministic(&self) -> bool {
        self.raised_by == HEURISTIC_RATER || self.raised_by == TRANSITION_RATER
    }
}

/// Judge self-reported confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Recommended next step for the content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Accept,
    Refine,
    Regenerate,
}

impl Recommendation {
    /// Map an aggregate score onto a recommendation
    pub fn for_score(score: f64, accept_threshold: f64, reject_threshold: f64) -> Self {
        if score >= accept_threshold {
            Self::Accept
        } else if score < reject_threshold {
            Self::Regenerate
        } else {
            Self::Refine
        }
    }

    /// Accept and Regenerate are opposite verdicts; Refine opposes neither
    pub fn opposes(&self, other: &Recommendation) -> bool {
        matches!(
            (self, other),
            (Self::Accept, Self::Regenerate) | (Self::Regenerate, Self::Accept)
        )
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "ACCEPT"),
            Self::Refine => write!(f, "REFINE"),
            Self::Regenerate => write!(f, "REGENERATE"),
        }
    }
}

/// One judge's scoring of the content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub model_id: String,
    pub overall_score: f64,
    pub per_criterion_scores: CriterionScores,
    #[serde(default)]
    pub section_scores: SectionScores,
    pub confidence: Confidence,
    pub issues: Vec<TargetedIssue>,
    pub recommendation: Recommendation,
    #[serde(default)]
    pub tokens_used: u64,
}

impl JudgeVerdict {
    /// Boundary validation: every score must be finite and inside [0, 1]
    pub fn validate(&self) -> Result<(), String> {
        let in_range = |s: f64| s.is_finite() && (0.0..=1.0).contains(&s);

        if !in_range(self.overall_score) {
            return Err(format!("overall_score out of range: {}", self.overall_score));
        }
        for (criterion, score) in &self.per_criterion_scores {
            if !in_range(*score) {
                return Err(format!("{} score out of range: {}", criterion, score));
            }
        }
        for (section, scores) in &self.section_scores {
            if let Some((criterion, score)) = scores.iter().find(|(_, s)| !in_range(**s)) {
                return Err(format!(
                    "section {} {} score out of range: {}",
                    section, criterion, score
                ));
            }
        }
        Ok(())
    }

    /// Verdict with confidence forced down, used after quorum loss
    pub fn with_low_confidence(mut self) -> Self {
        self.confidence = Confidence::Low;
        self
    }
}

/// Result of the delta judge's "was this addressed?" check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixVerification {
    pub addressed: bool,
    pub rationale: String,
    /// Optional fresh scores for the patched section
    #[serde(default)]
    pub criterion_scores: CriterionScores,
    #[serde(default)]
    pub tokens_used: u64,
}

/// Text produced by a patch or regeneration call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedText {
    pub text: String,
    #[serde(default)]
    pub tokens_used: u64,
}

/// Excerpt of a neighbouring section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionExcerpt {
    pub section_id: SectionId,
    pub title: String,
    pub excerpt: String,
}

/// Context handed to patch/regenerate calls: the target plus its immediate neighbours only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextWindow {
    pub previous: Option<SectionExcerpt>,
    pub target: Section,
    pub next: Option<SectionExcerpt>,
}

impl ContextWindow {
    /// Build the window for `index`, keeping the tail of the previous section
    /// and the head of the next one.
    pub fn around(document: &Document, index: usize, excerpt_chars: usize) -> Option<Self> {
        let target = document.sections.get(index)?.clone();
        let previous = index
            .checked_sub(1)
            .and_then(|i| document.sections.get(i))
            .map(|s| SectionExcerpt {
                section_id: s.id.clone(),
                title: s.title.clone(),
                excerpt: tail_chars(&s.body, excerpt_chars),
            });
        let next = document.sections.get(index + 1).map(|s| SectionExcerpt {
            section_id: s.id.clone(),
            title: s.title.clone(),
            excerpt: head_chars(&s.body, excerpt_chars),
        });
        Some(Self {
            previous,
            target,
            next,
        })
    }
}

/// What the regenerator needs to rewrite a section from scratch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSpec {
    pub section_id: SectionId,
    pub title: String,
    pub instructions: String,
    pub objectives: Vec<String>,
    pub audience: String,
}

fn head_chars(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

fn tail_chars(text: &str, n: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(n)).collect()
}
