//! Response contracts for judge and delta-judge replies.
//!
//! Model text is parsed into wire types, then validated into core types.
//! Anything that fails either step is a `MalformedResponse`, which the
//! core's retry policy treats as retryable.
//!
//! ```text
//! raw text ──▶ extract_json_block ──▶ VerdictWire ──▶ validate ──▶ JudgeVerdict
//!                                     FixWire     ──▶ validate ──▶ FixVerification
//! ```

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use refinement::state::{CriterionScores, SectionScores};
use refinement::{
    Criterion, FixAction, FixVerification, JudgeVerdict, ModelCallError, Severity, TargetedIssue,
};

/// Code fence wrapping a whole reply, with an optional language tag
static FENCED_REPLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n(.*?)\n?```\s*$").expect("valid regex")
});

/// Judge reply as the model is asked to produce it.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct VerdictWire {
    /// Overall quality in [0, 1]
    pub overall_score: f64,
    /// Criterion name to score in [0, 1]
    pub per_criterion_scores: BTreeMap<String, f64>,
    /// Section id to criterion scores, for sections the judge inspected
    #[serde(default)]
    pub section_scores: BTreeMap<String, BTreeMap<String, f64>>,
    /// low | medium | high
    pub confidence: String,
    #[serde(default)]
    pub issues: Vec<IssueWire>,
    /// ACCEPT | REFINE | REGENERATE
    pub recommendation: String,
}

/// One issue inside a judge reply.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct IssueWire {
    pub criterion: String,
    /// critical | major | minor
    pub severity: String,
    /// Section id, or null for document-level issues
    #[serde(default)]
    pub section_id: Option<String>,
    /// SURGICAL_EDIT | REGENERATE_SECTION
    #[serde(default)]
    pub fix_action: Option<String>,
    pub fix_instructions: String,
    /// Verbatim excerpts locating the problem
    #[serde(default)]
    pub context_anchors: Vec<String>,
    /// True for formatting or structure breakage rather than content problems
    #[serde(default)]
    pub structural: bool,
}

/// Delta-judge reply.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FixWire {
    pub addressed: bool,
    /// One line
    pub rationale: String,
    /// Optional fresh criterion scores for the edited section
    #[serde(default)]
    pub criterion_scores: BTreeMap<String, f64>,
}

/// JSON schema for `VerdictWire`, embedded in judge prompts
pub static VERDICT_SCHEMA: LazyLock<String> = LazyLock::new(|| schema_text::<VerdictWire>());

/// JSON schema for `FixWire`, embedded in delta-judge prompts
pub static FIX_SCHEMA: LazyLock<String> = LazyLock::new(|| schema_text::<FixWire>());

fn schema_text<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// Parse a judge reply into a validated verdict attributed to `model_id`
pub fn parse_verdict(
    raw: &str,
    model_id: &str,
    tokens_used: u64,
) -> Result<JudgeVerdict, ModelCallError> {
    let wire: VerdictWire = parse_wire(raw)?;

    let issues = wire
        .issues
        .into_iter()
        .map(|issue| issue_from_wire(issue, model_id))
        .collect::<Result<Vec<_>, _>>()?;

    let mut section_scores = SectionScores::new();
    for (section_id, scores) in wire.section_scores {
        section_scores.insert(section_id, criterion_scores(scores)?);
    }

    let verdict = JudgeVerdict {
        model_id: model_id.to_string(),
        overall_score: wire.overall_score,
        per_criterion_scores: criterion_scores(wire.per_criterion_scores)?,
        section_scores,
        confidence: enum_value("confidence", &wire.confidence.to_ascii_lowercase())?,
        issues,
        recommendation: enum_value("recommendation", &wire.recommendation.to_ascii_uppercase())?,
        tokens_used,
    };
    verdict.validate().map_err(ModelCallError::MalformedResponse)?;
    Ok(verdict)
}

/// Parse a delta-judge reply
pub fn parse_fix_verification(
    raw: &str,
    tokens_used: u64,
) -> Result<FixVerification, ModelCallError> {
    let wire: FixWire = parse_wire(raw)?;
    let criterion_scores = criterion_scores(wire.criterion_scores)?;
    if let Some((criterion, score)) = criterion_scores
        .iter()
        .find(|(_, s)| !(s.is_finite() && (0.0..=1.0).contains(*s)))
    {
        return Err(ModelCallError::MalformedResponse(format!(
            "{} score out of range: {}",
            criterion, score
        )));
    }
    Ok(FixVerification {
        addressed: wire.addressed,
        rationale: wire.rationale.trim().to_string(),
        criterion_scores,
        tokens_used,
    })
}

/// Strip a fence around a whole section reply; an empty reply is malformed
pub fn clean_section_text(raw: &str) -> Result<String, ModelCallError> {
    let text = match FENCED_REPLY.captures(raw) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => raw,
    };
    let text = text.trim();
    if text.is_empty() {
        return Err(ModelCallError::MalformedResponse("empty section text".into()));
    }
    Ok(text.to_string())
}

fn parse_wire<T: DeserializeOwned>(raw: &str) -> Result<T, ModelCallError> {
    let json = extract_json_block(raw)
        .ok_or_else(|| ModelCallError::MalformedResponse("no JSON object in reply".into()))?;
    serde_json::from_str(json).map_err(|e| ModelCallError::MalformedResponse(e.to_string()))
}

/// Try to extract a JSON block from a response that may contain surrounding text.
fn extract_json_block(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let json_start = start + 7;
        if let Some(end) = text[json_start..].find("```") {
            return Some(text[json_start..json_start + end].trim());
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

fn issue_from_wire(wire: IssueWire, model_id: &str) -> Result<TargetedIssue, ModelCallError> {
    let criterion: Criterion = enum_value("criterion", &normalize(&wire.criterion))?;
    let severity: Severity = enum_value("severity", &wire.severity.to_ascii_lowercase())?;
    if wire.fix_instructions.trim().is_empty() {
        return Err(ModelCallError::MalformedResponse(
            "issue without fix_instructions".into(),
        ));
    }

    let section_id = wire
        .section_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let mut issue = TargetedIssue::new(criterion, severity, section_id, wire.fix_instructions)
        .from_rater(model_id);
    if let Some(action) = wire.fix_action {
        let action: FixAction = enum_value("fix_action", &action.to_ascii_uppercase())?;
        issue = issue.with_fix_action(action);
    }
    if wire.structural {
        issue = issue.structural();
    }
    for anchor in wire.context_anchors {
        issue = issue.with_anchor(anchor);
    }
    Ok(issue)
}

fn criterion_scores(raw: BTreeMap<String, f64>) -> Result<CriterionScores, ModelCallError> {
    raw.into_iter()
        .map(|(name, score)| Ok((enum_value("criterion", &normalize(&name))?, score)))
        .collect()
}

/// Reuse the core enums' serde names as the accepted vocabulary
fn enum_value<T: DeserializeOwned>(field: &str, raw: &str) -> Result<T, ModelCallError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).map_err(|_| {
        ModelCallError::MalformedResponse(format!("unknown {}: {}", field, raw))
    })
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace([' ', '-'], "_")
}
