//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use refinement::config::{OperationMode, RefinementConfig};
use refinement::state::{
    Confidence, ContentSpec, ContextWindow, Criterion, Document, FixVerification, GeneratedText,
    JudgeVerdict, Recommendation, Rubric, Section, SectionRefinementTask, SectionSpec, Severity,
    TargetedIssue,
};
use refinement::{
    Collaborators, FixVerifier, JudgePanel, ModelCallError, Patcher, SectionRegenerator,
    SharedJudge,
};
use refinement::Judge;

const SENTENCES: [&str; 4] = [
    "Plants capture light energy in their green leaves.",
    "Chlorophyll absorbs red and blue light from the sun.",
    "Water and carbon dioxide become sugar and oxygen.",
    "For example, a bean plant on a sunny window grows toward the light.",
];

/// Route session logs to the test harness; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Plain prose of at least `words` words
pub fn body(words: usize) -> String {
    let mut text = Vec::new();
    let mut count = 0;
    let mut i = 0;
    while count < words {
        let sentence = SENTENCES[i % SENTENCES.len()];
        count += sentence.split_whitespace().count();
        text.push(sentence);
        i += 1;
    }
    text.join(" ")
}

/// Lesson with sections `s1..=sN`
pub fn lesson(sections: usize, words_per_section: usize) -> Document {
    Document::new(
        (1..=sections)
            .map(|i| {
                Section::new(
                    format!("s{}", i),
                    format!("Part {}", i),
                    body(words_per_section),
                )
            })
            .collect(),
    )
}

pub fn spec() -> ContentSpec {
    ContentSpec {
        title: "Photosynthesis".to_string(),
        objectives: vec!["Explain how plants make food from light".to_string()],
        audience: "grade 7".to_string(),
        required_sections: Vec::new(),
    }
}

pub fn rubric() -> Rubric {
    Rubric::from_spec(&spec(), 0.85)
}

/// Defaults with millisecond retry backoff
pub fn fast_config(mode: OperationMode) -> RefinementConfig {
    let mut config = RefinementConfig {
        mode,
        ..Default::default()
    };
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 2;
    config.retry.call_timeout = Duration::from_secs(5);
    config
}

pub fn verdict(
    score: f64,
    confidence: Confidence,
    recommendation: Recommendation,
    issues: Vec<TargetedIssue>,
) -> JudgeVerdict {
    let per_criterion_scores = Criterion::ALL
        .iter()
        .map(|c| {
            let s = if *c == Criterion::PedagogicalStructure {
                0.8
            } else {
                score
            };
            (*c, s)
        })
        .collect();
    JudgeVerdict {
        model_id: String::new(),
        overall_score: score,
        per_criterion_scores,
        section_scores: Default::default(),
        confidence,
        issues,
        recommendation,
        tokens_used: 100,
    }
}

pub fn clarity_issue(section: &str) -> TargetedIssue {
    TargetedIssue::new(
        Criterion::ClarityReadability,
        Severity::Minor,
        Some(section),
        "Shorten the long sentences",
    )
}

pub fn transport_error() -> ModelCallError {
    ModelCallError::Transport("connection refused".to_string())
}

/// Judge that replays a script; the last entry repeats once the script runs out
pub struct ScriptedJudge {
    id: String,
    script: Mutex<VecDeque<Result<JudgeVerdict, ModelCallError>>>,
    last: Mutex<Option<Result<JudgeVerdict, ModelCallError>>>,
    calls: AtomicUsize,
}

impl ScriptedJudge {
    pub fn new(id: &str, script: Vec<Result<JudgeVerdict, ModelCallError>>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(id: &str) -> Arc<Self> {
        Self::new(id, vec![Err(transport_error())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    fn model_id(&self) -> &str {
        &self.id
    }

    async fn evaluate(
        &self,
        _content: &Document,
        _rubric: &Rubric,
    ) -> Result<JudgeVerdict, ModelCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(response) => {
                *last = Some(response.clone());
                response
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(ModelCallError::Transport("script exhausted".into()))),
        }
    }
}

/// Primary plus two agreeing voters, one scripted entry per iteration.
///
/// The primary answers with medium confidence so every evaluation reaches
/// the voting stage, where the identical voters settle unanimously.
pub struct SessionPanel {
    pub primary: Arc<ScriptedJudge>,
    pub voter_a: Arc<ScriptedJudge>,
    pub voter_b: Arc<ScriptedJudge>,
}

impl SessionPanel {
    pub fn new(rounds: Vec<(f64, Vec<TargetedIssue>)>) -> Self {
        let script = |confidence: Confidence| -> Vec<Result<JudgeVerdict, ModelCallError>> {
            rounds
                .iter()
                .map(|(score, issues)| {
                    Ok(verdict(
                        *score,
                        confidence,
                        Recommendation::Refine,
                        issues.clone(),
                    ))
                })
                .collect()
        };
        Self {
            primary: ScriptedJudge::new("primary", script(Confidence::Medium)),
            voter_a: ScriptedJudge::new("voter-a", script(Confidence::High)),
            voter_b: ScriptedJudge::new("voter-b", script(Confidence::High)),
        }
    }

    pub fn panel(&self) -> JudgePanel {
        JudgePanel {
            primary: self.primary.clone(),
            voters: vec![
                self.voter_a.clone() as SharedJudge,
                self.voter_b.clone() as SharedJudge,
            ],
            tiebreaker: None,
        }
    }
}

/// Appends one sentence to the target section
#[derive(Default)]
pub struct RecordingPatcher {
    pub calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub delay: Option<Duration>,
}

impl RecordingPatcher {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn calls_for(&self, section_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == section_id)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Patcher for RecordingPatcher {
    async fn apply_fix(
        &self,
        task: &SectionRefinementTask,
        context: &ContextWindow,
    ) -> Result<GeneratedText, ModelCallError> {
        self.calls.lock().unwrap().push(task.section_id.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(GeneratedText {
            text: format!("{} This point is now stated plainly.", context.target.body),
            tokens_used: 50,
        })
    }
}

/// Rewrites the section body with a marker prefix
#[derive(Default)]
pub struct RecordingRegenerator {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl SectionRegenerator for RecordingRegenerator {
    async fn regenerate_section(
        &self,
        spec: &SectionSpec,
        context: &ContextWindow,
    ) -> Result<GeneratedText, ModelCallError> {
        self.calls.lock().unwrap().push(spec.section_id.clone());
        Ok(GeneratedText {
            text: format!("Rewritten. {}", context.target.body),
            tokens_used: 80,
        })
    }
}

/// Delta judge replaying a script; repeats the last answer, default "addressed"
pub struct ScriptedFixVerifier {
    script: Mutex<VecDeque<FixVerification>>,
    last: Mutex<FixVerification>,
    pub calls: AtomicUsize,
}

impl ScriptedFixVerifier {
    pub fn new(script: Vec<FixVerification>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(addressed()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always_addressed() -> Arc<Self> {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl FixVerifier for ScriptedFixVerifier {
    async fn verify_fix(
        &self,
        _issue: &TargetedIssue,
        _before: &str,
        _after: &str,
    ) -> Result<FixVerification, ModelCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(answer) = next {
            *last = answer;
        }
        Ok(last.clone())
    }
}

pub fn addressed() -> FixVerification {
    FixVerification {
        addressed: true,
        rationale: "issue resolved".to_string(),
        criterion_scores: Default::default(),
        tokens_used: 10,
    }
}

pub fn collaborators(
    panel: JudgePanel,
    patcher: Arc<RecordingPatcher>,
    regenerator: Arc<RecordingRegenerator>,
    fix_verifier: Arc<ScriptedFixVerifier>,
) -> Collaborators {
    Collaborators {
        judges: panel,
        patcher,
        regenerator,
        fix_verifier,
    }
}
