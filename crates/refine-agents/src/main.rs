use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};

use refine_agents::{build_collaborators, parse, prompts, spawn_event_logger, AgentsConfig};
use refinement::{
    ContentSpec, Document, EventBus, IterationController, OperationMode, RefinementConfig,
    RefinementOutcome,
};

#[derive(Parser)]
#[command(name = "refine-agents")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cascade evaluation and targeted refinement of lesson content", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one refinement session over a lesson
    Run {
        /// Lesson document (JSON: {"sections": [{"id", "title", "body"}]})
        #[arg(short, long)]
        document: PathBuf,

        /// Content spec (JSON: title, objectives, audience, required_sections)
        #[arg(short, long)]
        spec: PathBuf,

        /// TOML config with session settings and model endpoints.
        /// Without it, REFINE_* environment variables are used.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the configured operation mode
        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,

        /// Where to write the outcome JSON (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Append every progress event to this JSONL file
        #[arg(long)]
        events: Option<PathBuf>,
    },

    /// Print the JSON schemas judges and the delta judge must answer with
    Schema,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    SemiAuto,
    FullAuto,
}

impl From<ModeArg> for OperationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::SemiAuto => OperationMode::SemiAuto,
            ModeArg::FullAuto => OperationMode::FullAuto,
        }
    }
}

/// Outcome plus provenance, as written to disk
#[derive(Serialize)]
struct RunReport<'a> {
    prompt_version: &'static str,
    finished_at: DateTime<Utc>,
    events_observed: usize,
    outcome: &'a RefinementOutcome,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            document,
            spec,
            config,
            mode,
            output,
            events,
        } => run(&document, &spec, config.as_deref(), mode, output.as_deref(), events).await,
        Commands::Schema => {
            println!("# Judge verdict\n{}", parse::VERDICT_SCHEMA.as_str());
            println!("\n# Fix verification\n{}", parse::FIX_SCHEMA.as_str());
            Ok(())
        }
    }
}

async fn run(
    document_path: &Path,
    spec_path: &Path,
    config_path: Option<&Path>,
    mode: Option<ModeArg>,
    output: Option<&Path>,
    events_path: Option<PathBuf>,
) -> Result<()> {
    let document: Document = read_json(document_path)?;
    let spec: ContentSpec = read_json(spec_path)?;

    let (mut config, agents) = match config_path {
        Some(path) => (
            RefinementConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            AgentsConfig::load(path)?,
        ),
        None => (
            RefinementConfig::from_env().context("Invalid REFINE_* environment")?,
            AgentsConfig::from_env()?,
        ),
    };
    if let Some(mode) = mode {
        config.mode = mode.into();
    }

    info!(
        document = %document_path.display(),
        sections = document.sections.len(),
        words = document.word_count(),
        mode = %config.mode,
        prompt_version = prompts::PROMPT_VERSION,
        "Refinement run starting"
    );

    let collaborators = build_collaborators(&agents)?;
    let bus = EventBus::new().shared();
    let logger = spawn_event_logger(&bus, events_path);
    let controller = IterationController::new(&config, collaborators, bus.clone())
        .context("Failed to configure refinement session")?;

    let outcome = match controller.run(document, &spec).await {
        Ok(outcome) => outcome,
        Err(e) => {
            logger.abort();
            return Err(e).context("Refinement session failed");
        }
    };
    drop(controller);
    drop(bus);
    let summary = logger.await.unwrap_or_default();

    if outcome.human_review_required {
        warn!(
            session_id = %outcome.session_id,
            reason = %outcome.stop_reason,
            unresolved = outcome.unresolved_issues.len(),
            "Session escalated for human review"
        );
    }
    info!(
        session_id = %outcome.session_id,
        status = %outcome.status,
        score = outcome.final_score,
        quality = %outcome.quality_status,
        iterations = outcome.iterations_used,
        tokens = outcome.tokens_used,
        "Refinement run finished"
    );

    let report = RunReport {
        prompt_version: prompts::PROMPT_VERSION,
        finished_at: Utc::now(),
        events_observed: summary.events,
        outcome: &outcome,
    };
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize outcome")?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}
