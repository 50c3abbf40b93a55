//! sentiwiz - headless wizard driver
//!
//! Runs the full Sentiwiz flow from the command line: ensure the local
//! runtime is ready, pick a model, import a spreadsheet, classify the
//! selected column, and write the two-column result file. A GUI front
//! end wires the same core the same way; this binary doubles as a smoke
//! test of the whole pipeline.

use anyhow::{bail, Context, Result};
use clap::Parser;
use sentiwiz_common::config::Preferences;
use sentiwiz_common::events::{
    DownloadState, EventBus, InstallPhase, PipelineStatus, Sentiment, WizardEvent,
};
use sentiwiz_core::models::analysis::AnalysisItem;
use sentiwiz_core::services::flow::FlowController;
use sentiwiz_core::services::ollama::OllamaClient;
use sentiwiz_core::services::pipeline::ClassificationPipeline;
use sentiwiz_core::services::runtime::RuntimeManager;
use sentiwiz_core::services::tabular::TabularReader;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sentiwiz", about = "Classify spreadsheet comments with a local model")]
struct Args {
    /// Spreadsheet to analyze (.csv or .xlsx)
    file: PathBuf,

    /// Column header name (or zero-based index) holding the comments
    #[arg(long)]
    column: Option<String>,

    /// Model identifier; defaults to the remembered or first available model
    #[arg(long)]
    model: Option<String>,

    /// Extra free-text context embedded in every prompt
    #[arg(long)]
    context: Option<String>,

    /// Output CSV path
    #[arg(long, default_value = "results.csv")]
    output: PathBuf,

    /// Consent to installing the runtime via Homebrew without prompting
    #[arg(long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    info!("Starting sentiwiz");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let prefs_path = Preferences::default_path();
    let mut prefs = Preferences::load(&prefs_path);

    let bus = EventBus::new(256);
    spawn_event_logger(&bus);

    let client = OllamaClient::new();
    let runtime = Arc::new(RuntimeManager::with_client(client.clone(), bus.clone()));
    let pipeline = ClassificationPipeline::new(Arc::new(client), bus.clone());
    let mut flow = FlowController::new(bus.clone());

    // Runtime readiness (with the Homebrew consent gate)
    let mut phase = runtime.ensure_ready().await;
    if phase == InstallPhase::AwaitingUserDecision {
        if args.yes {
            info!("Installing the runtime via Homebrew (--yes)");
        } else {
            info!("Homebrew install declined; falling back to the direct installer");
        }
        phase = runtime.resolve_install_decision(args.yes).await;
    }
    if phase != InstallPhase::Ready {
        let state = runtime.snapshot();
        bail!(
            "Runtime setup failed: {}",
            state.last_error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    flow.advance(true); // Welcome -> ModelSelection (setup skipped)

    // Model selection
    let available = runtime.snapshot().available_models;
    let model = args
        .model
        .clone()
        .or_else(|| prefs.last_model.clone())
        .or_else(|| available.first().cloned())
        .context("No model available; pass --model to pull one")?;

    if !available.contains(&model) {
        info!(model = %model, "Model not present locally, pulling");
        match runtime.download_model(&model).await {
            DownloadState::Succeeded => {
                runtime.refresh_models().await;
            }
            state => bail!("Model download ended in state {:?}", state),
        }
    }
    flow.advance(true); // -> FileImport

    // File import and column selection
    let dataset = TabularReader::read_header_and_preview(&args.file)
        .with_context(|| format!("Could not import {}", args.file.display()))?;
    info!(
        columns = ?dataset.columns,
        preview_rows = dataset.preview_rows.len(),
        "Imported {}",
        args.file.display()
    );
    flow.advance(true); // -> ColumnSelection

    let column_arg = args.column.clone().or_else(|| prefs.last_column.clone());
    let (column_index, column_name) = resolve_column(&dataset.columns, column_arg.as_deref())?;
    let values = TabularReader::extract_column(&args.file, column_index)?;
    if values.is_empty() {
        bail!("Column '{}' has no non-empty values", column_name);
    }
    info!(column = %column_name, items = values.len(), "Column extracted");

    let items: Vec<AnalysisItem> = values
        .into_iter()
        .enumerate()
        .map(|(index, text)| AnalysisItem { index, text })
        .collect();

    // Analysis
    flow.advance(true); // -> AnalysisProgress
    let mut rx = bus.subscribe();
    pipeline
        .start(items, model.clone(), args.context.clone())
        .await;

    loop {
        match rx.recv().await {
            Ok(WizardEvent::AnalysisStateChanged { status, .. })
                if status != PipelineStatus::Running =>
            {
                if status != PipelineStatus::Completed {
                    bail!("Analysis ended in state {:?}", status);
                }
                break;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => bail!("Event bus closed during analysis"),
        }
    }
    flow.advance(true); // -> ResultsSummary

    // Summary and export
    let run = pipeline.snapshot();
    let count = |s: Sentiment| run.results.iter().filter(|r| r.sentiment == s).count();
    info!(
        total = run.results.len(),
        positive = count(Sentiment::Positive),
        negative = count(Sentiment::Negative),
        mixed = count(Sentiment::Mixed),
        neutral = count(Sentiment::Neutral),
        "Analysis complete"
    );

    sentiwiz_core::export::write_results_csv(&args.output, &run.results)
        .with_context(|| format!("Could not write {}", args.output.display()))?;
    info!("Results written to {}", args.output.display());

    prefs.last_file = Some(args.file.display().to_string());
    prefs.last_column = Some(column_name);
    prefs.last_model = Some(model);
    if let Err(e) = prefs.save(&prefs_path) {
        tracing::warn!(error = %e, "Could not save preferences");
    }

    Ok(())
}

/// Resolve a column selector (header name or numeric index) against the
/// imported header row; defaults to the first column
fn resolve_column(columns: &[String], selector: Option<&str>) -> Result<(usize, String)> {
    let Some(selector) = selector else {
        let first = columns.first().context("File has no columns")?;
        return Ok((0, first.clone()));
    };

    if let Some(index) = columns.iter().position(|c| c == selector) {
        return Ok((index, selector.to_string()));
    }
    if let Ok(index) = selector.parse::<usize>() {
        if let Some(name) = columns.get(index) {
            return Ok((index, name.clone()));
        }
    }
    bail!(
        "Column '{}' not found; available columns: {}",
        selector,
        columns.join(", ")
    )
}

/// Mirror wizard events into the log so a headless run stays observable
fn spawn_event_logger(bus: &EventBus) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(WizardEvent::InstallPhaseChanged { phase, message, .. }) => {
                    info!(?phase, "{}", message);
                }
                Ok(WizardEvent::InstallProgress { message, .. }) => {
                    tracing::debug!("{}", message);
                }
                Ok(WizardEvent::ModelDownloadProgress {
                    completed, total, message, ..
                }) => {
                    tracing::debug!(?completed, ?total, "{}", message);
                }
                Ok(WizardEvent::ModelDownloadFinished { model, state, .. }) => {
                    info!(model = %model, ?state, "Model download finished");
                }
                Ok(WizardEvent::AnalysisProgress { message, .. }) => {
                    info!("{}", message);
                }
                Ok(WizardEvent::StageChanged { new_stage, .. }) => {
                    tracing::debug!(?new_stage, "Stage changed");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
