//! CLI entry point for the causelist tool.

use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use causelist_core::config::EngineConfig;
use causelist_core::session::webdriver::WebDriverBrowser;
use causelist_core::{
    DirectorySink, DocumentSink, JobStatus, RetrievalOrchestrator, RetrievalOutcome,
};
use clap::Parser;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;
mod exit;
mod progress;

use cli::Args;
use exit::outcome_exit;

/// Applies command-line overrides on top of the loaded config.
fn apply_overrides(config: &mut EngineConfig, args: &Args) -> Result<()> {
    if let Some(max_retries) = args.max_retries {
        config.retry.max_attempts = max_retries;
    }
    if let Some(workers) = args.workers {
        config.limits.download_workers =
            usize::try_from(workers).context("--workers out of range")?;
    }
    if let Some(sessions) = args.sessions {
        config.limits.max_sessions = usize::try_from(sessions).context("--sessions out of range")?;
    }
    if let Some(url) = &args.webdriver_url {
        config.browser.webdriver_url.clone_from(url);
    }
    if args.headful {
        config.browser.headless = false;
    }
    Ok(())
}

fn print_summary(outcome: &RetrievalOutcome) {
    println!(
        "Saved {} document(s), {} failed, {} duplicate(s) skipped across {} search(es) and {} page(s)",
        outcome.succeeded().len(),
        outcome.failed().len(),
        outcome.duplicates_skipped(),
        outcome.searches_run(),
        outcome.pages_visited(),
    );
    for failed in outcome.failed() {
        println!("  failed: {} ({})", failed.key, failed.failure);
    }
    match outcome.status() {
        JobStatus::Completed => {}
        JobStatus::Cancelled => println!("Cancelled before completion"),
        JobStatus::Aborted { stage, reason } => println!("Aborted during {stage}: {reason}"),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = EngineConfig::load(args.config.as_deref())?;
    if let Some(path) = &loaded.path {
        info!(path = %path.display(), "loaded config");
    }
    let mut config = loaded.config;
    apply_overrides(&mut config, &args)?;

    let query = args
        .query_request()
        .into_query()
        .context("invalid query")?;

    let driver = Arc::new(WebDriverBrowser::new(config.browser.clone()));
    let orchestrator = RetrievalOrchestrator::new(&config, driver)?;
    orchestrator
        .validate_query(&query)
        .context("invalid query")?;

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("cannot create output directory {}", args.output.display()))?;
    let sink: Arc<dyn DocumentSink> = Arc::new(DirectorySink::new(&args.output));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after in-flight downloads");
            interrupt.cancel();
        }
    });

    let (events, receiver) = broadcast::channel(256);
    let use_spinner = !args.quiet && io::stderr().is_terminal();
    let ui = progress::spawn_progress_ui(use_spinner, args.quiet, receiver);

    info!(%query, output = %args.output.display(), "retrieval starting");
    let job_id = orchestrator.allocate_job_id();
    let outcome = orchestrator
        .run_job(job_id, query, sink, &cancel, Some(events))
        .await;

    if let Err(error) = ui.await {
        warn!(%error, "progress display failed");
    }
    orchestrator.pool().close();

    if !args.quiet {
        print_summary(&outcome);
    }
    let exit = outcome_exit(&outcome);
    debug!(?exit, code = exit.code(), "exiting");
    Ok(exit.into())
}
