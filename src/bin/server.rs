//! HTTP service entry point: accepts retrieval jobs and serves their documents.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use causelist_core::RetrievalOrchestrator;
use causelist_core::api::{AppState, DEFAULT_KEEP_FINISHED, create_router};
use causelist_core::config::EngineConfig;
use causelist_core::session::webdriver::WebDriverBrowser;
use clap::Parser;
use tracing::info;

/// Serve cause-list retrieval jobs over HTTP.
#[derive(Parser, Debug)]
#[command(name = "causelist-server")]
#[command(author, version, about)]
struct ServerArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Config file (defaults to ~/.config/causelist/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Finished jobs to keep, with their documents, before the oldest are dropped
    #[arg(long, default_value_t = DEFAULT_KEEP_FINISHED)]
    keep_jobs: usize,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let loaded = EngineConfig::load(args.config.as_deref())?;
    let config = loaded.config;
    let driver = Arc::new(WebDriverBrowser::new(config.browser.clone()));
    let orchestrator = Arc::new(RetrievalOrchestrator::new(&config, driver)?);
    let app = create_router(AppState::with_job_retention(
        Arc::clone(&orchestrator),
        args.keep_jobs,
    ));

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("cannot bind {}", args.bind))?;
    info!(addr = %args.bind, max_sessions = config.limits.max_sessions, "causelist server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.pool().close();
    Ok(())
}
