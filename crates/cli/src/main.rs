//! `issue-sync` entry point.
//!
//! This binary is the composition root. It:
//!
//! 1. loads and validates the TOML configuration,
//! 2. installs the tracing subscriber (and the OTLP exporter when configured),
//! 3. builds the HTTP transport and the stdout record writer,
//! 4. runs reconciliation cycles on the configured schedule, or once with
//!    `--once`.
//!
//! Emitted records are written to stdout as JSON lines. Logs go to stderr.

mod config;
mod observability;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use pipeline::{ChannelSink, Reconciler};
use transport::ReqwestTransport;
use trigger::Trigger;

use crate::config::AppConfig;
use crate::observability::LogFormat;

/// Mirrors issue-tracker issues and their lead-time records into a document
/// store's ingestion stream.
#[derive(Debug, Parser)]
#[command(name = "issue-sync", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "ISSUE_SYNC_CONFIG", default_value = "issue-sync.toml")]
    config: PathBuf,

    /// Tracker API token. Overrides `tracker.token` from the file.
    #[arg(long, env = "ISSUE_SYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Run a single cycle immediately and exit, ignoring the schedule.
    #[arg(long)]
    once: bool,

    /// Log line encoding on stderr.
    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let telemetry = observability::init(cli.log_format)?;

    let result = run(cli).await;
    if let Err(error) = &result {
        error!(error = format!("{error:#}"), "issue-sync stopped with an error");
    }

    telemetry.shutdown();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = AppConfig::load(&cli.config)
        .and_then(|config| config.into_settings(cli.token))
        .with_context(|| format!("invalid configuration in {}", cli.config.display()))?;
    info!(
        config = %cli.config.display(),
        schedule = settings.schedule.kind(),
        tracker = %settings.endpoints.tracker.base_url,
        document_store = %settings.endpoints.document_store.base_url,
        "configuration loaded"
    );

    let transport = ReqwestTransport::new(&settings.endpoints, settings.timeout)
        .context("failed to build HTTP client")?;
    let (sink, records) = ChannelSink::new();
    let writer = tokio::spawn(output::forward_json_lines(records, tokio::io::stdout()));

    let reconciler = Arc::new(Reconciler::new(
        Arc::new(transport),
        Arc::new(sink),
        settings.reconcile,
    ));

    if cli.once {
        let report = reconciler.run_cycle().await;
        info!(?report, "cycle finished");
    } else {
        let cycles = Arc::clone(&reconciler);
        Trigger::new(settings.schedule)
            .run(
                move || {
                    let reconciler = Arc::clone(&cycles);
                    async move {
                        let report = reconciler.run_cycle().await;
                        info!(?report, "cycle finished");
                    }
                },
                shutdown_signal(),
            )
            .await;
    }

    // Dropping the last sink handle closes the channel and lets the writer drain.
    drop(reconciler);
    let written = writer
        .await
        .context("record writer panicked")?
        .context("failed to write records to stdout")?;
    info!(records = written, "record stream closed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for ctrl-c; running until the schedule is exhausted");
        std::future::pending::<()>().await;
    }
}
