use anyhow::{Context, Result};
use clap::Parser;
use fanout_core::{CancellationToken, Execution, NodeReport, NodeStatus, RunId, Status};
use serde::Serialize;
use std::path::PathBuf;
use tokio::time::Instant;

mod config;
mod pipeline;

use config::FanoutConfig;
use pipeline::DocumentAnalysis;

#[derive(Parser, Debug)]
#[command(name = "fanout")]
#[command(about = "Document analysis pipeline on the fanout workflow engine", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "fanout.toml")]
    config: PathBuf,

    /// Number of pages to analyze (overrides the config file)
    #[arg(short, long, env = "FANOUT_PAGES")]
    pages: Option<usize>,

    /// Page analyses allowed to run at once (overrides the config file)
    #[arg(short = 'j', long, env = "FANOUT_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Include per-page results in the output
    #[arg(long)]
    results: bool,
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    run_id: RunId,
    status: Status,
    error: Option<String>,
    elapsed_ms: u64,
    pages: usize,
    pages_completed: usize,
    max_concurrency: usize,
    skipped: usize,
    nodes: &'a [NodeReport],
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<&'a DocumentAnalysis>,
}

impl<'a> RunSummary<'a> {
    fn new(
        execution: &'a Execution<DocumentAnalysis>,
        config: &FanoutConfig,
        elapsed_ms: u64,
        with_results: bool,
    ) -> Self {
        Self {
            run_id: execution.run_id,
            status: execution.status,
            error: execution.error.as_ref().map(|e| e.to_string()),
            elapsed_ms,
            pages: config.pages,
            pages_completed: execution.data.pages_completed(),
            max_concurrency: config.max_concurrency,
            skipped: execution.count(NodeStatus::Skipped),
            nodes: &execution.nodes,
            results: with_results.then_some(&execution.data),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fanout=info".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = FanoutConfig::load(&args.config)?
        .with_overrides(args.pages, args.max_concurrency)
        .context("Invalid configuration")?;

    tracing::info!(
        "Analyzing document: pages={}, max_concurrency={}",
        config.pages,
        config.max_concurrency
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let started = Instant::now();
    let execution =
        pipeline::analyze_document(cancel, &config, pipeline::synthetic_pages(config.pages))
            .await?;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let summary = RunSummary::new(&execution, &config, elapsed_ms, args.results);
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialize run summary")?
    );

    if let Some(e) = execution.error {
        return Err(anyhow::Error::from(e).context("Document analysis failed"));
    }

    Ok(())
}
