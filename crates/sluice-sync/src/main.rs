//! sluice - run a reverse-ETL sync from a job file
//!
//! # Usage
//!
//! ```bash
//! # Extract and load once
//! sluice -c job.yaml run
//!
//! # Validate the job file
//! sluice -c job.yaml validate
//!
//! # Probe source and destination
//! sluice -c job.yaml check
//!
//! # List destination streams
//! sluice -c job.yaml discover
//!
//! # Infer the model's column types from its first row
//! sluice -c job.yaml schema
//!
//! # Map one source row without writing it
//! sluice -c job.yaml preview --row row.json
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sluice_sync::config::{DestinationSpec, JobConfig, LogFormat, SourceSpec};
use sluice_sync::connectors::{AirtableDestination, ProviderEmbeddingGenerator};
use sluice_sync::fingerprint::fingerprint;
use sluice_sync::model::{Catalog, CheckResult};
use sluice_sync::prelude::*;
use sluice_sync::schema::infer_model_schema;
use sluice_sync::types::Row;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(version, about = "Reverse-ETL sync runner")]
struct Cli {
    /// Path to the job file
    #[arg(short, long, default_value = "job.yaml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log output format (overrides the job file)
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger a run, extract it and load it
    Run,
    /// Validate the job file
    Validate,
    /// Check connectivity to the source and destination
    Check,
    /// List the destination's streams
    Discover,
    /// Infer the model's column types from its first row
    Schema,
    /// Transform one row and print the destination payload
    Preview {
        /// JSON file holding one source row
        #[arg(long)]
        row: PathBuf,
    },
    /// Print the effective schedule
    Cron,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let job = JobConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load job from {}", cli.config.display()))?;

    let format = match cli.log_format {
        Some(LogFormatArg::Json) => LogFormat::Json,
        Some(LogFormatArg::Pretty) => LogFormat::Pretty,
        None => job.logging.format,
    };
    init_logging(cli.verbose, &job.logging.level, format);

    match cli.command {
        Commands::Run => run(job).await,
        Commands::Validate => validate(&job),
        Commands::Check => check(&job).await,
        Commands::Discover => discover(&job).await,
        Commands::Schema => schema(&job).await,
        Commands::Preview { row } => preview(&job, &row).await,
        Commands::Cron => {
            match job.sync.schedule.cron_expression() {
                Some(cron) => println!("{cron}"),
                None => println!("manual"),
            }
            Ok(())
        }
    }
}

fn init_logging(verbose: bool, level: &str, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}

fn build_destination(job: &JobConfig) -> Result<Arc<dyn DestinationConnector>> {
    match &job.destination {
        DestinationSpec::Airtable(config) => Ok(Arc::new(
            AirtableDestination::new(config.clone()).context("Invalid airtable destination")?,
        )),
    }
}

#[cfg(feature = "mysql")]
fn build_source(job: &JobConfig) -> Result<Arc<dyn SourceConnector>> {
    use sluice_sync::connectors::MariaDbSource;
    match &job.source {
        SourceSpec::Mariadb(config) => Ok(Arc::new(
            MariaDbSource::new(config.clone()).context("Invalid mariadb source")?,
        )),
    }
}

#[cfg(not(feature = "mysql"))]
fn build_source(job: &JobConfig) -> Result<Arc<dyn SourceConnector>> {
    match &job.source {
        SourceSpec::Mariadb(_) => bail!("sluice was built without the `mysql` feature"),
    }
}

fn build_transformer() -> Arc<RecordTransformer> {
    Arc::new(RecordTransformer::new().with_embedder(Arc::new(ProviderEmbeddingGenerator::new())))
}

async fn run(job: JobConfig) -> Result<()> {
    let source = build_source(&job)?;
    let destination = build_destination(&job)?;

    let store = Arc::new(MemoryStore::new());
    let orchestrator = Arc::new(LocalOrchestrator::new());
    let reporter: Arc<dyn ErrorReporter> = Arc::new(TracingReporter);

    let catalog = destination
        .discover_schema()
        .await
        .context("Failed to discover destination streams")?;

    let lifecycle = SyncLifecycle::new(store.clone(), orchestrator.clone(), reporter.clone());
    let sync = lifecycle
        .create(job.sync.clone(), &catalog, destination.capabilities())
        .await
        .context("Sync definition rejected")?;
    let run = lifecycle.trigger_run(sync.id).await?;

    let workflow_id = sync.workflow_id();
    let interrupt = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(workflow_id = %workflow_id, "Interrupted, cancelling at next batch");
                if let Err(e) = orchestrator.cancel(&workflow_id).await {
                    warn!(error = %e, "Failed to cancel workflow");
                }
            }
        })
    };

    let extractor = IncrementalExtractor::new(
        store.clone(),
        orchestrator.clone(),
        reporter.clone(),
        build_transformer(),
    )
    .with_config(job.engine.extractor.clone());

    let outcome = extractor.read(run.id, source).await;
    interrupt.abort();

    match outcome.context("Extraction failed")? {
        ExtractOutcome::Skipped => {
            warn!(run_id = run.id, "Run was not extracted");
            return Ok(());
        }
        ExtractOutcome::Cancelled(stats) => {
            info!(run_id = run.id, rows = stats.total_query_rows, "Run cancelled");
            return Ok(());
        }
        ExtractOutcome::Completed(stats) => info!(
            run_id = run.id,
            rows = stats.total_query_rows,
            skipped = stats.skipped_rows,
            deleted = stats.deleted_rows,
            "Extraction finished"
        ),
    }

    match Loader::new(store, reporter)
        .load(run.id, destination)
        .await
        .context("Load failed")?
    {
        LoadOutcome::Completed(stats) => {
            info!(
                run_id = run.id,
                success = stats.success,
                failure = stats.failure,
                filtered = stats.filtered,
                "Run finished"
            );
            println!(
                "run {}: {} written, {} failed, {} filtered",
                run.id, stats.success, stats.failure, stats.filtered
            );
        }
        LoadOutcome::Skipped => warn!(run_id = run.id, "Run was not loaded"),
    }
    Ok(())
}

fn validate(job: &JobConfig) -> Result<()> {
    println!("Configuration is valid");
    println!("  sync:        {}", job.sync.model.name);
    println!("  stream:      {}", job.sync.stream_name);
    println!("  mappings:    {}", job.sync.mapping.len());
    println!(
        "  schedule:    {}",
        job.sync
            .schedule
            .cron_expression()
            .unwrap_or_else(|| "manual".into())
    );
    println!("  workers:     {}", job.engine.extractor.workers);
    Ok(())
}

fn print_check(label: &str, result: &CheckResult) {
    let status = if result.is_success() { "ok" } else { "FAILED" };
    println!("{label}: {status}");
    for detail in &result.checks {
        let mark = if detail.passed { "+" } else { "-" };
        match &detail.message {
            Some(message) => println!("  {mark} {}: {message}", detail.name),
            None => println!("  {mark} {}", detail.name),
        }
    }
    if let Some(message) = &result.message {
        println!("  {message}");
    }
}

async fn check(job: &JobConfig) -> Result<()> {
    let source = build_source(job)?;
    let destination = build_destination(job)?;

    let source_result = source.check_connection().await;
    let destination_result = destination.check_connection().await;
    print_check(source.name(), &source_result);
    print_check(destination.name(), &destination_result);

    if !(source_result.is_success() && destination_result.is_success()) {
        bail!("connection check failed");
    }
    Ok(())
}

async fn discover(job: &JobConfig) -> Result<()> {
    let destination = build_destination(job)?;
    let catalog: Catalog = destination
        .discover_schema()
        .await
        .context("Failed to discover destination streams")?;
    println!("{}", serde_json::to_string_pretty(&catalog)?);
    Ok(())
}

async fn schema(job: &JobConfig) -> Result<()> {
    let source = build_source(job)?;
    let schema = infer_model_schema(source.as_ref(), &job.sync.model)
        .await
        .context("Failed to sample the model query")?;
    if schema.is_empty() {
        println!("model '{}' returned no rows", job.sync.model.name);
    }
    for (column, kind) in &schema {
        println!("{column}: {kind}");
    }
    Ok(())
}

async fn preview(job: &JobConfig, row_path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(row_path)
        .with_context(|| format!("Failed to read {}", row_path.display()))?;
    let row: Row = serde_json::from_str(&content).context("Row file must hold a JSON object")?;

    let payload = build_transformer()
        .transform(&job.sync.mapping, &row)
        .await
        .context("Transformation failed")?;
    let output = serde_json::json!({
        "fingerprint": fingerprint(&payload),
        "payload": payload,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
