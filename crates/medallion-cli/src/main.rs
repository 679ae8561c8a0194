mod display;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use medallion_core::{
    Aggregator, BoundaryStore, Deduplicator, EmptyBatchPolicy, Reconciler, RunReport, Tier,
    Transform,
};
use medallion_store::{DuckStore, IngestOutcome};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "medallion")]
#[command(about = "Incremental bronze → silver → gold reconciliation over DuckDB")]
#[command(version)]
struct Cli {
    /// DuckDB database file
    #[arg(long, global = true, env = "MEDALLION_DB", default_value = "medallion.duckdb")]
    db: PathBuf,

    /// What to do with a pending batch that has no rows: revisit or settle
    #[arg(long, global = true, env = "MEDALLION_EMPTY_BATCH", default_value = "revisit")]
    empty_batch: EmptyBatchPolicy,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database file and tier layout
    Init,
    /// Load CSV files into bronze, one batch per file
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Reconcile bronze into silver (deduplicate)
    Silver,
    /// Reconcile silver into gold (aggregate)
    Gold,
    /// Reconcile silver then gold
    Run,
    /// Show tier sizes and pending markers per boundary
    Status,
    /// Write a tier to a Parquet file
    Export {
        /// bronze, silver or gold
        #[arg(long)]
        tier: Tier,
        #[arg(long)]
        out: PathBuf,
    },
}

/// Settings shared by every command, resolved once from args and env.
#[derive(Debug, Clone)]
struct PipelineConfig {
    db: PathBuf,
    empty_batch: EmptyBatchPolicy,
    json: bool,
}

impl From<&Cli> for PipelineConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            db: cli.db.clone(),
            empty_batch: cli.empty_batch,
            json: cli.json,
        }
    }
}

impl PipelineConfig {
    fn open_store(&self) -> Result<DuckStore> {
        DuckStore::open_persistent(&self.db)
            .with_context(|| format!("failed to open store at {}", self.db.display()))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from(&cli);
    tracing::debug!(?config, "medallion v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Init => cmd_init(&config),
        Command::Ingest { files } => cmd_ingest(&config, &files),
        Command::Silver => {
            let store = config.open_store()?;
            let report = reconcile(&store, Deduplicator, &config)?;
            emit_reports(&config, &[report])
        }
        Command::Gold => {
            let store = config.open_store()?;
            let report = reconcile(&store, Aggregator, &config)?;
            emit_reports(&config, &[report])
        }
        Command::Run => {
            let store = config.open_store()?;
            let silver = reconcile(&store, Deduplicator, &config)?;
            let gold = reconcile(&store, Aggregator, &config)?;
            emit_reports(&config, &[silver, gold])
        }
        Command::Status => cmd_status(&config),
        Command::Export { tier, out } => cmd_export(&config, tier, &out),
    }
}

// ── Commands ──

fn cmd_init(config: &PipelineConfig) -> Result<()> {
    let store = config.open_store()?;
    let status = store.status().context("failed to read store status")?;
    if config.json {
        display::print_json(&status)
    } else {
        println!("Store ready at {}", config.db.display());
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct IngestLine {
    file: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<IngestOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Each file is its own unit of work; one bad file does not stop the rest.
fn cmd_ingest(config: &PipelineConfig, files: &[PathBuf]) -> Result<()> {
    let store = config.open_store()?;
    let mut lines = Vec::with_capacity(files.len());
    let mut failed = 0;

    for path in files {
        let result = store
            .ingest_csv(path)
            .with_context(|| format!("failed to ingest {}", path.display()));
        match result {
            Ok(outcome) => {
                if !config.json {
                    display::print_ingest(path, &outcome);
                }
                lines.push(IngestLine {
                    file: path.clone(),
                    outcome: Some(outcome),
                    error: None,
                });
            }
            Err(e) => {
                warn!(file = %path.display(), error = %format!("{e:#}"), "ingest failed");
                failed += 1;
                if !config.json {
                    display::print_ingest_failure(path, &e);
                }
                lines.push(IngestLine {
                    file: path.clone(),
                    outcome: None,
                    error: Some(format!("{e:#}")),
                });
            }
        }
    }

    if config.json {
        display::print_json(&lines)?;
    }
    if failed > 0 {
        bail!("{failed} of {} files failed to ingest", files.len());
    }
    Ok(())
}

fn reconcile<T>(store: &DuckStore, transform: T, config: &PipelineConfig) -> Result<RunReport>
where
    T: Transform,
    DuckStore: BoundaryStore<T::Input, T::Output>,
{
    let report = Reconciler::new(store, transform)
        .with_empty_policy(config.empty_batch)
        .run()
        .with_context(|| format!("{} run aborted", T::BOUNDARY))?;
    Ok(report)
}

/// Partial failure is a normal outcome: failed markers are retried by the
/// next run, so it is reported but does not change the exit status.
fn emit_reports(config: &PipelineConfig, reports: &[RunReport]) -> Result<()> {
    for report in reports {
        if display::has_failures(report) {
            warn!(boundary = %report.boundary, status = %report.status(), "run finished with failures");
        } else {
            info!(boundary = %report.boundary, status = %report.status(), "run finished");
        }
    }
    if config.json {
        return display::print_json(reports);
    }
    for report in reports {
        display::print_run(report);
    }
    Ok(())
}

fn cmd_status(config: &PipelineConfig) -> Result<()> {
    let store = config.open_store()?;
    let status = store.status().context("failed to read store status")?;
    if config.json {
        display::print_json(&status)
    } else {
        display::print_status(&status);
        Ok(())
    }
}

fn cmd_export(config: &PipelineConfig, tier: Tier, out: &Path) -> Result<()> {
    let store = config.open_store()?;
    let rows = store
        .export_tier(tier, out)
        .with_context(|| format!("failed to export {tier} to {}", out.display()))?;
    if config.json {
        display::print_json(&serde_json::json!({
            "tier": tier,
            "path": out,
            "rows": rows,
        }))
    } else {
        println!("Exported {rows} {tier} rows to {}", out.display());
        Ok(())
    }
}
