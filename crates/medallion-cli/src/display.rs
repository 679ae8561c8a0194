//! Human-readable and JSON rendering of command results.
//!
//! Everything here writes to stdout. Logs go to stderr, so `--json` output
//! can be piped straight into other tools.

use std::path::Path;

use medallion_core::{Boundary, MarkerOutcome, MarkerReport, MarkerState, RunReport, WriteMode};
use medallion_store::{IngestOutcome, StoreStatus};
use serde::Serialize;

/// Print any serializable value as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── Ingest ──

pub fn print_ingest(path: &Path, outcome: &IngestOutcome) {
    let name = path.display().to_string();
    match outcome {
        IngestOutcome::Ingested {
            marker,
            batch_id,
            rows,
        } => println!("  {name:<40} ingested {rows} rows as {marker} (batch {batch_id})"),
        IngestOutcome::AlreadyIngested => println!("  {name:<40} already ingested, skipped"),
        IngestOutcome::Empty => println!("  {name:<40} no rows, skipped"),
    }
}

pub fn print_ingest_failure(path: &Path, error: &anyhow::Error) {
    println!("  {:<40} failed: {error:#}", path.display().to_string());
}

// ── Reconciliation ──

/// One line per marker, then the run summary.
pub fn print_run(report: &RunReport) {
    println!("{} ({} mode)", report.boundary, mode_label(report));
    for marker in &report.markers {
        println!(
            "  [{:<11}] {}",
            marker.outcome.state().to_string(),
            marker_line(report.boundary, marker)
        );
    }
    println!(
        "  => {}, {} rows written",
        report.status(),
        report.rows_written()
    );
    println!();
}

/// Per-marker line; deduplication also reports how many rows it dropped.
fn marker_line(boundary: Boundary, marker: &MarkerReport) -> String {
    match (boundary, &marker.outcome) {
        (Boundary::BronzeToSilver, MarkerOutcome::Done { rows_in, rows_out, .. }) => {
            format!("{marker}, {} removed", rows_in.saturating_sub(*rows_out))
        }
        _ => marker.to_string(),
    }
}

fn mode_label(report: &RunReport) -> &'static str {
    match report.mode {
        WriteMode::Create => "create",
        WriteMode::Append => "append",
    }
}

/// Whether any marker in the report ended in `Failed`.
pub fn has_failures(report: &RunReport) -> bool {
    report
        .markers
        .iter()
        .any(|m| m.outcome.state() == MarkerState::Failed)
}

// ── Status ──

pub fn print_status(status: &StoreStatus) {
    println!("Tiers");
    println!("  {:<8} {:>8} {:>10} {:>8}", "tier", "exists", "rows", "markers");
    for tier in &status.tiers {
        println!(
            "  {:<8} {:>8} {:>10} {:>8}",
            tier.tier.to_string(),
            if tier.exists { "yes" } else { "no" },
            tier.rows,
            tier.markers
        );
    }
    println!();

    println!("Boundaries");
    println!(
        "  {:<18} {:>9} {:>11} {:>8} {:>8}",
        "boundary", "upstream", "downstream", "settled", "pending"
    );
    for b in &status.boundaries {
        println!(
            "  {:<18} {:>9} {:>11} {:>8} {:>8}",
            b.boundary.to_string(),
            b.upstream,
            b.downstream,
            b.settled,
            b.pending.len()
        );
        if !b.pending.is_empty() {
            let markers: Vec<String> = b.pending.iter().map(ToString::to_string).collect();
            println!("    pending: {}", markers.join(", "));
        }
    }
}
