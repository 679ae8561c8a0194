//! DuckDB store holding the bronze, silver and gold tiers.

use std::collections::BTreeSet;
use std::path::Path;

use arrow::record_batch::RecordBatch;
use duckdb::Connection;
use medallion_core::{
    Aggregator, Boundary, CleanedRecord, Deduplicator, Marker, Reconciler, SummaryRecord, Tier,
    schema,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::StoreError;

/// Namespaces, marker sequence, bronze relation and ledgers.
///
/// Silver and gold relations are absent here: each is created by the
/// first successful write into it.
const LAYOUT: &str = "
CREATE SCHEMA IF NOT EXISTS bronze;
CREATE SCHEMA IF NOT EXISTS silver;
CREATE SCHEMA IF NOT EXISTS gold;
CREATE SCHEMA IF NOT EXISTS meta;
CREATE SEQUENCE IF NOT EXISTS meta.marker_seq START 1;
CREATE TABLE IF NOT EXISTS bronze.raw_bookings (
    booking_date DATE NOT NULL,
    travel_date DATE NOT NULL,
    origin_destination VARCHAR NOT NULL,
    passenger_count BIGINT NOT NULL,
    sale_amount DOUBLE NOT NULL,
    batch_id VARCHAR NOT NULL,
    ingested_at BIGINT NOT NULL,
    source_ref VARCHAR NOT NULL,
    sequence_in_batch BIGINT NOT NULL,
    UNIQUE (ingested_at, sequence_in_batch)
);
CREATE TABLE IF NOT EXISTS meta.marker_log (
    marker BIGINT PRIMARY KEY,
    tier VARCHAR NOT NULL,
    source_marker BIGINT,
    row_count BIGINT NOT NULL,
    recorded_at TIMESTAMP NOT NULL DEFAULT current_timestamp
);
CREATE TABLE IF NOT EXISTS meta.settled_markers (
    boundary VARCHAR NOT NULL,
    marker BIGINT NOT NULL,
    settled_at TIMESTAMP NOT NULL DEFAULT current_timestamp,
    PRIMARY KEY (boundary, marker)
);
";

/// DuckDB store for the three tiers and their lineage ledgers.
///
/// Every tier lives in its own schema (`bronze`, `silver`, `gold`), with
/// marker bookkeeping in `meta`. The store handle is passed explicitly to
/// the loader and to each reconciler; nothing holds a global connection.
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes.
/// Use [`open`](Self::open) for in-memory and [`open_persistent`](Self::open_persistent)
/// for file-backed storage that survives across process restarts.
pub struct DuckStore {
    conn: Connection,
}

impl DuckStore {
    /// Open an in-memory DuckDB database with the tier layout in place.
    pub fn open() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.ensure_layout()?;
        Ok(store)
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open(path)?,
        };
        store.ensure_layout()?;
        info!(path = %path.display(), "opened store");
        Ok(store)
    }

    /// Create namespaces, the marker sequence, bronze and ledgers if missing.
    pub fn ensure_layout(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(LAYOUT)?;
        Ok(())
    }

    // ── Tier introspection ──

    /// Whether the tier's relation exists.
    pub fn table_exists(&self, tier: Tier) -> Result<bool, StoreError> {
        table_exists(&self.conn, tier)
    }

    /// Number of rows in a tier, zero if it has not been created yet.
    pub fn row_count(&self, tier: Tier) -> Result<usize, StoreError> {
        if !self.table_exists(tier)? {
            return Ok(0);
        }
        let sql = format!("SELECT count(*)::BIGINT AS cnt FROM {}", tier.qualified_table());
        let batches = self.query_arrow(&sql)?;
        let batch = batches.first().ok_or(StoreError::NoResults)?;
        let col = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::Int64Array>()
            .ok_or_else(|| StoreError::Other("count column not i64".into()))?;
        Ok(col.value(0) as usize)
    }

    /// Distinct values of a marker-typed column, empty if the tier is missing.
    pub(crate) fn distinct_markers(
        &self,
        tier: Tier,
        column: &str,
    ) -> Result<BTreeSet<Marker>, StoreError> {
        if !self.table_exists(tier)? {
            return Ok(BTreeSet::new());
        }
        let sql = format!("SELECT DISTINCT {column} FROM {}", tier.qualified_table());
        let mut stmt = self.conn.prepare(&sql)?;
        let markers = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .map(|v| v.map(Marker::new))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(markers)
    }

    /// Fetch every row of a tier carrying `marker` in `column`.
    pub(crate) fn batches_for_marker(
        &self,
        tier: Tier,
        column: &str,
        marker: Marker,
    ) -> Result<Vec<RecordBatch>, StoreError> {
        let sql = format!(
            "SELECT * FROM {} WHERE {column} = ? ORDER BY sequence_in_batch",
            tier.qualified_table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([marker.value()])?.collect();
        Ok(batches)
    }

    // ── Markers ──

    /// Draw the next marker from the shared sequence.
    ///
    /// Sequences are not transactional, so a rolled-back write leaves a gap
    /// rather than a reusable value.
    pub fn issue_marker(&self) -> Result<Marker, StoreError> {
        issue_marker(&self.conn)
    }

    pub(crate) fn settled(&self, boundary: Boundary) -> Result<BTreeSet<Marker>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT marker FROM meta.settled_markers WHERE boundary = ?")?;
        let markers = stmt
            .query_map([boundary.as_str()], |row| row.get::<_, i64>(0))?
            .map(|v| v.map(Marker::new))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(markers)
    }

    pub(crate) fn settle(&self, boundary: Boundary, marker: Marker) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO meta.settled_markers (boundary, marker) VALUES (?, ?)
             ON CONFLICT DO NOTHING",
            duckdb::params![boundary.as_str(), marker.value()],
        )?;
        info!(%boundary, %marker, "marker settled as empty");
        Ok(())
    }

    /// Begin a unit of work. Dropping it without [`UnitOfWork::commit`] rolls back.
    pub(crate) fn unit_of_work(&self) -> Result<UnitOfWork<'_>, StoreError> {
        UnitOfWork::begin(&self.conn)
    }

    // ── Tier contents ──

    /// All silver rows ordered by marker then sequence.
    pub fn cleaned_records(&self) -> Result<Vec<CleanedRecord>, StoreError> {
        if !self.table_exists(Tier::Silver)? {
            return Ok(Vec::new());
        }
        let batches = self.query_arrow(
            "SELECT * FROM silver.bookings_cleaned ORDER BY cleaned_at, sequence_in_batch",
        )?;
        Ok(schema::decode_cleaned(&batches)?)
    }

    /// All gold rows ordered by marker then dimensional key.
    pub fn summary_records(&self) -> Result<Vec<SummaryRecord>, StoreError> {
        if !self.table_exists(Tier::Gold)? {
            return Ok(Vec::new());
        }
        let batches = self.query_arrow(
            "SELECT * FROM gold.booking_summary
             ORDER BY summarized_at, origin_destination, travel_date",
        )?;
        Ok(schema::decode_summary(&batches)?)
    }

    // ── Status ──

    /// Row counts per tier and pending work per boundary.
    pub fn status(&self) -> Result<StoreStatus, StoreError> {
        let mut tiers = Vec::with_capacity(Tier::ALL.len());
        for tier in Tier::ALL {
            tiers.push(TierStatus {
                tier,
                exists: self.table_exists(tier)?,
                rows: self.row_count(tier)?,
                markers: self.distinct_markers(tier, tier.marker_column())?.len(),
            });
        }

        let boundaries = vec![
            self.boundary_status(Boundary::BronzeToSilver, || {
                Reconciler::new(self, Deduplicator).pending()
            })?,
            self.boundary_status(Boundary::SilverToGold, || {
                Reconciler::new(self, Aggregator).pending()
            })?,
        ];

        Ok(StoreStatus { tiers, boundaries })
    }

    fn boundary_status(
        &self,
        boundary: Boundary,
        pending: impl FnOnce() -> Result<medallion_core::PendingSet, medallion_core::ReconcileError>,
    ) -> Result<BoundaryStatus, StoreError> {
        let source = boundary.source();
        let dest = boundary.destination();
        let back_ref = dest
            .back_reference_column()
            .ok_or_else(|| StoreError::Other(format!("{dest} has no back-reference")))?;
        let pending = pending().map_err(|e| StoreError::Other(e.to_string()))?;
        Ok(BoundaryStatus {
            boundary,
            upstream: self.distinct_markers(source, source.marker_column())?.len(),
            downstream: self.distinct_markers(dest, back_ref)?.len(),
            settled: self.settled(boundary)?.len(),
            pending: pending.markers,
        })
    }

    // ── Escape hatch ──

    /// Execute arbitrary SQL and return Arrow RecordBatches.
    pub fn query_arrow(&self, sql: &str) -> Result<Vec<RecordBatch>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        Ok(batches)
    }

    /// Access the underlying DuckDB connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TierStatus {
    pub tier: Tier,
    pub exists: bool,
    pub rows: usize,
    pub markers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoundaryStatus {
    pub boundary: Boundary,
    pub upstream: usize,
    pub downstream: usize,
    pub settled: usize,
    pub pending: Vec<Marker>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub tiers: Vec<TierStatus>,
    pub boundaries: Vec<BoundaryStatus>,
}

// ── Unit of work ──

/// Explicit transaction scope on the store's connection.
///
/// Rolls back on drop unless committed, so an early return or a panic
/// between `begin` and `commit` never leaves half a batch behind.
pub(crate) struct UnitOfWork<'c> {
    conn: &'c Connection,
    committed: bool,
}

impl<'c> UnitOfWork<'c> {
    fn begin(conn: &'c Connection) -> Result<Self, StoreError> {
        conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(Self {
            conn,
            committed: false,
        })
    }

    pub(crate) fn conn(&self) -> &'c Connection {
        self.conn
    }

    pub(crate) fn commit(mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // A failed COMMIT has already ended the transaction; ROLLBACK then errors harmlessly.
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            debug!(error = %e, "rollback after failed unit of work");
        }
    }
}

// ── Connection-level helpers (usable inside a unit of work) ──

pub(crate) fn table_exists(conn: &Connection, tier: Tier) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM information_schema.tables
         WHERE table_schema = ? AND table_name = ?",
        [tier.namespace(), tier.table()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn issue_marker(conn: &Connection) -> Result<Marker, StoreError> {
    let value: i64 = conn.query_row("SELECT nextval('meta.marker_seq')", [], |row| row.get(0))?;
    Ok(Marker::new(value))
}

/// Append a lineage entry for a freshly written batch.
pub(crate) fn record_marker(
    conn: &Connection,
    marker: Marker,
    tier: Tier,
    source: Option<Marker>,
    rows: usize,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO meta.marker_log (marker, tier, source_marker, row_count) VALUES (?, ?, ?, ?)",
        duckdb::params![
            marker.value(),
            tier.namespace(),
            source.map(Marker::value),
            rows as i64
        ],
    )?;
    Ok(())
}
