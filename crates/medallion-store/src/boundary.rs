//! [`BoundaryStore`] implementations for bronze → silver and silver → gold.
//!
//! Each commit is one unit of work: ensure the destination exists (create
//! mode only), insert every row, append the marker ledger entry, commit.
//! Destination tables carry UNIQUE constraints on (back-reference, key), so
//! a duplicate key aborts the whole unit instead of landing half a batch.

use std::collections::BTreeSet;

use duckdb::Connection;
use medallion_core::{
    Boundary, BoundaryStore, CleanedRecord, Marker, RawRecord, SummaryRecord, Tier, WriteMode,
    schema,
};
use tracing::info;

use crate::StoreError;
use crate::duck::{self, DuckStore, record_marker};

const SILVER_DDL: &str = "
CREATE SCHEMA IF NOT EXISTS silver;
CREATE TABLE IF NOT EXISTS silver.bookings_cleaned (
    booking_date DATE NOT NULL,
    travel_date DATE NOT NULL,
    origin_destination VARCHAR NOT NULL,
    passenger_count BIGINT NOT NULL,
    sale_amount DOUBLE NOT NULL,
    batch_id VARCHAR NOT NULL,
    source_ref VARCHAR NOT NULL,
    sequence_in_batch BIGINT NOT NULL,
    source_ingested_at BIGINT NOT NULL,
    cleaned_at BIGINT NOT NULL,
    UNIQUE (source_ingested_at, booking_date, travel_date, origin_destination)
);
";

const GOLD_DDL: &str = "
CREATE SCHEMA IF NOT EXISTS gold;
CREATE TABLE IF NOT EXISTS gold.booking_summary (
    origin_destination VARCHAR NOT NULL,
    travel_date DATE NOT NULL,
    total_passengers BIGINT NOT NULL,
    total_sales DOUBLE NOT NULL,
    unique_batches BIGINT NOT NULL,
    source_cleaned_at BIGINT NOT NULL,
    summarized_at BIGINT NOT NULL,
    UNIQUE (source_cleaned_at, origin_destination, travel_date)
);
";

/// Create the destination inside the current unit of work if it is missing.
///
/// Returns whether this call created it.
fn ensure_destination(conn: &Connection, tier: Tier, ddl: &str) -> Result<bool, StoreError> {
    if duck::table_exists(conn, tier)? {
        return Ok(false);
    }
    conn.execute_batch(ddl)?;
    info!(table = %tier.qualified_table(), "creating destination table");
    Ok(true)
}

fn check_lineage(
    tier: Tier,
    expected: (Marker, Marker),
    found: impl Iterator<Item = (Marker, Marker)>,
) -> Result<(), StoreError> {
    for (source, stamp) in found {
        if (source, stamp) != expected {
            return Err(StoreError::Other(format!(
                "{tier} row stamped {stamp} from {source}, expected {} from {}",
                expected.1, expected.0
            )));
        }
    }
    Ok(())
}

impl BoundaryStore<RawRecord, CleanedRecord> for DuckStore {
    type Error = StoreError;

    fn upstream_markers(&self) -> Result<BTreeSet<Marker>, StoreError> {
        self.distinct_markers(Tier::Bronze, schema::INGESTED_AT)
    }

    fn destination_exists(&self) -> Result<bool, StoreError> {
        self.table_exists(Tier::Silver)
    }

    fn downstream_refs(&self) -> Result<BTreeSet<Marker>, StoreError> {
        self.distinct_markers(Tier::Silver, schema::SOURCE_INGESTED_AT)
    }

    fn settled_markers(&self) -> Result<BTreeSet<Marker>, StoreError> {
        self.settled(Boundary::BronzeToSilver)
    }

    fn issue_marker(&self) -> Result<Marker, StoreError> {
        duck::issue_marker(self.connection())
    }

    fn fetch_batch(&self, marker: Marker) -> Result<Vec<RawRecord>, StoreError> {
        let batches = self.batches_for_marker(Tier::Bronze, schema::INGESTED_AT, marker)?;
        Ok(schema::decode_raw(&batches)?)
    }

    fn commit_batch(
        &self,
        source: Marker,
        stamp: Marker,
        rows: &[CleanedRecord],
        mode: WriteMode,
    ) -> Result<bool, StoreError> {
        check_lineage(
            Tier::Silver,
            (source, stamp),
            rows.iter().map(|r| (r.source_ingested_at, r.cleaned_at)),
        )?;

        let uow = self.unit_of_work()?;
        let conn = uow.conn();
        let created = match mode {
            WriteMode::Create => ensure_destination(conn, Tier::Silver, SILVER_DDL)?,
            WriteMode::Append => false,
        };
        {
            let mut stmt = conn.prepare(
                "INSERT INTO silver.bookings_cleaned (
                    booking_date, travel_date, origin_destination, passenger_count,
                    sale_amount, batch_id, source_ref, sequence_in_batch,
                    source_ingested_at, cleaned_at
                 ) VALUES (CAST(? AS DATE), CAST(? AS DATE), ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for row in rows {
                stmt.execute(duckdb::params![
                    row.booking.booking_date.to_string(),
                    row.booking.travel_date.to_string(),
                    row.booking.origin_destination,
                    row.booking.passenger_count,
                    row.booking.sale_amount,
                    row.batch_id,
                    row.source_ref,
                    row.sequence_in_batch,
                    row.source_ingested_at.value(),
                    row.cleaned_at.value(),
                ])?;
            }
        }
        record_marker(conn, stamp, Tier::Silver, Some(source), rows.len())?;
        uow.commit()?;
        Ok(created)
    }

    fn settle_marker(&self, marker: Marker) -> Result<(), StoreError> {
        self.settle(Boundary::BronzeToSilver, marker)
    }
}

impl BoundaryStore<CleanedRecord, SummaryRecord> for DuckStore {
    type Error = StoreError;

    fn upstream_markers(&self) -> Result<BTreeSet<Marker>, StoreError> {
        self.distinct_markers(Tier::Silver, schema::CLEANED_AT)
    }

    fn destination_exists(&self) -> Result<bool, StoreError> {
        self.table_exists(Tier::Gold)
    }

    fn downstream_refs(&self) -> Result<BTreeSet<Marker>, StoreError> {
        self.distinct_markers(Tier::Gold, schema::SOURCE_CLEANED_AT)
    }

    fn settled_markers(&self) -> Result<BTreeSet<Marker>, StoreError> {
        self.settled(Boundary::SilverToGold)
    }

    fn issue_marker(&self) -> Result<Marker, StoreError> {
        duck::issue_marker(self.connection())
    }

    fn fetch_batch(&self, marker: Marker) -> Result<Vec<CleanedRecord>, StoreError> {
        if !self.table_exists(Tier::Silver)? {
            return Err(StoreError::MissingTier(Tier::Silver));
        }
        let batches = self.batches_for_marker(Tier::Silver, schema::CLEANED_AT, marker)?;
        Ok(schema::decode_cleaned(&batches)?)
    }

    fn commit_batch(
        &self,
        source: Marker,
        stamp: Marker,
        rows: &[SummaryRecord],
        mode: WriteMode,
    ) -> Result<bool, StoreError> {
        check_lineage(
            Tier::Gold,
            (source, stamp),
            rows.iter().map(|r| (r.source_cleaned_at, r.summarized_at)),
        )?;

        let uow = self.unit_of_work()?;
        let conn = uow.conn();
        let created = match mode {
            WriteMode::Create => ensure_destination(conn, Tier::Gold, GOLD_DDL)?,
            WriteMode::Append => false,
        };
        {
            let mut stmt = conn.prepare(
                "INSERT INTO gold.booking_summary (
                    origin_destination, travel_date, total_passengers, total_sales,
                    unique_batches, source_cleaned_at, summarized_at
                 ) VALUES (?, CAST(? AS DATE), ?, ?, ?, ?, ?)",
            )?;
            for row in rows {
                stmt.execute(duckdb::params![
                    row.origin_destination,
                    row.travel_date.to_string(),
                    row.total_passengers,
                    row.total_sales,
                    row.unique_batches,
                    row.source_cleaned_at.value(),
                    row.summarized_at.value(),
                ])?;
            }
        }
        record_marker(conn, stamp, Tier::Gold, Some(source), rows.len())?;
        uow.commit()?;
        Ok(created)
    }

    fn settle_marker(&self, marker: Marker) -> Result<(), StoreError> {
        self.settle(Boundary::SilverToGold, marker)
    }
}
