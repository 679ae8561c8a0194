//! Bronze loader: appends input units to `bronze.raw_bookings`.
//!
//! Each input unit (usually one CSV file) is loaded at most once, keyed by
//! its `source_ref`. A load gets one marker, one batch UUID, and 1-based
//! sequence numbers in input order, all committed together.

use std::path::Path;

use medallion_core::{Booking, Marker, Tier, schema};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::duck::{DuckStore, issue_marker, record_marker};
use crate::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Ingested {
        marker: Marker,
        batch_id: String,
        rows: usize,
    },
    /// `source_ref` was loaded by an earlier call; nothing written.
    AlreadyIngested,
    /// The input had no rows; nothing written.
    Empty,
}

impl DuckStore {
    /// Whether an input unit has already been loaded.
    pub fn is_ingested(&self, source_ref: &str) -> Result<bool, StoreError> {
        is_ingested(self.connection(), source_ref)
    }

    /// Append `rows` as one bronze batch for `source_ref`.
    pub fn ingest_bookings(
        &self,
        source_ref: &str,
        rows: &[Booking],
    ) -> Result<IngestOutcome, StoreError> {
        if rows.is_empty() {
            warn!(source_ref, "input has no rows, skipped");
            return Ok(IngestOutcome::Empty);
        }

        let uow = self.unit_of_work()?;
        let conn = uow.conn();
        if is_ingested(conn, source_ref)? {
            info!(source_ref, "already ingested, skipped");
            return Ok(IngestOutcome::AlreadyIngested);
        }

        let marker = issue_marker(conn)?;
        let batch_id = Uuid::new_v4().to_string();
        {
            let mut stmt = conn.prepare(
                "INSERT INTO bronze.raw_bookings (
                    booking_date, travel_date, origin_destination, passenger_count,
                    sale_amount, batch_id, ingested_at, source_ref, sequence_in_batch
                 ) VALUES (CAST(? AS DATE), CAST(? AS DATE), ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for (i, booking) in rows.iter().enumerate() {
                stmt.execute(duckdb::params![
                    booking.booking_date.to_string(),
                    booking.travel_date.to_string(),
                    booking.origin_destination,
                    booking.passenger_count,
                    booking.sale_amount,
                    batch_id,
                    marker.value(),
                    source_ref,
                    i as i64 + 1,
                ])?;
            }
        }
        record_marker(conn, marker, Tier::Bronze, None, rows.len())?;
        uow.commit()?;

        info!(source_ref, %marker, batch_id = %batch_id, rows = rows.len(), "ingested batch");
        Ok(IngestOutcome::Ingested {
            marker,
            batch_id,
            rows: rows.len(),
        })
    }

    /// Load one CSV file with a header row of
    /// `booking_date,travel_date,origin_destination,passenger_count,sale_amount`.
    ///
    /// The file name is the `source_ref`.
    pub fn ingest_csv(&self, path: &Path) -> Result<IngestOutcome, StoreError> {
        if !path.exists() {
            return Err(StoreError::InputNotFound(path.to_path_buf()));
        }
        let source_ref = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StoreError::Other(format!("no file name in {}", path.display())))?;

        if self.is_ingested(&source_ref)? {
            info!(source_ref, "already ingested, skipped");
            return Ok(IngestOutcome::AlreadyIngested);
        }

        let bookings = self.read_csv(path)?;
        self.ingest_bookings(&source_ref, &bookings)
    }

    /// Read a bookings CSV in file order.
    fn read_csv(&self, path: &Path) -> Result<Vec<Booking>, StoreError> {
        let escaped = path.display().to_string().replace('\'', "''");
        let sql = format!(
            "SELECT booking_date, travel_date, origin_destination, passenger_count, sale_amount
             FROM read_csv('{escaped}', header = true, columns = {{
                 'booking_date': 'DATE',
                 'travel_date': 'DATE',
                 'origin_destination': 'VARCHAR',
                 'passenger_count': 'BIGINT',
                 'sale_amount': 'DOUBLE'
             }})"
        );
        let batches = self.query_arrow(&sql)?;
        Ok(schema::decode_bookings(&batches)?)
    }
}

fn is_ingested(conn: &duckdb::Connection, source_ref: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM bronze.raw_bookings WHERE source_ref = ?",
        [source_ref],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use medallion_core::schema::decode_raw;

    fn booking(route: &str, passengers: i64) -> Booking {
        Booking {
            booking_date: NaiveDate::from_ymd_opt(2025, 7, 18).unwrap(),
            travel_date: NaiveDate::from_ymd_opt(2025, 7, 21).unwrap(),
            origin_destination: route.into(),
            passenger_count: passengers,
            sale_amount: 123_456.78,
        }
    }

    #[test]
    fn ingest_assigns_marker_batch_and_sequence() {
        let store = DuckStore::open().unwrap();
        let outcome = store
            .ingest_bookings("a.csv", &[booking("DEL-BOM", 100), booking("MAA-HYD", 200)])
            .unwrap();
        let IngestOutcome::Ingested { marker, batch_id, rows } = outcome.clone() else {
            panic!("expected ingest, got {outcome:?}");
        };
        assert_eq!(rows, 2);

        let batches = store
            .query_arrow("SELECT * FROM bronze.raw_bookings ORDER BY sequence_in_batch")
            .unwrap();
        let raw = decode_raw(&batches).unwrap();
        assert_eq!(raw.len(), 2);
        assert!(raw.iter().all(|r| r.ingested_at == marker && r.batch_id == batch_id));
        assert_eq!(raw[0].sequence_in_batch, 1);
        assert_eq!(raw[1].sequence_in_batch, 2);
        assert_eq!(raw[1].booking, booking("MAA-HYD", 200));
        assert_eq!(raw[0].source_ref, "a.csv");
    }

    #[test]
    fn same_source_ref_is_loaded_once() {
        let store = DuckStore::open().unwrap();
        store.ingest_bookings("a.csv", &[booking("DEL-BOM", 1)]).unwrap();
        let again = store.ingest_bookings("a.csv", &[booking("DEL-BOM", 2)]).unwrap();
        assert_eq!(again, IngestOutcome::AlreadyIngested);
        assert_eq!(store.row_count(Tier::Bronze).unwrap(), 1);
    }

    #[test]
    fn separate_loads_get_distinct_markers() {
        let store = DuckStore::open().unwrap();
        let a = store.ingest_bookings("a.csv", &[booking("DEL-BOM", 1)]).unwrap();
        let b = store.ingest_bookings("b.csv", &[booking("DEL-BOM", 1)]).unwrap();
        match (a, b) {
            (
                IngestOutcome::Ingested { marker: ma, batch_id: ba, .. },
                IngestOutcome::Ingested { marker: mb, batch_id: bb, .. },
            ) => {
                assert!(ma < mb);
                assert_ne!(ba, bb);
            }
            other => panic!("unexpected outcomes {other:?}"),
        }
    }

    #[test]
    fn empty_input_is_skipped() {
        let store = DuckStore::open().unwrap();
        assert_eq!(store.ingest_bookings("e.csv", &[]).unwrap(), IngestOutcome::Empty);
        assert!(!store.is_ingested("e.csv").unwrap());
    }

    #[test]
    fn ingest_csv_reads_rows_in_file_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("booking_data_2025-07-20_1.csv");
        std::fs::write(
            &path,
            "booking_date,travel_date,origin_destination,passenger_count,sale_amount\n\
             2025-07-18,2025-07-21,DEL-BOM,120,150000.5\n\
             2025-07-17,2025-07-22,MAA-HYD,300,420000.0\n\
             2025-07-18,2025-07-21,DEL-BOM,130,151000.0\n",
        )
        .unwrap();

        let store = DuckStore::open().unwrap();
        let outcome = store.ingest_csv(&path).unwrap();
        assert!(matches!(outcome, IngestOutcome::Ingested { rows: 3, .. }));
        assert!(store.is_ingested("booking_data_2025-07-20_1.csv").unwrap());

        let raw = decode_raw(
            &store
                .query_arrow("SELECT * FROM bronze.raw_bookings ORDER BY sequence_in_batch")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(raw[2].booking.passenger_count, 130);
        assert_eq!(raw[1].booking.origin_destination, "MAA-HYD");

        assert_eq!(store.ingest_csv(&path).unwrap(), IngestOutcome::AlreadyIngested);
    }

    #[test]
    fn ingest_csv_missing_file_errors() {
        let store = DuckStore::open().unwrap();
        let result = store.ingest_csv(Path::new("/nonexistent/bookings.csv"));
        assert!(matches!(result, Err(StoreError::InputNotFound(_))));
    }

    #[test]
    fn malformed_csv_writes_nothing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.csv");
        std::fs::write(
            &path,
            "booking_date,travel_date,origin_destination,passenger_count,sale_amount\n\
             not-a-date,2025-07-21,DEL-BOM,120,1.0\n",
        )
        .unwrap();

        let store = DuckStore::open().unwrap();
        assert!(store.ingest_csv(&path).is_err());
        assert_eq!(store.row_count(Tier::Bronze).unwrap(), 0);
    }
}
