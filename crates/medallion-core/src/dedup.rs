//! Bronze → silver: keep the last-seen row per business key within one raw batch.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use serde::Serialize;
use tracing::info;

use crate::error::TransformError;
use crate::marker::{Boundary, Marker};
use crate::reconcile::{Transform, Transformed};
use crate::record::{BusinessKey, CleanedRecord, RawRecord};

/// Row counts for one deduplicated batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub rows_in: usize,
    pub rows_removed: usize,
    pub rows_kept: usize,
}

/// Deduplicate one raw batch.
///
/// Within each business-key group the row with the highest
/// `sequence_in_batch` survives. Every survivor is stamped with `cleaned_at`
/// and back-references `ingested_at`. Survivors come out in ascending
/// sequence order, ties broken by business key. Sequences only need to be
/// distinct within a key group.
pub fn dedup_batch(
    ingested_at: Marker,
    cleaned_at: Marker,
    rows: Vec<RawRecord>,
) -> Result<(Vec<CleanedRecord>, DedupStats), TransformError> {
    let rows_in = rows.len();
    let mut latest: HashMap<BusinessKey, RawRecord> = HashMap::with_capacity(rows_in);

    for row in rows {
        if row.ingested_at != ingested_at {
            return Err(TransformError::ForeignMarker {
                expected: ingested_at,
                found: row.ingested_at,
                sequence: row.sequence_in_batch,
            });
        }

        match latest.entry(row.booking.business_key()) {
            Entry::Occupied(mut slot) => {
                let held = slot.get().sequence_in_batch;
                if row.sequence_in_batch == held {
                    return Err(TransformError::DuplicateSequence(held));
                }
                if row.sequence_in_batch > held {
                    slot.insert(row);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
        }
    }

    let mut kept: Vec<RawRecord> = latest.into_values().collect();
    kept.sort_by(|a, b| {
        a.sequence_in_batch
            .cmp(&b.sequence_in_batch)
            .then_with(|| a.booking.business_key().cmp(&b.booking.business_key()))
    });

    let stats = DedupStats {
        rows_in,
        rows_removed: rows_in - kept.len(),
        rows_kept: kept.len(),
    };
    let cleaned = kept
        .into_iter()
        .map(|raw| CleanedRecord::from_raw(raw, cleaned_at))
        .collect();
    Ok((cleaned, stats))
}

/// [`Transform`] for the bronze → silver boundary.
#[derive(Debug, Default, Clone, Copy)]
pub struct Deduplicator;

impl Transform for Deduplicator {
    type Input = RawRecord;
    type Output = CleanedRecord;

    const BOUNDARY: Boundary = Boundary::BronzeToSilver;

    fn apply(
        &self,
        source: Marker,
        stamp: Marker,
        rows: Vec<RawRecord>,
    ) -> Result<Transformed<CleanedRecord>, TransformError> {
        let (rows, stats) = dedup_batch(source, stamp, rows)?;
        info!(
            %source,
            %stamp,
            rows_in = stats.rows_in,
            rows_removed = stats.rows_removed,
            rows_kept = stats.rows_kept,
            "deduplicated batch"
        );
        Ok(Transformed {
            rows,
            rows_in: stats.rows_in,
        })
    }
}
