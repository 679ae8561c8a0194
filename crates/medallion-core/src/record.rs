//! Row types for the three tiers.
//!
//! Business domain: flight bookings. Deduplication identity is the
//! [`BusinessKey`] (booking date, travel date, route); aggregation groups on
//! the [`DimensionKey`] (route, travel date).

use chrono::NaiveDate;
use serde::Serialize;

use crate::marker::Marker;

/// Business fields shared by every tier below gold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Booking {
    pub booking_date: NaiveDate,
    pub travel_date: NaiveDate,
    /// Route in `ORIGIN-DEST` form, e.g. `DEL-BOM`.
    pub origin_destination: String,
    pub passenger_count: i64,
    pub sale_amount: f64,
}

/// Fields that define row identity for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BusinessKey {
    pub booking_date: NaiveDate,
    pub travel_date: NaiveDate,
    pub origin_destination: String,
}

/// Grouping key for gold aggregates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DimensionKey {
    pub origin_destination: String,
    pub travel_date: NaiveDate,
}

impl Booking {
    pub fn business_key(&self) -> BusinessKey {
        BusinessKey {
            booking_date: self.booking_date,
            travel_date: self.travel_date,
            origin_destination: self.origin_destination.clone(),
        }
    }

    pub fn dimension_key(&self) -> DimensionKey {
        DimensionKey {
            origin_destination: self.origin_destination.clone(),
            travel_date: self.travel_date,
        }
    }
}

/// Bronze row: one ingested line of an input unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRecord {
    #[serde(flatten)]
    pub booking: Booking,
    /// UUID assigned to the whole load.
    pub batch_id: String,
    pub ingested_at: Marker,
    /// Name of the originating input unit (file name).
    pub source_ref: String,
    /// 1-based position within the load.
    pub sequence_in_batch: i64,
}

/// Silver row: a raw row that survived deduplication.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanedRecord {
    #[serde(flatten)]
    pub booking: Booking,
    pub batch_id: String,
    pub source_ref: String,
    pub sequence_in_batch: i64,
    /// Bronze marker this row was derived from. A join key only.
    pub source_ingested_at: Marker,
    pub cleaned_at: Marker,
}

impl CleanedRecord {
    /// Promote a raw row, keeping its lineage columns.
    pub fn from_raw(raw: RawRecord, cleaned_at: Marker) -> Self {
        Self {
            booking: raw.booking,
            batch_id: raw.batch_id,
            source_ref: raw.source_ref,
            sequence_in_batch: raw.sequence_in_batch,
            source_ingested_at: raw.ingested_at,
            cleaned_at,
        }
    }
}

/// Gold row: aggregates for one dimensional key within one cleaned batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRecord {
    pub origin_destination: String,
    pub travel_date: NaiveDate,
    pub total_passengers: i64,
    pub total_sales: f64,
    /// Distinct `batch_id`s contributing to the group.
    pub unique_batches: i64,
    pub source_cleaned_at: Marker,
    pub summarized_at: Marker,
}

impl SummaryRecord {
    pub fn dimension_key(&self) -> DimensionKey {
        DimensionKey {
            origin_destination: self.origin_destination.clone(),
            travel_date: self.travel_date,
        }
    }
}
