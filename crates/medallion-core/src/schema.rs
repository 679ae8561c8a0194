//! Arrow schemas for the tier relations, and decoding of query results into
//! typed records.
//!
//! DuckDB hands rows back as Arrow `RecordBatch`es. Decoding is by column
//! name so that column order in the physical table does not matter.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Date32Array, Float64Array, Int32Array, Int64Array, LargeStringArray,
    StringArray, StringViewArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use thiserror::Error;

use crate::marker::Marker;
use crate::record::{Booking, CleanedRecord, RawRecord, SummaryRecord};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("missing column '{0}'")]
    MissingColumn(String),

    #[error("column '{column}' has unsupported type {data_type}")]
    UnexpectedType { column: String, data_type: DataType },

    #[error("column '{column}' is null at row {row}")]
    NullValue { column: String, row: usize },
}

// ── Column names ──

pub const BOOKING_DATE: &str = "booking_date";
pub const TRAVEL_DATE: &str = "travel_date";
pub const ORIGIN_DESTINATION: &str = "origin_destination";
pub const PASSENGER_COUNT: &str = "passenger_count";
pub const SALE_AMOUNT: &str = "sale_amount";
pub const BATCH_ID: &str = "batch_id";
pub const SOURCE_REF: &str = "source_ref";
pub const SEQUENCE_IN_BATCH: &str = "sequence_in_batch";
pub const INGESTED_AT: &str = "ingested_at";
pub const SOURCE_INGESTED_AT: &str = "source_ingested_at";
pub const CLEANED_AT: &str = "cleaned_at";
pub const TOTAL_PASSENGERS: &str = "total_passengers";
pub const TOTAL_SALES: &str = "total_sales";
pub const UNIQUE_BATCHES: &str = "unique_batches";
pub const SOURCE_CLEANED_AT: &str = "source_cleaned_at";
pub const SUMMARIZED_AT: &str = "summarized_at";

// ── Schemas ──

fn booking_fields() -> Vec<Field> {
    vec![
        Field::new(BOOKING_DATE, DataType::Date32, false),
        Field::new(TRAVEL_DATE, DataType::Date32, false),
        Field::new(ORIGIN_DESTINATION, DataType::Utf8, false),
        Field::new(PASSENGER_COUNT, DataType::Int64, false),
        Field::new(SALE_AMOUNT, DataType::Float64, false),
    ]
}

/// Bronze relation: raw rows tagged with load metadata.
pub fn bronze_schema() -> SchemaRef {
    let mut fields = booking_fields();
    fields.extend([
        Field::new(BATCH_ID, DataType::Utf8, false),
        Field::new(INGESTED_AT, DataType::Int64, false),
        Field::new(SOURCE_REF, DataType::Utf8, false),
        Field::new(SEQUENCE_IN_BATCH, DataType::Int64, false),
    ]);
    Arc::new(Schema::new(fields))
}

/// Silver relation: bronze columns plus the cleaning marker.
pub fn silver_schema() -> SchemaRef {
    let mut fields = booking_fields();
    fields.extend([
        Field::new(BATCH_ID, DataType::Utf8, false),
        Field::new(SOURCE_REF, DataType::Utf8, false),
        Field::new(SEQUENCE_IN_BATCH, DataType::Int64, false),
        Field::new(SOURCE_INGESTED_AT, DataType::Int64, false),
        Field::new(CLEANED_AT, DataType::Int64, false),
    ]);
    Arc::new(Schema::new(fields))
}

/// Gold relation: one row per (route, travel date) per cleaned batch.
pub fn gold_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(ORIGIN_DESTINATION, DataType::Utf8, false),
        Field::new(TRAVEL_DATE, DataType::Date32, false),
        Field::new(TOTAL_PASSENGERS, DataType::Int64, false),
        Field::new(TOTAL_SALES, DataType::Float64, false),
        Field::new(UNIQUE_BATCHES, DataType::Int64, false),
        Field::new(SOURCE_CLEANED_AT, DataType::Int64, false),
        Field::new(SUMMARIZED_AT, DataType::Int64, false),
    ]))
}

// ── Decoding ──

/// Decode bronze rows from query results.
pub fn decode_raw(batches: &[RecordBatch]) -> Result<Vec<RawRecord>, SchemaError> {
    let mut out = Vec::new();
    for batch in batches {
        let cols = BookingColumns::new(batch)?;
        let batch_id = column(batch, BATCH_ID)?;
        let ingested_at = column(batch, INGESTED_AT)?;
        let source_ref = column(batch, SOURCE_REF)?;
        let sequence = column(batch, SEQUENCE_IN_BATCH)?;
        for row in 0..batch.num_rows() {
            out.push(RawRecord {
                booking: cols.booking(row)?,
                batch_id: string_at(batch_id, BATCH_ID, row)?,
                ingested_at: Marker::new(int_at(ingested_at, INGESTED_AT, row)?),
                source_ref: string_at(source_ref, SOURCE_REF, row)?,
                sequence_in_batch: int_at(sequence, SEQUENCE_IN_BATCH, row)?,
            });
        }
    }
    Ok(out)
}

/// Decode silver rows from query results.
pub fn decode_cleaned(batches: &[RecordBatch]) -> Result<Vec<CleanedRecord>, SchemaError> {
    let mut out = Vec::new();
    for batch in batches {
        let cols = BookingColumns::new(batch)?;
        let batch_id = column(batch, BATCH_ID)?;
        let source_ref = column(batch, SOURCE_REF)?;
        let sequence = column(batch, SEQUENCE_IN_BATCH)?;
        let source_ingested_at = column(batch, SOURCE_INGESTED_AT)?;
        let cleaned_at = column(batch, CLEANED_AT)?;
        for row in 0..batch.num_rows() {
            out.push(CleanedRecord {
                booking: cols.booking(row)?,
                batch_id: string_at(batch_id, BATCH_ID, row)?,
                source_ref: string_at(source_ref, SOURCE_REF, row)?,
                sequence_in_batch: int_at(sequence, SEQUENCE_IN_BATCH, row)?,
                source_ingested_at: Marker::new(int_at(
                    source_ingested_at,
                    SOURCE_INGESTED_AT,
                    row,
                )?),
                cleaned_at: Marker::new(int_at(cleaned_at, CLEANED_AT, row)?),
            });
        }
    }
    Ok(out)
}

/// Decode gold rows from query results.
pub fn decode_summary(batches: &[RecordBatch]) -> Result<Vec<SummaryRecord>, SchemaError> {
    let mut out = Vec::new();
    for batch in batches {
        let route = column(batch, ORIGIN_DESTINATION)?;
        let travel = column(batch, TRAVEL_DATE)?;
        let passengers = column(batch, TOTAL_PASSENGERS)?;
        let sales = column(batch, TOTAL_SALES)?;
        let unique = column(batch, UNIQUE_BATCHES)?;
        let source = column(batch, SOURCE_CLEANED_AT)?;
        let stamp = column(batch, SUMMARIZED_AT)?;
        for row in 0..batch.num_rows() {
            out.push(SummaryRecord {
                origin_destination: string_at(route, ORIGIN_DESTINATION, row)?,
                travel_date: date_at(travel, TRAVEL_DATE, row)?,
                total_passengers: int_at(passengers, TOTAL_PASSENGERS, row)?,
                total_sales: float_at(sales, TOTAL_SALES, row)?,
                unique_batches: int_at(unique, UNIQUE_BATCHES, row)?,
                source_cleaned_at: Marker::new(int_at(source, SOURCE_CLEANED_AT, row)?),
                summarized_at: Marker::new(int_at(stamp, SUMMARIZED_AT, row)?),
            });
        }
    }
    Ok(out)
}

/// Decode bare booking rows, e.g. the result of reading an input file.
pub fn decode_bookings(batches: &[RecordBatch]) -> Result<Vec<Booking>, SchemaError> {
    let mut out = Vec::new();
    for batch in batches {
        let cols = BookingColumns::new(batch)?;
        for row in 0..batch.num_rows() {
            out.push(cols.booking(row)?);
        }
    }
    Ok(out)
}

struct BookingColumns<'a> {
    booking_date: &'a ArrayRef,
    travel_date: &'a ArrayRef,
    route: &'a ArrayRef,
    passengers: &'a ArrayRef,
    amount: &'a ArrayRef,
}

impl<'a> BookingColumns<'a> {
    fn new(batch: &'a RecordBatch) -> Result<Self, SchemaError> {
        Ok(Self {
            booking_date: column(batch, BOOKING_DATE)?,
            travel_date: column(batch, TRAVEL_DATE)?,
            route: column(batch, ORIGIN_DESTINATION)?,
            passengers: column(batch, PASSENGER_COUNT)?,
            amount: column(batch, SALE_AMOUNT)?,
        })
    }

    fn booking(&self, row: usize) -> Result<Booking, SchemaError> {
        Ok(Booking {
            booking_date: date_at(self.booking_date, BOOKING_DATE, row)?,
            travel_date: date_at(self.travel_date, TRAVEL_DATE, row)?,
            origin_destination: string_at(self.route, ORIGIN_DESTINATION, row)?,
            passenger_count: int_at(self.passengers, PASSENGER_COUNT, row)?,
            sale_amount: float_at(self.amount, SALE_AMOUNT, row)?,
        })
    }
}

// ── Helpers ──

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, SchemaError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| SchemaError::MissingColumn(name.to_string()))
}

fn check_null(col: &ArrayRef, name: &str, row: usize) -> Result<(), SchemaError> {
    if col.is_null(row) {
        return Err(SchemaError::NullValue {
            column: name.to_string(),
            row,
        });
    }
    Ok(())
}

fn unexpected(col: &ArrayRef, name: &str) -> SchemaError {
    SchemaError::UnexpectedType {
        column: name.to_string(),
        data_type: col.data_type().clone(),
    }
}

/// String value from a Utf8, LargeUtf8 or Utf8View column.
fn string_at(col: &ArrayRef, name: &str, row: usize) -> Result<String, SchemaError> {
    check_null(col, name, row)?;
    if let Some(arr) = col.as_any().downcast_ref::<StringArray>() {
        return Ok(arr.value(row).to_string());
    }
    if let Some(arr) = col.as_any().downcast_ref::<LargeStringArray>() {
        return Ok(arr.value(row).to_string());
    }
    if let Some(arr) = col.as_any().downcast_ref::<StringViewArray>() {
        return Ok(arr.value(row).to_string());
    }
    Err(unexpected(col, name))
}

/// Integer value from an Int64 or Int32 column.
fn int_at(col: &ArrayRef, name: &str, row: usize) -> Result<i64, SchemaError> {
    check_null(col, name, row)?;
    if let Some(arr) = col.as_any().downcast_ref::<Int64Array>() {
        return Ok(arr.value(row));
    }
    if let Some(arr) = col.as_any().downcast_ref::<Int32Array>() {
        return Ok(i64::from(arr.value(row)));
    }
    Err(unexpected(col, name))
}

fn float_at(col: &ArrayRef, name: &str, row: usize) -> Result<f64, SchemaError> {
    check_null(col, name, row)?;
    col.as_any()
        .downcast_ref::<Float64Array>()
        .map(|arr| arr.value(row))
        .ok_or_else(|| unexpected(col, name))
}

fn date_at(col: &ArrayRef, name: &str, row: usize) -> Result<NaiveDate, SchemaError> {
    check_null(col, name, row)?;
    col.as_any()
        .downcast_ref::<Date32Array>()
        .and_then(|arr| arr.value_as_date(row))
        .ok_or_else(|| unexpected(col, name))
}
