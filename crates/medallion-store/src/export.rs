//! Parquet snapshots of a tier.

use std::path::Path;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use medallion_core::{Tier, schema};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use tracing::info;

use crate::StoreError;
use crate::duck::DuckStore;

fn tier_schema(tier: Tier) -> SchemaRef {
    match tier {
        Tier::Bronze => schema::bronze_schema(),
        Tier::Silver => schema::silver_schema(),
        Tier::Gold => schema::gold_schema(),
    }
}

fn writer_properties(tier: Tier) -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .set_key_value_metadata(Some(vec![KeyValue {
            key: "medallion.tier".to_string(),
            value: Some(tier.to_string()),
        }]))
        .build()
}

impl DuckStore {
    /// Write every row of `tier` to a Parquet file, ordered by marker.
    ///
    /// Returns the number of rows written.
    pub fn export_tier(&self, tier: Tier, path: &Path) -> Result<usize, StoreError> {
        if !self.table_exists(tier)? {
            return Err(StoreError::MissingTier(tier));
        }
        let tiebreak = match tier {
            Tier::Bronze | Tier::Silver => "sequence_in_batch",
            Tier::Gold => "origin_destination, travel_date",
        };
        let sql = format!(
            "SELECT * FROM {} ORDER BY {}, {tiebreak}",
            tier.qualified_table(),
            tier.marker_column()
        );
        let batches = self.query_arrow(&sql)?;
        let schema = batches
            .first()
            .map(RecordBatch::schema)
            .unwrap_or_else(|| tier_schema(tier));

        let file = std::fs::File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, schema, Some(writer_properties(tier)))?;
        let mut rows = 0;
        for batch in &batches {
            writer.write(batch)?;
            rows += batch.num_rows();
        }
        writer.close()?;

        info!(%tier, path = %path.display(), rows, "exported tier");
        Ok(rows)
    }
}

/// Read a Parquet file into Arrow RecordBatches.
pub fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>, StoreError> {
    if !path.exists() {
        return Err(StoreError::InputNotFound(path.to_path_buf()));
    }
    let file = std::fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches: Result<Vec<RecordBatch>, _> = reader.collect();
    Ok(batches?)
}
