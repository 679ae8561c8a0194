//! Storage layer: DuckDB-backed bronze/silver/gold tiers.

mod error;
pub use error::StoreError;

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::{BoundaryStatus, DuckStore, StoreStatus, TierStatus};

#[cfg(feature = "duckdb")]
mod bronze;
#[cfg(feature = "duckdb")]
pub use bronze::IngestOutcome;

#[cfg(feature = "duckdb")]
mod boundary;

#[cfg(feature = "duckdb")]
mod export;
#[cfg(feature = "duckdb")]
pub use export::read_parquet;
