pub mod aggregate;
pub mod dedup;
pub mod error;
pub mod marker;
pub mod reconcile;
pub mod record;
pub mod schema;

pub use aggregate::{AggregateStats, Aggregator, aggregate_batch};
pub use dedup::{DedupStats, Deduplicator, dedup_batch};
pub use error::{ReconcileError, TransformError};
pub use marker::{Boundary, Marker, Tier};
pub use reconcile::{
    BoundaryStore, EmptyBatchPolicy, FailureKind, MarkerOutcome, MarkerReport, MarkerState,
    PendingSet, Reconciler, RunReport, RunStatus, Transform, Transformed, WriteMode,
};
pub use record::{Booking, BusinessKey, CleanedRecord, DimensionKey, RawRecord, SummaryRecord};
pub use schema::SchemaError;
