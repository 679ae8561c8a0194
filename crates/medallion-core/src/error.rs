use thiserror::Error;

use crate::marker::{Boundary, Marker};

/// A batch's rows are malformed and cannot be transformed.
///
/// Always scoped to one marker; the marker stays pending.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("row {sequence} carries marker {found}, expected {expected}")]
    ForeignMarker {
        expected: Marker,
        found: Marker,
        sequence: i64,
    },

    /// Two rows share a business key and a sequence, so neither is last.
    #[error("sequence number {0} appears twice for one business key")]
    DuplicateSequence(i64),

    #[error("{0}")]
    Invalid(String),
}

/// Store-scoped failure that aborts a whole run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{boundary}: store unreachable while {during}: {source}")]
    Connectivity {
        boundary: Boundary,
        during: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
