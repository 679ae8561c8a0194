//! Incremental catch-up between two adjacent tiers.
//!
//! The pending set is `upstream markers − downstream back-references −
//! settled markers`. Each pending marker is fetched, transformed, and
//! committed as one unit of work, in ascending marker order. A failure on one
//! marker is recorded and the run moves on; that marker stays pending for the
//! next run. Only failures to list markers (the store is unreachable) abort.
//!
//! Per-marker states: `Pending → InProgress → Done | Failed`. `Done` is
//! permanent because the committed back-reference removes the marker from
//! every future pending set. `Failed` leaves nothing committed, so the marker
//! is simply pending again next time.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{ReconcileError, TransformError};
use crate::marker::{Boundary, Marker};

// ── Seams ──

/// Rows produced by one transform call.
#[derive(Debug)]
pub struct Transformed<O> {
    pub rows: Vec<O>,
    pub rows_in: usize,
}

/// Tier-specific batch transform.
pub trait Transform {
    type Input;
    type Output;

    const BOUNDARY: Boundary;

    /// Transform all rows of upstream batch `source`, stamping outputs with `stamp`.
    fn apply(
        &self,
        source: Marker,
        stamp: Marker,
        rows: Vec<Self::Input>,
    ) -> Result<Transformed<Self::Output>, TransformError>;
}

/// How the destination relation is written during a run.
///
/// Resolved once per run, before the marker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Destination did not exist at run start; each write ensures it exists
    /// inside its own unit of work, so exactly one commit creates it.
    Create,
    Append,
}

/// Store handle for one boundary: reads upstream, writes downstream.
pub trait BoundaryStore<I, O> {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Distinct markers present in the source relation.
    fn upstream_markers(&self) -> Result<BTreeSet<Marker>, Self::Error>;

    fn destination_exists(&self) -> Result<bool, Self::Error>;

    /// Distinct back-references present in the destination relation.
    ///
    /// Only called when the destination exists.
    fn downstream_refs(&self) -> Result<BTreeSet<Marker>, Self::Error>;

    /// Markers recorded as permanently empty for this boundary.
    fn settled_markers(&self) -> Result<BTreeSet<Marker>, Self::Error>;

    /// Issue a fresh, never-reused marker.
    fn issue_marker(&self) -> Result<Marker, Self::Error>;

    /// All source rows carrying `marker`.
    fn fetch_batch(&self, marker: Marker) -> Result<Vec<I>, Self::Error>;

    /// Write `rows` derived from `source` as one atomic unit.
    ///
    /// Either every row is committed or none is. Returns `true` when this
    /// commit created the destination relation.
    fn commit_batch(
        &self,
        source: Marker,
        stamp: Marker,
        rows: &[O],
        mode: WriteMode,
    ) -> Result<bool, Self::Error>;

    /// Record `marker` as empty-and-done so it leaves the pending set.
    fn settle_marker(&self, marker: Marker) -> Result<(), Self::Error>;
}

// ── Policy ──

/// What to do with a pending marker whose source rows are empty at read time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyBatchPolicy {
    /// Leave the marker pending and look again next run (late-arriving rows).
    #[default]
    Revisit,
    /// Record the marker as settled; it is never revisited.
    Settle,
}

impl std::str::FromStr for EmptyBatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "revisit" => Ok(Self::Revisit),
            "settle" => Ok(Self::Settle),
            other => Err(format!(
                "unknown empty-batch policy '{other}' (expected revisit or settle)"
            )),
        }
    }
}

// ── Outcomes ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl fmt::Display for MarkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MarkerState::Pending => "pending",
            MarkerState::InProgress => "in_progress",
            MarkerState::Done => "done",
            MarkerState::Failed => "failed",
        })
    }
}

/// Marker-scoped failure classes. None of them abort a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SourceRead,
    Transform,
    Write,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::SourceRead => "source read error",
            FailureKind::Transform => "transform error",
            FailureKind::Write => "write error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MarkerOutcome {
    Done {
        stamp: Marker,
        rows_in: usize,
        rows_out: usize,
        created_destination: bool,
    },
    /// Source rows were empty at read time.
    Empty { settled: bool },
    Failed { kind: FailureKind, message: String },
}

impl MarkerOutcome {
    pub fn state(&self) -> MarkerState {
        match self {
            MarkerOutcome::Done { .. } => MarkerState::Done,
            // Not processed: still pending unless settled.
            MarkerOutcome::Empty { settled: true } => MarkerState::Done,
            MarkerOutcome::Empty { settled: false } => MarkerState::Pending,
            MarkerOutcome::Failed { .. } => MarkerState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerReport {
    pub marker: Marker,
    #[serde(flatten)]
    pub outcome: MarkerOutcome,
}

impl fmt::Display for MarkerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            MarkerOutcome::Done {
                stamp,
                rows_in,
                rows_out,
                created_destination,
            } => {
                write!(f, "{}: done as {stamp} ({rows_in} in, {rows_out} out", self.marker)?;
                if *created_destination {
                    f.write_str(", created destination")?;
                }
                f.write_str(")")
            }
            MarkerOutcome::Empty { settled: true } => {
                write!(f, "{}: empty, settled", self.marker)
            }
            MarkerOutcome::Empty { settled: false } => {
                write!(f, "{}: empty, will revisit", self.marker)
            }
            MarkerOutcome::Failed { kind, message } => {
                write!(f, "{}: failed ({kind}): {message}", self.marker)
            }
        }
    }
}

/// Terminal status of a run, as reported to schedulers and operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    UpToDate,
    Succeeded { processed: usize, skipped: usize },
    PartiallyFailed { failed: usize, total: usize },
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::UpToDate => f.write_str("nothing to do"),
            RunStatus::Succeeded { processed, skipped: 0 } => {
                write!(f, "processed {processed} markers successfully")
            }
            RunStatus::Succeeded { processed, skipped } => write!(
                f,
                "processed {processed} markers successfully, {skipped} empty"
            ),
            RunStatus::PartiallyFailed { failed, total } => {
                write!(f, "processed with {failed} of {total} markers failed")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub boundary: Boundary,
    pub mode: WriteMode,
    pub markers: Vec<MarkerReport>,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        let total = self.markers.len();
        if total == 0 {
            return RunStatus::UpToDate;
        }
        let failed = self
            .markers
            .iter()
            .filter(|m| m.outcome.state() == MarkerState::Failed)
            .count();
        if failed > 0 {
            return RunStatus::PartiallyFailed { failed, total };
        }
        let processed = self
            .markers
            .iter()
            .filter(|m| matches!(m.outcome, MarkerOutcome::Done { .. }))
            .count();
        RunStatus::Succeeded {
            processed,
            skipped: total - processed,
        }
    }

    /// Total destination rows committed by this run.
    pub fn rows_written(&self) -> usize {
        self.markers
            .iter()
            .map(|m| match m.outcome {
                MarkerOutcome::Done { rows_out, .. } => rows_out,
                _ => 0,
            })
            .sum()
    }
}

// ── Driver ──

/// Compute the pending set in ascending order.
pub fn pending_markers(
    upstream: &BTreeSet<Marker>,
    downstream: &BTreeSet<Marker>,
    settled: &BTreeSet<Marker>,
) -> Vec<Marker> {
    upstream
        .iter()
        .filter(|m| !downstream.contains(m) && !settled.contains(m))
        .copied()
        .collect()
}

/// Pending work for one boundary, as seen at the start of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSet {
    pub markers: Vec<Marker>,
    pub mode: WriteMode,
}

/// Drives one boundary through its pending set.
pub struct Reconciler<'s, S, T> {
    store: &'s S,
    transform: T,
    empty_policy: EmptyBatchPolicy,
}

impl<'s, S, T> Reconciler<'s, S, T>
where
    T: Transform,
    S: BoundaryStore<T::Input, T::Output>,
{
    pub fn new(store: &'s S, transform: T) -> Self {
        Self {
            store,
            transform,
            empty_policy: EmptyBatchPolicy::default(),
        }
    }

    pub fn with_empty_policy(mut self, policy: EmptyBatchPolicy) -> Self {
        self.empty_policy = policy;
        self
    }

    pub fn boundary(&self) -> Boundary {
        T::BOUNDARY
    }

    /// Compute the pending set without writing anything.
    pub fn pending(&self) -> Result<PendingSet, ReconcileError> {
        let upstream = self
            .store
            .upstream_markers()
            .map_err(|e| self.unreachable("listing upstream markers", e))?;
        let exists = self
            .store
            .destination_exists()
            .map_err(|e| self.unreachable("checking destination", e))?;
        let downstream = if exists {
            self.store
                .downstream_refs()
                .map_err(|e| self.unreachable("listing downstream back-references", e))?
        } else {
            BTreeSet::new()
        };
        let settled = self
            .store
            .settled_markers()
            .map_err(|e| self.unreachable("listing settled markers", e))?;

        Ok(PendingSet {
            markers: pending_markers(&upstream, &downstream, &settled),
            mode: if exists {
                WriteMode::Append
            } else {
                WriteMode::Create
            },
        })
    }

    /// Process every pending marker once.
    pub fn run(&self) -> Result<RunReport, ReconcileError> {
        let boundary = T::BOUNDARY;
        let pending = self.pending()?;

        if pending.markers.is_empty() {
            info!(%boundary, "up to date, no new upstream batches");
            return Ok(RunReport {
                boundary,
                mode: pending.mode,
                markers: Vec::new(),
            });
        }

        info!(
            %boundary,
            pending = pending.markers.len(),
            mode = ?pending.mode,
            "reconciling pending batches"
        );

        let markers: Vec<MarkerReport> = pending
            .markers
            .iter()
            .map(|&marker| MarkerReport {
                marker,
                outcome: self.process(marker, pending.mode),
            })
            .collect();

        let report = RunReport {
            boundary,
            mode: pending.mode,
            markers,
        };
        info!(%boundary, status = %report.status(), rows = report.rows_written(), "run complete");
        Ok(report)
    }

    fn process(&self, marker: Marker, mode: WriteMode) -> MarkerOutcome {
        let boundary = T::BOUNDARY;
        info!(%boundary, %marker, state = %MarkerState::InProgress, "processing batch");

        let outcome = self.try_process(marker, mode);
        match &outcome {
            MarkerOutcome::Done {
                stamp,
                rows_in,
                rows_out,
                created_destination,
            } => info!(
                %boundary,
                %marker,
                %stamp,
                rows_in,
                rows_out,
                created_destination,
                state = %MarkerState::Done,
                "batch committed"
            ),
            MarkerOutcome::Empty { settled } => warn!(
                %boundary,
                %marker,
                settled,
                state = %outcome.state(),
                "batch has no rows, skipped"
            ),
            MarkerOutcome::Failed { kind, message } => error!(
                %boundary,
                %marker,
                %kind,
                error = %message,
                state = %MarkerState::Failed,
                "batch failed, left pending"
            ),
        }
        outcome
    }

    fn try_process(&self, marker: Marker, mode: WriteMode) -> MarkerOutcome {
        let rows = match self.store.fetch_batch(marker) {
            Ok(rows) => rows,
            Err(e) => return failed(FailureKind::SourceRead, &e),
        };

        if rows.is_empty() {
            return match self.empty_policy {
                EmptyBatchPolicy::Revisit => MarkerOutcome::Empty { settled: false },
                EmptyBatchPolicy::Settle => match self.store.settle_marker(marker) {
                    Ok(()) => MarkerOutcome::Empty { settled: true },
                    Err(e) => failed(FailureKind::Write, &e),
                },
            };
        }

        let stamp = match self.store.issue_marker() {
            Ok(stamp) => stamp,
            Err(e) => return failed(FailureKind::Write, &e),
        };

        let out = match self.transform.apply(marker, stamp, rows) {
            Ok(out) => out,
            Err(e) => return failed(FailureKind::Transform, &e),
        };

        match self.store.commit_batch(marker, stamp, &out.rows, mode) {
            Ok(created_destination) => MarkerOutcome::Done {
                stamp,
                rows_in: out.rows_in,
                rows_out: out.rows.len(),
                created_destination,
            },
            Err(e) => failed(FailureKind::Write, &e),
        }
    }

    fn unreachable(&self, during: &'static str, e: S::Error) -> ReconcileError {
        ReconcileError::Connectivity {
            boundary: T::BOUNDARY,
            during,
            source: Box::new(e),
        }
    }
}

fn failed(kind: FailureKind, e: &dyn std::error::Error) -> MarkerOutcome {
    MarkerOutcome::Failed {
        kind,
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::Deduplicator;
    use crate::record::{Booking, CleanedRecord, RawRecord};
    use chrono::NaiveDate;
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct FakeError(&'static str);

    /// In-memory boundary with switchable failure points.
    #[derive(Default)]
    struct MemoryStore {
        upstream: RefCell<BTreeMap<Marker, Vec<RawRecord>>>,
        downstream: RefCell<Vec<CleanedRecord>>,
        exists: Cell<bool>,
        settled: RefCell<BTreeSet<Marker>>,
        next: Cell<i64>,
        unreachable: bool,
        fail_fetch: Option<Marker>,
        fail_commit: Option<Marker>,
        /// Markers whose rows vanish between listing and fetching.
        vanish: BTreeSet<Marker>,
    }

    impl MemoryStore {
        fn with_batches(batches: &[(i64, usize)]) -> Self {
            let store = MemoryStore {
                next: Cell::new(1000),
                ..Default::default()
            };
            for &(marker, n) in batches {
                store.add_batch(Marker::new(marker), n);
            }
            store
        }

        fn add_batch(&self, marker: Marker, n: usize) {
            let rows = (1..=n as i64).map(|seq| raw(marker, seq)).collect();
            self.upstream.borrow_mut().insert(marker, rows);
        }

        fn refs(&self) -> Vec<Marker> {
            let set: BTreeSet<Marker> = self
                .downstream
                .borrow()
                .iter()
                .map(|r| r.source_ingested_at)
                .collect();
            set.into_iter().collect()
        }
    }

    fn raw(marker: Marker, seq: i64) -> RawRecord {
        RawRecord {
            booking: Booking {
                booking_date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
                travel_date: NaiveDate::from_ymd_opt(2025, 7, 5).unwrap(),
                // Two rows per route: every other row is a duplicate.
                origin_destination: format!("R{}", (seq + 1) / 2),
                passenger_count: seq,
                sale_amount: 1.0,
            },
            batch_id: format!("batch-{}", marker.value()),
            ingested_at: marker,
            source_ref: format!("file-{}.csv", marker.value()),
            sequence_in_batch: seq,
        }
    }

    impl BoundaryStore<RawRecord, CleanedRecord> for MemoryStore {
        type Error = FakeError;

        fn upstream_markers(&self) -> Result<BTreeSet<Marker>, FakeError> {
            if self.unreachable {
                return Err(FakeError("connection refused"));
            }
            Ok(self.upstream.borrow().keys().copied().collect())
        }

        fn destination_exists(&self) -> Result<bool, FakeError> {
            Ok(self.exists.get())
        }

        fn downstream_refs(&self) -> Result<BTreeSet<Marker>, FakeError> {
            Ok(self.refs().into_iter().collect())
        }

        fn settled_markers(&self) -> Result<BTreeSet<Marker>, FakeError> {
            Ok(self.settled.borrow().clone())
        }

        fn issue_marker(&self) -> Result<Marker, FakeError> {
            let next = self.next.get();
            self.next.set(next + 1);
            Ok(Marker::new(next))
        }

        fn fetch_batch(&self, marker: Marker) -> Result<Vec<RawRecord>, FakeError> {
            if self.fail_fetch == Some(marker) {
                return Err(FakeError("read timed out"));
            }
            if self.vanish.contains(&marker) {
                return Ok(Vec::new());
            }
            Ok(self.upstream.borrow().get(&marker).cloned().unwrap_or_default())
        }

        fn commit_batch(
            &self,
            source: Marker,
            _stamp: Marker,
            rows: &[CleanedRecord],
            mode: WriteMode,
        ) -> Result<bool, FakeError> {
            if self.fail_commit == Some(source) {
                return Err(FakeError("constraint violation"));
            }
            let created = mode == WriteMode::Create && !self.exists.get();
            self.exists.set(true);
            self.downstream.borrow_mut().extend_from_slice(rows);
            Ok(created)
        }

        fn settle_marker(&self, marker: Marker) -> Result<(), FakeError> {
            self.settled.borrow_mut().insert(marker);
            Ok(())
        }
    }

    /// Wraps a transform and fails deterministically on one marker.
    struct FailOn<T> {
        inner: T,
        marker: Marker,
    }

    impl<T: Transform> Transform for FailOn<T> {
        type Input = T::Input;
        type Output = T::Output;

        const BOUNDARY: Boundary = T::BOUNDARY;

        fn apply(
            &self,
            source: Marker,
            stamp: Marker,
            rows: Vec<T::Input>,
        ) -> Result<Transformed<T::Output>, TransformError> {
            if source == self.marker {
                return Err(TransformError::Invalid("injected failure".into()));
            }
            self.inner.apply(source, stamp, rows)
        }
    }

    fn m(v: i64) -> Marker {
        Marker::new(v)
    }

    #[test]
    fn pending_is_set_difference() {
        let upstream: BTreeSet<_> = [m(5), m(1), m(3), m(9)].into();
        let downstream: BTreeSet<_> = [m(3), m(42)].into();
        let settled: BTreeSet<_> = [m(9)].into();
        assert_eq!(pending_markers(&upstream, &downstream, &settled), vec![m(1), m(5)]);
    }

    #[test]
    fn empty_upstream_is_up_to_date() {
        let store = MemoryStore::with_batches(&[]);
        let report = Reconciler::new(&store, Deduplicator).run().unwrap();
        assert_eq!(report.status(), RunStatus::UpToDate);
        assert_eq!(report.status().to_string(), "nothing to do");
        assert!(!store.exists.get());
    }

    #[test]
    fn processes_all_pending_in_ascending_order() {
        let store = MemoryStore::with_batches(&[(30, 2), (10, 4), (20, 1)]);
        let report = Reconciler::new(&store, Deduplicator).run().unwrap();

        let order: Vec<Marker> = report.markers.iter().map(|r| r.marker).collect();
        assert_eq!(order, vec![m(10), m(20), m(30)]);
        assert_eq!(report.status(), RunStatus::Succeeded { processed: 3, skipped: 0 });
        assert_eq!(report.mode, WriteMode::Create);
        assert_eq!(store.refs(), vec![m(10), m(20), m(30)]);
    }

    #[test]
    fn stamps_are_fresh_per_marker() {
        let store = MemoryStore::with_batches(&[(1, 2), (2, 2)]);
        let report = Reconciler::new(&store, Deduplicator).run().unwrap();
        let stamps: Vec<Marker> = report
            .markers
            .iter()
            .filter_map(|r| match r.outcome {
                MarkerOutcome::Done { stamp, .. } => Some(stamp),
                _ => None,
            })
            .collect();
        assert_eq!(stamps, vec![m(1000), m(1001)]);
        let downstream = store.downstream.borrow();
        assert!(downstream
            .iter()
            .all(|r| r.cleaned_at == if r.source_ingested_at == m(1) { m(1000) } else { m(1001) }));
    }

    #[test]
    fn only_first_commit_creates_destination() {
        let store = MemoryStore::with_batches(&[(1, 1), (2, 1)]);
        let report = Reconciler::new(&store, Deduplicator).run().unwrap();
        let created: Vec<bool> = report
            .markers
            .iter()
            .map(|r| matches!(r.outcome, MarkerOutcome::Done { created_destination: true, .. }))
            .collect();
        assert_eq!(created, vec![true, false]);
    }

    #[test]
    fn second_run_is_idempotent() {
        let store = MemoryStore::with_batches(&[(1, 4), (2, 3)]);
        Reconciler::new(&store, Deduplicator).run().unwrap();
        let rows_after_first = store.downstream.borrow().len();

        let second = Reconciler::new(&store, Deduplicator).run().unwrap();
        assert_eq!(second.status(), RunStatus::UpToDate);
        assert_eq!(second.mode, WriteMode::Append);
        assert_eq!(store.downstream.borrow().len(), rows_after_first);
    }

    #[test]
    fn new_upstream_batch_is_picked_up_next_run() {
        let store = MemoryStore::with_batches(&[(1, 2)]);
        Reconciler::new(&store, Deduplicator).run().unwrap();
        store.add_batch(m(2), 2);

        let report = Reconciler::new(&store, Deduplicator).run().unwrap();
        assert_eq!(report.markers.len(), 1);
        assert_eq!(report.markers[0].marker, m(2));
        assert_eq!(store.refs(), vec![m(1), m(2)]);
    }

    #[test]
    fn transform_failure_isolated_to_its_marker() {
        let store = MemoryStore::with_batches(&[(1, 2), (2, 2), (3, 2)]);
        let transform = FailOn {
            inner: Deduplicator,
            marker: m(2),
        };
        let report = Reconciler::new(&store, transform).run().unwrap();

        assert_eq!(report.status(), RunStatus::PartiallyFailed { failed: 1, total: 3 });
        assert_eq!(
            report.status().to_string(),
            "processed with 1 of 3 markers failed"
        );
        assert!(matches!(
            report.markers[1].outcome,
            MarkerOutcome::Failed { kind: FailureKind::Transform, .. }
        ));
        assert_eq!(store.refs(), vec![m(1), m(3)]);

        // Next run retries only the failed marker.
        let retry = Reconciler::new(&store, Deduplicator).run().unwrap();
        assert_eq!(retry.markers.len(), 1);
        assert_eq!(retry.markers[0].marker, m(2));
        assert_eq!(store.refs(), vec![m(1), m(2), m(3)]);
    }

    #[test]
    fn read_and_write_failures_are_classified() {
        let mut store = MemoryStore::with_batches(&[(1, 1), (2, 1), (3, 1)]);
        store.fail_fetch = Some(m(1));
        store.fail_commit = Some(m(3));
        let report = Reconciler::new(&store, Deduplicator).run().unwrap();

        let kinds: Vec<Option<FailureKind>> = report
            .markers
            .iter()
            .map(|r| match r.outcome {
                MarkerOutcome::Failed { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![Some(FailureKind::SourceRead), None, Some(FailureKind::Write)]
        );
        assert_eq!(store.refs(), vec![m(2)]);
    }

    #[test]
    fn unreachable_store_aborts_run() {
        let store = MemoryStore {
            unreachable: true,
            ..MemoryStore::with_batches(&[(1, 1)])
        };
        let err = Reconciler::new(&store, Deduplicator).run().unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Connectivity { boundary: Boundary::BronzeToSilver, .. }
        ));
        assert!(store.downstream.borrow().is_empty());
    }

    #[test]
    fn empty_batch_revisited_by_default() {
        let store = MemoryStore {
            vanish: [m(2)].into(),
            ..MemoryStore::with_batches(&[(1, 1), (2, 1)])
        };
        let report = Reconciler::new(&store, Deduplicator).run().unwrap();
        assert_eq!(report.markers[1].outcome, MarkerOutcome::Empty { settled: false });
        assert_eq!(report.status(), RunStatus::Succeeded { processed: 1, skipped: 1 });

        let again = Reconciler::new(&store, Deduplicator).pending().unwrap();
        assert_eq!(again.markers, vec![m(2)]);
    }

    #[test]
    fn empty_batch_settled_when_configured() {
        let store = MemoryStore {
            vanish: [m(2)].into(),
            ..MemoryStore::with_batches(&[(1, 1), (2, 1)])
        };
        let report = Reconciler::new(&store, Deduplicator)
            .with_empty_policy(EmptyBatchPolicy::Settle)
            .run()
            .unwrap();
        assert_eq!(report.markers[1].outcome, MarkerOutcome::Empty { settled: true });

        let again = Reconciler::new(&store, Deduplicator).pending().unwrap();
        assert!(again.markers.is_empty());
    }

    #[test]
    fn report_serializes_marker_outcomes() {
        let store = MemoryStore::with_batches(&[(1, 2)]);
        let report = Reconciler::new(&store, Deduplicator).run().unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["boundary"], "bronze_to_silver");
        assert_eq!(json["markers"][0]["marker"], 1);
        assert_eq!(json["markers"][0]["status"], "done");
        assert_eq!(json["markers"][0]["rows_in"], 2);
        assert_eq!(json["markers"][0]["rows_out"], 1);
    }

    #[test]
    fn policy_parses_from_str() {
        assert_eq!("Settle".parse::<EmptyBatchPolicy>().unwrap(), EmptyBatchPolicy::Settle);
        assert!("drop".parse::<EmptyBatchPolicy>().is_err());
    }
}
