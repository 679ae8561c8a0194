//! Silver → gold: per-route, per-travel-date totals for one cleaned batch.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::error::TransformError;
use crate::marker::{Boundary, Marker};
use crate::reconcile::{Transform, Transformed};
use crate::record::{CleanedRecord, DimensionKey, SummaryRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    pub rows_in: usize,
    pub groups: usize,
}

#[derive(Default)]
struct Accumulator<'a> {
    passengers: i64,
    sales: f64,
    batches: HashSet<&'a str>,
}

/// Aggregate one cleaned batch by dimensional key.
///
/// Output rows are ordered by (route, travel date), carry `cleaned_at` as
/// their back-reference, and share the `summarized_at` stamp.
pub fn aggregate_batch(
    cleaned_at: Marker,
    summarized_at: Marker,
    rows: &[CleanedRecord],
) -> Result<(Vec<SummaryRecord>, AggregateStats), TransformError> {
    let mut groups: BTreeMap<DimensionKey, Accumulator<'_>> = BTreeMap::new();

    for row in rows {
        if row.cleaned_at != cleaned_at {
            return Err(TransformError::ForeignMarker {
                expected: cleaned_at,
                found: row.cleaned_at,
                sequence: row.sequence_in_batch,
            });
        }
        let acc = groups.entry(row.booking.dimension_key()).or_default();
        acc.passengers = acc
            .passengers
            .checked_add(row.booking.passenger_count)
            .ok_or_else(|| {
                TransformError::Invalid(format!(
                    "passenger total overflows for route {}",
                    row.booking.origin_destination
                ))
            })?;
        acc.sales += row.booking.sale_amount;
        acc.batches.insert(row.batch_id.as_str());
    }

    let stats = AggregateStats {
        rows_in: rows.len(),
        groups: groups.len(),
    };
    let summaries = groups
        .into_iter()
        .map(|(key, acc)| SummaryRecord {
            origin_destination: key.origin_destination,
            travel_date: key.travel_date,
            total_passengers: acc.passengers,
            total_sales: acc.sales,
            unique_batches: acc.batches.len() as i64,
            source_cleaned_at: cleaned_at,
            summarized_at,
        })
        .collect();
    Ok((summaries, stats))
}

/// [`Transform`] for the silver → gold boundary.
#[derive(Debug, Default, Clone, Copy)]
pub struct Aggregator;

impl Transform for Aggregator {
    type Input = CleanedRecord;
    type Output = SummaryRecord;

    const BOUNDARY: Boundary = Boundary::SilverToGold;

    fn apply(
        &self,
        source: Marker,
        stamp: Marker,
        rows: Vec<CleanedRecord>,
    ) -> Result<Transformed<SummaryRecord>, TransformError> {
        let (rows, stats) = aggregate_batch(source, stamp, &rows)?;
        debug!(
            marker = %source,
            rows_in = stats.rows_in,
            groups = stats.groups,
            "aggregated batch"
        );
        Ok(Transformed {
            rows,
            rows_in: stats.rows_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Booking;
    use chrono::NaiveDate;

    const S1: Marker = Marker::new(10);
    const G1: Marker = Marker::new(11);

    fn cleaned(route: &str, day: u32, batch: &str, passengers: i64, amount: f64) -> CleanedRecord {
        CleanedRecord {
            booking: Booking {
                booking_date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
                travel_date: NaiveDate::from_ymd_opt(2025, 7, day).unwrap(),
                origin_destination: route.into(),
                passenger_count: passengers,
                sale_amount: amount,
            },
            batch_id: batch.into(),
            source_ref: "f.csv".into(),
            sequence_in_batch: passengers,
            source_ingested_at: Marker::new(9),
            cleaned_at: S1,
        }
    }

    #[test]
    fn sums_and_counts_per_dimension() {
        let rows = vec![
            cleaned("DEL-BOM", 20, "b1", 100, 1000.0),
            cleaned("DEL-BOM", 20, "b1", 150, 500.5),
            cleaned("DEL-BOM", 21, "b1", 10, 10.0),
            cleaned("MAA-HYD", 20, "b1", 300, 42.0),
        ];
        let (summary, stats) = aggregate_batch(S1, G1, &rows).unwrap();

        assert_eq!(stats, AggregateStats { rows_in: 4, groups: 3 });
        assert_eq!(summary.len(), 3);

        let first = &summary[0];
        assert_eq!(first.origin_destination, "DEL-BOM");
        assert_eq!(first.travel_date, NaiveDate::from_ymd_opt(2025, 7, 20).unwrap());
        assert_eq!(first.total_passengers, 250);
        assert!((first.total_sales - 1500.5).abs() < 1e-9);
        assert_eq!(first.unique_batches, 1);
        assert!(summary.iter().all(|s| s.source_cleaned_at == S1 && s.summarized_at == G1));
    }

    #[test]
    fn unique_batches_counts_distinct_tokens() {
        let rows = vec![
            cleaned("DEL-BOM", 20, "b1", 1, 1.0),
            cleaned("DEL-BOM", 20, "b2", 2, 1.0),
            cleaned("DEL-BOM", 20, "b2", 3, 1.0),
        ];
        let (summary, _) = aggregate_batch(S1, G1, &rows).unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].unique_batches, 2);
        assert_eq!(summary[0].total_passengers, 6);
    }

    #[test]
    fn each_dimension_appears_once() {
        let rows: Vec<CleanedRecord> = (0..30)
            .map(|i| cleaned(["A-B", "C-D"][i % 2], 20 + (i % 3) as u32, "b", i as i64, 1.0))
            .collect();
        let (summary, stats) = aggregate_batch(S1, G1, &rows).unwrap();
        let keys: HashSet<_> = summary.iter().map(|s| s.dimension_key()).collect();
        assert_eq!(keys.len(), summary.len());
        assert_eq!(stats.groups, 6);
        let total: i64 = summary.iter().map(|s| s.total_passengers).sum();
        assert_eq!(total, (0..30).sum::<i64>());
    }

    #[test]
    fn output_is_sorted_by_dimension() {
        let rows = vec![
            cleaned("MAA-HYD", 20, "b", 1, 1.0),
            cleaned("DEL-BOM", 22, "b", 1, 1.0),
            cleaned("DEL-BOM", 21, "b", 1, 1.0),
        ];
        let (summary, _) = aggregate_batch(S1, G1, &rows).unwrap();
        let order: Vec<_> = summary
            .iter()
            .map(|s| (s.origin_destination.as_str(), s.travel_date.to_string()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("DEL-BOM", "2025-07-21".to_string()),
                ("DEL-BOM", "2025-07-22".to_string()),
                ("MAA-HYD", "2025-07-20".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_rows_from_another_cleaned_batch() {
        let mut stray = cleaned("DEL-BOM", 20, "b", 1, 1.0);
        stray.cleaned_at = Marker::new(77);
        let err = aggregate_batch(S1, G1, &[stray]).unwrap_err();
        assert!(matches!(err, TransformError::ForeignMarker { .. }));
    }

    #[test]
    fn passenger_overflow_is_a_transform_error() {
        let rows = vec![
            cleaned("DEL-BOM", 20, "b", i64::MAX, 1.0),
            cleaned("DEL-BOM", 20, "b", 1, 1.0),
        ];
        let err = aggregate_batch(S1, G1, &rows).unwrap_err();
        assert!(matches!(err, TransformError::Invalid(_)));
    }
}
