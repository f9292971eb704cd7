//! The interval merge protocol (spec.md §4.2 "Interval merge protocol",
//! §3 "Interval index", §9 Design Notes "Interval fragmentation limit").
//!
//! This is deliberately storage-agnostic: it drives the delete/recompute/
//! reinsert loop against a small trait so the same logic is exercised by
//! an in-memory fake in tests and by the real Postgres-backed store.

use thiserror::Error;

use crate::interval::{Interval, IntervalSet};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntervalIndexError {
    #[error("fragment {fragment_id} has fragmented past syncStoreMaxIntervals ({max_intervals}); this is unrecoverable without manual compaction")]
    Fragmented { fragment_id: String, max_intervals: usize },
}

/// Storage-side primitives the merge protocol needs. Implementations must
/// perform `delete_up_to` and `insert_rows` for the same fragment within a
/// single transaction (spec.md §4.2: "All within one transaction per
/// fragment").
pub trait IntervalRowAccess {
    /// Deletes and returns up to `limit` stored interval rows for
    /// `fragment_id`, in no particular order.
    fn delete_up_to(&mut self, fragment_id: &str, limit: usize) -> Vec<Interval>;

    /// Inserts `intervals` as the full stored row set for `fragment_id`
    /// (replacing what `delete_up_to` removed across however many passes
    /// this call made).
    fn insert_rows(&mut self, fragment_id: &str, intervals: &[Interval]);
}

/// Merges `new_interval` into the stored intervals for `fragment_id`,
/// following spec.md §4.2's iterative delete/recompute/reinsert protocol.
/// `max_intervals` is `syncStoreMaxIntervals`: the fragmentation cap.
pub fn insert_interval(
    access: &mut impl IntervalRowAccess,
    fragment_id: &str,
    new_interval: Interval,
    max_intervals: usize,
) -> Result<(), IntervalIndexError> {
    let mut accumulated = IntervalSet::from_intervals([new_interval]);

    loop {
        let deleted = access.delete_up_to(fragment_id, max_intervals);
        let deleted_count = deleted.len();
        accumulated = accumulated.union(&IntervalSet::from_intervals(deleted));

        if deleted_count == max_intervals && accumulated.as_slice().len() >= max_intervals {
            return Err(IntervalIndexError::Fragmented {
                fragment_id: fragment_id.to_string(),
                max_intervals,
            });
        }

        access.insert_rows(fragment_id, accumulated.as_slice());

        if deleted_count < max_intervals {
            return Ok(());
        }
        // A full batch came back: there may be more old rows still stored.
        // Loop again, accumulating them into the same merge.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct InMemoryRows {
        rows: HashMap<String, Vec<Interval>>,
    }

    impl IntervalRowAccess for InMemoryRows {
        fn delete_up_to(&mut self, fragment_id: &str, limit: usize) -> Vec<Interval> {
            let existing = self.rows.entry(fragment_id.to_string()).or_default();
            let take = existing.len().min(limit);
            existing.drain(0..take).collect()
        }

        fn insert_rows(&mut self, fragment_id: &str, intervals: &[Interval]) {
            self.rows.entry(fragment_id.to_string()).or_default().extend_from_slice(intervals);
        }
    }

    #[test]
    fn scenario_a_three_inserts_collapse_to_one_interval() {
        let mut store = InMemoryRows::default();
        insert_interval(&mut store, "frag", Interval::new(0, 10), 100).unwrap();
        insert_interval(&mut store, "frag", Interval::new(20, 30), 100).unwrap();
        insert_interval(&mut store, "frag", Interval::new(10, 20), 100).unwrap();
        assert_eq!(store.rows["frag"], vec![Interval::new(0, 30)]);
    }

    #[test]
    fn disjoint_ranges_stay_separate() {
        let mut store = InMemoryRows::default();
        insert_interval(&mut store, "frag", Interval::new(0, 10), 100).unwrap();
        insert_interval(&mut store, "frag", Interval::new(100, 110), 100).unwrap();
        assert_eq!(store.rows["frag"].len(), 2);
    }

    #[test]
    fn truly_unmergeable_fragment_returns_fragmented_error() {
        let mut store = InMemoryRows::default();
        // Cap of 3: insert four mutually disjoint, non-adjacent intervals.
        // The fourth insert must observe >= 3 stored rows after merging in
        // the new one, none of which coalesce, and fail fatally.
        insert_interval(&mut store, "frag", Interval::new(0, 1), 3).unwrap();
        insert_interval(&mut store, "frag", Interval::new(10, 11), 3).unwrap();
        insert_interval(&mut store, "frag", Interval::new(20, 21), 3).unwrap();
        let result = insert_interval(&mut store, "frag", Interval::new(30, 31), 3);
        assert!(matches!(result, Err(IntervalIndexError::Fragmented { .. })));
    }
}
