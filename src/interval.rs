//! Interval algebra (spec.md §3, §8 invariant 2).
//!
//! `Interval = [start, end]` inclusive `u64`. Sets of intervals are kept in
//! canonical normal form: sorted ascending by `start`, pairwise disjoint,
//! and non-adjacent (a gap of at least one block number separates any two
//! stored intervals — adjacent ranges get merged into one). This is the
//! data structure the interval index (spec.md §4.2) persists one of per
//! filter fragment.

use std::cmp::{max, min};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    pub start: u64,
    pub end: u64,
}

impl Interval {
    pub fn new(start: u64, end: u64) -> Self {
        assert!(start <= end, "interval start must not exceed end");
        Interval { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    fn overlaps_or_touches(&self, other: &Interval) -> bool {
        // Touching means adjacent (end + 1 == other.start), which we also
        // merge per spec.md's "no overlap, no adjacent pairs" invariant.
        self.start <= other.end.saturating_add(1) && other.start <= self.end.saturating_add(1)
    }
}

/// A canonical-normal-form set of intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    intervals: Vec<Interval>,
}

impl IntervalSet {
    pub fn empty() -> Self {
        IntervalSet { intervals: vec![] }
    }

    pub fn from_intervals(intervals: impl IntoIterator<Item = Interval>) -> Self {
        let mut set = IntervalSet::empty();
        for interval in intervals {
            set = set.union(&IntervalSet { intervals: vec![interval] });
        }
        set
    }

    pub fn as_slice(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Total count of block numbers covered across all intervals.
    pub fn sum(&self) -> u64 {
        self.intervals.iter().map(|i| i.len()).sum()
    }

    /// Merges two interval sets, coalescing overlapping and adjacent ranges.
    pub fn union(&self, other: &IntervalSet) -> IntervalSet {
        let mut all: Vec<Interval> = self.intervals.iter().chain(other.intervals.iter()).copied().collect();
        all.sort();

        let mut merged: Vec<Interval> = Vec::with_capacity(all.len());
        for interval in all.drain(..) {
            match merged.last_mut() {
                Some(last) if last.overlaps_or_touches(&interval) => {
                    last.end = max(last.end, interval.end);
                }
                _ => merged.push(interval),
            }
        }

        IntervalSet { intervals: merged }
    }

    /// Self minus `other`: the ranges in `self` not covered by any interval
    /// in `other`.
    pub fn difference(&self, other: &IntervalSet) -> IntervalSet {
        let mut result = Vec::new();

        for &interval in &self.intervals {
            let mut remaining = vec![interval];

            for &cut in &other.intervals {
                let mut next_remaining = Vec::new();
                for piece in remaining {
                    if cut.end < piece.start || cut.start > piece.end {
                        next_remaining.push(piece);
                        continue;
                    }
                    if cut.start > piece.start {
                        next_remaining.push(Interval::new(piece.start, cut.start - 1));
                    }
                    if cut.end < piece.end {
                        next_remaining.push(Interval::new(cut.end + 1, piece.end));
                    }
                }
                remaining = next_remaining;
            }

            result.extend(remaining);
        }

        result.sort();
        IntervalSet { intervals: result }
    }

    /// Intersection of two sets (pairwise overlap of their intervals).
    pub fn intersection(&self, other: &IntervalSet) -> IntervalSet {
        let mut result = Vec::new();
        for &a in &self.intervals {
            for &b in &other.intervals {
                let start = max(a.start, b.start);
                let end = min(a.end, b.end);
                if start <= end {
                    result.push(Interval::new(start, end));
                }
            }
        }
        result.sort();
        // Intersections of two normal-form sets are already disjoint and
        // non-adjacent by construction, but union() through an empty set
        // re-normalizes defensively in case of boundary-adjacent pieces.
        IntervalSet::from_intervals(result)
    }

    /// Intersection across many sets, left-folded. Used by the Raw Sync
    /// Store's `getIntervals` (spec.md §4.2) to combine per-fragment
    /// coverage into "coverage of the whole filter".
    pub fn intersection_many<'a>(sets: impl IntoIterator<Item = &'a IntervalSet>) -> IntervalSet {
        let mut iter = sets.into_iter();
        let Some(first) = iter.next() else {
            return IntervalSet::empty();
        };
        let mut acc = first.clone();
        for set in iter {
            acc = acc.intersection(set);
            if acc.is_empty() {
                break;
            }
        }
        acc
    }

    /// Splits the covered ranges into chunks of at most `max_size` blocks
    /// each, used by historical sync to bound RPC batch sizes.
    pub fn chunks(&self, max_size: u64) -> Vec<Interval> {
        assert!(max_size > 0);
        let mut chunks = Vec::new();
        for &interval in &self.intervals {
            let mut start = interval.start;
            while start <= interval.end {
                let end = min(start.saturating_add(max_size - 1), interval.end);
                chunks.push(Interval::new(start, end));
                if end == u64::MAX {
                    break;
                }
                start = end + 1;
            }
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ranges: &[(u64, u64)]) -> IntervalSet {
        IntervalSet::from_intervals(ranges.iter().map(|&(s, e)| Interval::new(s, e)))
    }

    #[test]
    fn scenario_a_interval_merge() {
        // spec.md §8 scenario (a): insert [0,10], then [20,30], then [10,20]
        // collapses to exactly [[0,30]].
        let mut accumulated = IntervalSet::empty();
        accumulated = accumulated.union(&set(&[(0, 10)]));
        accumulated = accumulated.union(&set(&[(20, 30)]));
        accumulated = accumulated.union(&set(&[(10, 20)]));
        assert_eq!(accumulated.as_slice(), &[Interval::new(0, 30)]);
    }

    #[test]
    fn scenario_b_intersection_across_fragments() {
        // spec.md §8 scenario (b): fragment-A covers [0,100], fragment-B
        // covers [50,200]; getIntervals returns exactly [[50,100]].
        let a = set(&[(0, 100)]);
        let b = set(&[(50, 200)]);
        let result = IntervalSet::intersection_many([&a, &b]);
        assert_eq!(result.as_slice(), &[Interval::new(50, 100)]);
    }

    #[test]
    fn union_merges_adjacent_ranges() {
        let result = set(&[(0, 9)]).union(&set(&[(10, 19)]));
        assert_eq!(result.as_slice(), &[Interval::new(0, 19)]);
    }

    #[test]
    fn union_keeps_non_adjacent_ranges_separate() {
        let result = set(&[(0, 9)]).union(&set(&[(11, 19)]));
        assert_eq!(result.as_slice(), &[Interval::new(0, 9), Interval::new(11, 19)]);
    }

    #[test]
    fn difference_removes_covered_subranges() {
        let full = set(&[(0, 100)]);
        let covered = set(&[(10, 20), (50, 60)]);
        let remaining = full.difference(&covered);
        assert_eq!(
            remaining.as_slice(),
            &[Interval::new(0, 9), Interval::new(21, 49), Interval::new(61, 100)]
        );
    }

    #[test]
    fn difference_of_disjoint_sets_is_identity() {
        let full = set(&[(0, 10)]);
        let other = set(&[(20, 30)]);
        assert_eq!(full.difference(&other), full);
    }

    #[test]
    fn sum_counts_inclusive_block_numbers() {
        let s = set(&[(0, 9), (20, 29)]);
        assert_eq!(s.sum(), 20);
    }

    #[test]
    fn chunks_splits_large_ranges() {
        let s = set(&[(0, 24)]);
        let chunks = s.chunks(10);
        assert_eq!(
            chunks,
            vec![Interval::new(0, 9), Interval::new(10, 19), Interval::new(20, 24)]
        );
    }

    #[test]
    fn normal_form_invariant_holds_after_many_unions() {
        let mut acc = IntervalSet::empty();
        for (s, e) in [(5, 10), (0, 3), (11, 20), (25, 30), (21, 24)] {
            acc = acc.union(&set(&[(s, e)]));
        }
        // no overlap, no adjacency, sorted
        let intervals = acc.as_slice();
        for window in intervals.windows(2) {
            assert!(window[0].end + 1 < window[1].start, "intervals must not be adjacent or overlapping");
        }
    }
}
