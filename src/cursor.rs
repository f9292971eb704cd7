//! Checkpoint Cursor (spec.md §4.6): merges the independently-checkpoint-ordered
//! event streams produced per filter fragment into one globally-ordered
//! stream, and tracks how far that merged stream has advanced so sync can
//! resume from exactly where it left off.
//!
//! Each fragment's own event sequence is already sorted by `Checkpoint`
//! (spec.md §8 invariant 4 holds per-fragment on the way in); the cursor's
//! job is the k-way merge across fragments plus the de-dup of the rare case
//! where two fragments reproduce the same logical event (e.g. an address
//! matched by both an enumerated fragment and its factory twin).

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::checkpoint::Checkpoint;

/// One decoded event, tagged with the checkpoint that orders it and the id
/// of the fragment that produced it (spec.md §4.3's `Fragment::id`), so
/// downstream consumers can tell which filter matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorEvent<T> {
    pub checkpoint: Checkpoint,
    pub fragment_id: String,
    pub payload: T,
}

/// A contiguous run of events sharing a position in the merged order,
/// handed to the pipeline as one atomic unit (spec.md §6 `IndexingPipeline`
/// consumes whole batches, not individual events, so a transaction's logs
/// land together).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch<T> {
    pub events: Vec<CursorEvent<T>>,
}

impl<T> Default for EventBatch<T> {
    fn default() -> Self {
        EventBatch { events: Vec::new() }
    }
}

impl<T> EventBatch<T> {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// The checkpoint of the last event in the batch — the position the
    /// cursor should be persisted at once this batch is durably handled.
    pub fn high_watermark(&self) -> Option<Checkpoint> {
        self.events.last().map(|e| e.checkpoint)
    }
}

/// One input stream feeding the merge: events already in ascending
/// checkpoint order, as produced by a single filter fragment.
struct Source<T> {
    fragment_id: String,
    events: std::vec::IntoIter<(Checkpoint, T)>,
}

/// Merges per-fragment ordered event streams into one globally-ordered
/// stream and remembers the last checkpoint it has handed out, so a
/// restart can resume past it without re-delivering already-seen events.
pub struct CheckpointCursor<T> {
    last_emitted: Option<Checkpoint>,
}

impl<T> Default for CheckpointCursor<T> {
    fn default() -> Self {
        CheckpointCursor { last_emitted: None }
    }
}

impl<T> CheckpointCursor<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resumes a cursor from a previously persisted checkpoint (spec.md
    /// §4.8 Metadata Store holds this value across restarts).
    pub fn resume_from(checkpoint: Checkpoint) -> Self {
        CheckpointCursor { last_emitted: Some(checkpoint) }
    }

    pub fn position(&self) -> Option<Checkpoint> {
        self.last_emitted
    }

    /// K-way merges `sources` (each a `(fragment_id, ascending events)`
    /// pair) into a single batch in checkpoint order, skipping anything at
    /// or before the cursor's current position (already-delivered events
    /// on resume) and any exact-duplicate checkpoint across fragments.
    pub fn merge(&mut self, sources: Vec<(String, Vec<(Checkpoint, T)>)>) -> EventBatch<T> {
        let mut heap: BinaryHeap<Reverse<HeapEntryKey>> = BinaryHeap::new();
        let mut iters: Vec<Source<T>> = Vec::with_capacity(sources.len());

        for (fragment_id, events) in sources {
            iters.push(Source { fragment_id, events: events.into_iter() });
        }

        // Seed the heap with one entry per source.
        let mut payload_slots: Vec<Option<(usize, T)>> = Vec::new();
        for (index, source) in iters.iter_mut().enumerate() {
            if let Some((checkpoint, payload)) = source.events.next() {
                let slot = payload_slots.len();
                payload_slots.push(Some((index, payload)));
                heap.push(Reverse(HeapEntryKey { checkpoint, source_index: index, slot }));
            }
        }

        let mut merged = Vec::new();
        let mut last_seen: Option<Checkpoint> = None;

        while let Some(Reverse(entry)) = heap.pop() {
            let (_, payload) = payload_slots[entry.slot].take().expect("slot consumed once");

            let skip = self.last_emitted.map(|pos| entry.checkpoint <= pos).unwrap_or(false);
            let duplicate = last_seen == Some(entry.checkpoint);

            if !skip && !duplicate {
                merged.push(CursorEvent {
                    checkpoint: entry.checkpoint,
                    fragment_id: iters[entry.source_index].fragment_id.clone(),
                    payload,
                });
                last_seen = Some(entry.checkpoint);
            }

            if let Some((checkpoint, payload)) = iters[entry.source_index].events.next() {
                let slot = payload_slots.len();
                payload_slots.push(Some((entry.source_index, payload)));
                heap.push(Reverse(HeapEntryKey { checkpoint, source_index: entry.source_index, slot }));
            }
        }

        if let Some(batch_high) = merged.last().map(|e: &CursorEvent<T>| e.checkpoint) {
            self.last_emitted = Some(batch_high);
        }

        EventBatch { events: merged }
    }
}

struct HeapEntryKey {
    checkpoint: Checkpoint,
    #[allow(dead_code)]
    source_index: usize,
    slot: usize,
}

impl PartialEq for HeapEntryKey {
    fn eq(&self, other: &Self) -> bool {
        self.checkpoint == other.checkpoint
    }
}
impl Eq for HeapEntryKey {}
impl PartialOrd for HeapEntryKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntryKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.checkpoint.cmp(&other.checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::EventType;

    fn cp(block_number: u64, event_index: u64) -> Checkpoint {
        Checkpoint::new(1_700_000_000, 1, block_number, 0, EventType::Log, event_index)
    }

    #[test]
    fn scenario_d_merges_two_fragments_into_global_order() {
        // spec.md §8 scenario (d): fragment A emits at blocks 1,3,5;
        // fragment B emits at blocks 2,4; merged order is strictly
        // increasing by checkpoint regardless of source.
        let a = vec![(cp(1, 0), "a1"), (cp(3, 0), "a3"), (cp(5, 0), "a5")];
        let b = vec![(cp(2, 0), "b2"), (cp(4, 0), "b4")];

        let mut cursor = CheckpointCursor::new();
        let batch = cursor.merge(vec![("frag-a".to_string(), a), ("frag-b".to_string(), b)]);

        let checkpoints: Vec<Checkpoint> = batch.events.iter().map(|e| e.checkpoint).collect();
        let mut sorted = checkpoints.clone();
        sorted.sort();
        assert_eq!(checkpoints, sorted);
        assert_eq!(batch.len(), 5);
    }

    #[test]
    fn resume_skips_already_delivered_events() {
        let mut cursor = CheckpointCursor::resume_from(cp(3, 0));
        let a = vec![(cp(1, 0), "a1"), (cp(3, 0), "a3"), (cp(5, 0), "a5")];
        let batch = cursor.merge(vec![("frag-a".to_string(), a)]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.events[0].payload, "a5");
    }

    #[test]
    fn duplicate_checkpoints_across_fragments_collapse_to_one_event() {
        let a = vec![(cp(1, 0), "seen-by-a")];
        let b = vec![(cp(1, 0), "seen-by-b")];
        let mut cursor = CheckpointCursor::new();
        let batch = cursor.merge(vec![("frag-a".to_string(), a), ("frag-b".to_string(), b)]);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn high_watermark_tracks_last_event_in_batch() {
        let a = vec![(cp(1, 0), "a1"), (cp(2, 0), "a2")];
        let mut cursor = CheckpointCursor::new();
        let batch = cursor.merge(vec![("frag-a".to_string(), a)]);
        assert_eq!(batch.high_watermark(), Some(cp(2, 0)));
        assert_eq!(cursor.position(), Some(cp(2, 0)));
    }
}
