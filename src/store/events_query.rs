//! `getEvents` query construction (spec.md §4.2, §6 "Persistent state
//! layout"): one UNION ALL sub-query per filter fragment kind, joined back
//! to the owning raw table, ordered by `(checkpoint, filterIndex)`.
//!
//! Modeled as a sum type rather than the source's lazily-decoding proxy
//! objects (spec.md §9 Design Notes "Dynamic event payloads").

use crate::checkpoint::Checkpoint;
use crate::filter::Fragment;

use super::types::{BlockRow, CallTraceRow, LogRow, TransactionRow};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Block { block: BlockRow },
    Log { log: LogRow, transaction: TransactionRow },
    Call { call_trace: CallTraceRow, transaction: TransactionRow },
}

/// One row out of `getEvents`: which configured filter produced it (used
/// as the ordering tie-break, spec.md §4.6), its checkpoint, and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub filter_index: usize,
    pub checkpoint: Checkpoint,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventsPage {
    pub events: Vec<EventRow>,
    pub cursor: Checkpoint,
}

/// Builds the UNION ALL query body for a set of `(filterIndex, fragment)`
/// pairs, parameterized on the `(from, to]` checkpoint window and limit.
/// Each fragment kind projects the unified shape described in spec.md
/// §4.2 before joining back to its owning table.
pub fn build_events_query(
    fragments: &[(usize, Fragment)],
    from: Option<&Checkpoint>,
    to: &Checkpoint,
    limit: usize,
) -> String {
    let mut branches = Vec::with_capacity(fragments.len());

    for (filter_index, fragment) in fragments {
        let (raw_table, id_column, join) = match fragment {
            Fragment::Block(_) => ("blocks", "hash", "blocks b"),
            Fragment::Log(_) => ("logs", "id", "logs l JOIN transactions t ON t.hash = l.transaction_hash"),
            Fragment::Trace(_) => {
                ("call_traces", "id", "call_traces c JOIN transactions t ON t.hash = c.transaction_hash")
            }
        };

        branches.push(format!(
            "SELECT {filter_index} AS filter_index, checkpoint, '{raw_table}' AS source_table, {id_column} AS row_id \
             FROM {join} WHERE fragment_id = '{fragment_id}'",
            fragment_id = fragment.id(),
        ));
    }

    let union = branches.join("\nUNION ALL\n");

    let lower_bound = match from {
        Some(checkpoint) => format!("checkpoint > '{}'", checkpoint.encode()),
        None => "TRUE".to_string(),
    };

    format!(
        "WITH matched AS (\n{union}\n)\n\
         SELECT * FROM matched\n\
         WHERE {lower_bound} AND checkpoint <= '{to}'\n\
         ORDER BY checkpoint ASC, filter_index ASC\n\
         LIMIT {limit}",
        to = to.encode(),
    )
}

/// `cursor` per spec.md §4.2: `to` if the page came back under `limit`,
/// otherwise the last returned event's checkpoint.
pub fn next_cursor(page: &[EventRow], to: Checkpoint, limit: usize) -> Checkpoint {
    if page.len() < limit {
        to
    } else {
        page.last().map(|e| e.checkpoint).unwrap_or(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::EventType;
    use crate::filter::fragment::BlockFragment;

    fn cp(n: u64) -> Checkpoint {
        Checkpoint::new(1_700_000_000, 1, n, 0, EventType::Block, 0)
    }

    #[test]
    fn query_includes_one_branch_per_fragment() {
        let fragments = vec![(
            0usize,
            Fragment::Block(BlockFragment { id: "block:1:1:0".to_string(), chain_id: 1, interval: 1, offset: 0 }),
        )];
        let query = build_events_query(&fragments, None, &cp(100), 50);
        assert!(query.contains("filter_index"));
        assert!(query.contains("LIMIT 50"));
    }

    #[test]
    fn next_cursor_is_window_end_when_page_is_short() {
        assert_eq!(next_cursor(&[], cp(100), 50), cp(100));
    }
}
