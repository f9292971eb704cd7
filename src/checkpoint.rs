//! Checkpoints (spec.md §3, §8 invariant 4): a total order over every event
//! the sync engine can produce, spanning chains, event kinds, and filters.
//!
//! A checkpoint is the 6-tuple
//! `(blockTimestamp, chainId, blockNumber, transactionIndex, eventType,
//! eventIndex)`. It is encoded as a single fixed-width, zero-padded,
//! lexicographically-comparable string so that ordering by the raw bytes
//! (e.g. a SQL `ORDER BY checkpoint` or `Ord` on the `String` itself) gives
//! exactly the tuple order — no decoding required to compare two
//! checkpoints.

use std::fmt;
use thiserror::Error;

/// Event-kind discriminant; its encoding is a single ASCII digit so the
/// ordering `Block < Log < CallTrace` (spec.md's chosen tie-break order
/// within a transaction) falls out of plain string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventType {
    Block,
    Log,
    CallTrace,
}

impl EventType {
    fn digit(self) -> u8 {
        match self {
            EventType::Block => 0,
            EventType::Log => 1,
            EventType::CallTrace => 2,
        }
    }

    fn from_digit(digit: u8) -> Result<Self, CheckpointError> {
        match digit {
            0 => Ok(EventType::Block),
            1 => Ok(EventType::Log),
            2 => Ok(EventType::CallTrace),
            other => Err(CheckpointError::InvalidEventType(other)),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Block => write!(f, "block"),
            EventType::Log => write!(f, "log"),
            EventType::CallTrace => write!(f, "call_trace"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint string has wrong length: expected {expected}, got {got}")]
    WrongLength { expected: usize, got: usize },
    #[error("checkpoint field {field} is not a valid unsigned integer: {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("checkpoint event type digit {0} is out of range")]
    InvalidEventType(u8),
}

/// Field widths, in decimal digits. `u64::MAX` is 20 digits; `transaction_index`
/// and `event_index` are bounded well below that but we size generously so a
/// pathological block (e.g. a synthetic devnet) can't silently overflow the
/// encoding into a different width and break comparability.
const WIDTH_BLOCK_TIMESTAMP: usize = 20;
const WIDTH_CHAIN_ID: usize = 20;
const WIDTH_BLOCK_NUMBER: usize = 20;
const WIDTH_TRANSACTION_INDEX: usize = 10;
const WIDTH_EVENT_TYPE: usize = 1;
const WIDTH_EVENT_INDEX: usize = 10;

const TOTAL_WIDTH: usize = WIDTH_BLOCK_TIMESTAMP
    + WIDTH_CHAIN_ID
    + WIDTH_BLOCK_NUMBER
    + WIDTH_TRANSACTION_INDEX
    + WIDTH_EVENT_TYPE
    + WIDTH_EVENT_INDEX;

/// A single point in the total event order (spec.md §3 "Checkpoint").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checkpoint {
    pub block_timestamp: u64,
    pub chain_id: u64,
    pub block_number: u64,
    pub transaction_index: u64,
    pub event_type: EventType,
    pub event_index: u64,
}

impl Checkpoint {
    pub fn new(
        block_timestamp: u64,
        chain_id: u64,
        block_number: u64,
        transaction_index: u64,
        event_type: EventType,
        event_index: u64,
    ) -> Self {
        Checkpoint { block_timestamp, chain_id, block_number, transaction_index, event_type, event_index }
    }

    /// Encodes the tuple as a fixed-width zero-padded string. Two
    /// checkpoints compare equal under `Ord` iff their encodings compare
    /// equal under `str`/byte `Ord` (spec.md §8 invariant 4).
    pub fn encode(&self) -> String {
        format!(
            "{:0w0$}{:0w1$}{:0w2$}{:0w3$}{:0w4$}{:0w5$}",
            self.block_timestamp,
            self.chain_id,
            self.block_number,
            self.transaction_index,
            self.event_type.digit(),
            self.event_index,
            w0 = WIDTH_BLOCK_TIMESTAMP,
            w1 = WIDTH_CHAIN_ID,
            w2 = WIDTH_BLOCK_NUMBER,
            w3 = WIDTH_TRANSACTION_INDEX,
            w4 = WIDTH_EVENT_TYPE,
            w5 = WIDTH_EVENT_INDEX,
        )
    }

    pub fn decode(encoded: &str) -> Result<Self, CheckpointError> {
        if encoded.len() != TOTAL_WIDTH {
            return Err(CheckpointError::WrongLength { expected: TOTAL_WIDTH, got: encoded.len() });
        }

        let mut offset = 0;
        let mut take = |width: usize| {
            let field = &encoded[offset..offset + width];
            offset += width;
            field
        };

        let parse = |field: &str, name: &'static str| -> Result<u64, CheckpointError> {
            field.parse::<u64>().map_err(|_| CheckpointError::InvalidField { field: name, value: field.to_string() })
        };

        let block_timestamp = parse(take(WIDTH_BLOCK_TIMESTAMP), "block_timestamp")?;
        let chain_id = parse(take(WIDTH_CHAIN_ID), "chain_id")?;
        let block_number = parse(take(WIDTH_BLOCK_NUMBER), "block_number")?;
        let transaction_index = parse(take(WIDTH_TRANSACTION_INDEX), "transaction_index")?;
        let event_type_field = take(WIDTH_EVENT_TYPE);
        let event_type_digit = parse(event_type_field, "event_type")? as u8;
        let event_type = EventType::from_digit(event_type_digit)?;
        let event_index = parse(take(WIDTH_EVENT_INDEX), "event_index")?;

        Ok(Checkpoint { block_timestamp, chain_id, block_number, transaction_index, event_type, event_index })
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cp(block_number: u64, transaction_index: u64, event_type: EventType, event_index: u64) -> Checkpoint {
        Checkpoint::new(1_700_000_000, 1, block_number, transaction_index, event_type, event_index)
    }

    #[test]
    fn round_trip_preserves_all_fields() {
        let original = cp(123, 4, EventType::Log, 2);
        let encoded = original.encode();
        let decoded = Checkpoint::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn string_order_matches_tuple_order() {
        let earlier = cp(100, 0, EventType::Block, 0);
        let later = cp(101, 0, EventType::Block, 0);
        assert!(earlier < later);
        assert!(earlier.encode() < later.encode());
    }

    #[test]
    fn event_type_breaks_ties_within_same_transaction() {
        let block_event = cp(100, 5, EventType::Block, 0);
        let log_event = cp(100, 5, EventType::Log, 0);
        let trace_event = cp(100, 5, EventType::CallTrace, 0);
        assert!(block_event.encode() < log_event.encode());
        assert!(log_event.encode() < trace_event.encode());
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = Checkpoint::decode("too-short").unwrap_err();
        assert!(matches!(err, CheckpointError::WrongLength { .. }));
    }

    #[test]
    fn decode_rejects_non_numeric_field() {
        let mut encoded = cp(1, 1, EventType::Log, 1).encode();
        encoded.replace_range(0..1, "x");
        let err = Checkpoint::decode(&encoded).unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidField { .. }));
    }

    #[test]
    fn chain_id_participates_in_ordering_before_block_number() {
        let chain_one = Checkpoint::new(100, 1, 0, 0, EventType::Block, 0);
        let chain_two = Checkpoint::new(100, 2, 0, 0, EventType::Block, 0);
        assert!(chain_one.encode() < chain_two.encode());
    }
}
