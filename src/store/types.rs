//! Raw entity row shapes (spec.md §3 "Raw entities").

use alloy::primitives::{Address, BlockHash, Bytes, TxHash, B256, U256};

use crate::checkpoint::Checkpoint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRow {
    pub hash: BlockHash,
    pub chain_id: u64,
    pub number: u64,
    pub parent_hash: BlockHash,
    pub timestamp: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRow {
    pub hash: TxHash,
    pub chain_id: u64,
    pub block_hash: BlockHash,
    pub block_number: u64,
    pub transaction_index: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceiptRow {
    pub transaction_hash: TxHash,
    pub chain_id: u64,
    pub status: bool,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
}

/// `id` is synthesized as `chainId:blockNumber:logIndex` (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub id: String,
    pub chain_id: u64,
    pub block_hash: BlockHash,
    pub block_number: u64,
    pub transaction_hash: TxHash,
    pub transaction_index: u64,
    pub log_index: u64,
    pub address: Address,
    pub topic0: Option<B256>,
    pub topic1: Option<B256>,
    pub topic2: Option<B256>,
    pub topic3: Option<B256>,
    pub data: Bytes,
    /// The canonical fragment this log belongs to (spec.md §3 Interval
    /// index), computed by the caller via
    /// `filter::log_fragment_id_for_match` — never re-derived from this
    /// row's own columns, since a `Factory`-sourced or partially-`Null`
    /// filter's fragment id is not recoverable from concrete log data alone.
    pub fragment_id: String,
    pub checkpoint: Checkpoint,
}

/// `id` is synthesized from `transactionHash + traceAddress` (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTraceRow {
    pub id: String,
    pub chain_id: u64,
    pub block_number: u64,
    pub transaction_hash: TxHash,
    pub transaction_position: u64,
    pub trace_address: Vec<u32>,
    pub from: Address,
    pub to: Option<Address>,
    pub input: Bytes,
    pub output: Bytes,
    pub value: U256,
    pub gas: u64,
    pub gas_used: u64,
    pub subtraces: u32,
    pub call_type: String,
    pub error: Option<String>,
    /// See `LogRow::fragment_id` — computed via
    /// `filter::trace_fragment_id_for_match`.
    pub fragment_id: String,
    pub checkpoint: Checkpoint,
}

impl LogRow {
    pub fn synthesize_id(chain_id: u64, block_number: u64, log_index: u64) -> String {
        format!("{chain_id}:{block_number}:{log_index}")
    }
}

impl CallTraceRow {
    pub fn synthesize_id(transaction_hash: TxHash, trace_address: &[u32]) -> String {
        let path = trace_address.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(".");
        format!("{transaction_hash:#x}:{path}")
    }
}
