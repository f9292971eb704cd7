//! The Raw Sync Store (spec.md §4.2): persistent, content-addressed
//! storage of blocks/transactions/receipts/logs/call-traces plus the
//! interval index, grounded on the teacher's `database/postgres.rs` and
//! `database/sql_type_wrapper.rs`.

pub mod big_encoding;
pub mod events_query;
pub mod interval_index;
pub mod postgres;
pub mod schema;
pub mod types;

pub use big_encoding::BigEncoder;
pub use events_query::{EventPayload, EventRow, EventsPage};
pub use postgres::{PostgresStore, StoreError};

use async_trait::async_trait;
use alloy::primitives::{Address, BlockHash, TxHash};

use crate::checkpoint::Checkpoint;
use crate::filter::{Factory, Filter};
use crate::interval::Interval;

use types::{BlockRow, CallTraceRow, LogRow, TransactionReceiptRow, TransactionRow};

/// The contract every backend (only Postgres is implemented; spec.md's
/// SQLite-class encoding is reachable through `BigEncoder` alone) must
/// satisfy. Table shape per spec.md §4.2.
#[async_trait]
pub trait RawStore: Send + Sync {
    async fn insert_interval(&self, filter: &Filter, interval: Interval) -> Result<(), StoreError>;
    async fn get_intervals(&self, filter: &Filter) -> Result<Vec<Interval>, StoreError>;

    async fn insert_blocks(&self, chain_id: u64, blocks: &[BlockRow]) -> Result<(), StoreError>;
    async fn insert_transactions(&self, chain_id: u64, transactions: &[TransactionRow]) -> Result<(), StoreError>;
    async fn insert_transaction_receipts(
        &self,
        chain_id: u64,
        receipts: &[TransactionReceiptRow],
    ) -> Result<(), StoreError>;
    async fn insert_logs(&self, chain_id: u64, logs: &[LogRow]) -> Result<(), StoreError>;
    async fn insert_call_traces(&self, chain_id: u64, traces: &[CallTraceRow]) -> Result<(), StoreError>;

    async fn has_block(&self, hash: BlockHash) -> Result<bool, StoreError>;
    async fn has_transaction(&self, hash: TxHash) -> Result<bool, StoreError>;
    async fn has_transaction_receipt(&self, hash: TxHash) -> Result<bool, StoreError>;

    async fn get_child_addresses(&self, factory: &Factory, limit: usize) -> Result<Vec<Address>, StoreError>;
    async fn filter_child_addresses(
        &self,
        factory: &Factory,
        candidates: &[Address],
    ) -> Result<Vec<Address>, StoreError>;

    async fn get_events(
        &self,
        filters: &[(usize, Filter)],
        from: Option<Checkpoint>,
        to: Checkpoint,
        limit: usize,
    ) -> Result<EventsPage, StoreError>;

    async fn insert_rpc_request_result(
        &self,
        request_fingerprint: &str,
        chain_id: u64,
        block_number: u64,
        result: &str,
    ) -> Result<(), StoreError>;
    async fn get_rpc_request_result(
        &self,
        request_fingerprint: &str,
        chain_id: u64,
        block_number: u64,
    ) -> Result<Option<String>, StoreError>;

    async fn prune_by_block(&self, chain_id: u64, from_block: u64) -> Result<(), StoreError>;
    async fn prune_by_chain(&self, chain_id: u64, from_block: u64) -> Result<(), StoreError>;
}
