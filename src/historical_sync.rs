//! Historical Sync (spec.md §4.4): extracts raw data for a filter across a
//! block interval, minimizing redundant work via the interval index and a
//! per-sync block dedup cache.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, TxHash};
use alloy::rpc::types::{Block, Filter as AlloyFilter, Topic};
use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use crate::filter::{AddressSource, BlockFilter, CallTraceFilter, Filter, LogFilter};
use crate::interval::{Interval, IntervalSet};
use crate::provider::{RpcRequestQueue, RpcRequestQueueError};
use crate::store::{types::LogRow, RawStore, StoreError};

/// Factory child-address resolution is capped here (spec.md §8 scenario f).
pub const ADDRESS_FILTER_LIMIT: usize = 1_000;
/// `eth_getLogs` address lists beyond this are split into concurrent batches.
const ADDRESS_BATCH_SIZE: usize = 50;
/// `trace_filter` is chunked to this many blocks per call.
const TRACE_CHUNK_SIZE: u64 = 10;

#[derive(Debug, Error)]
pub enum HistoricalSyncError {
    #[error(transparent)]
    Rpc(#[from] RpcRequestQueueError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("block {0} could not be fetched during historical sync")]
    MissingBlock(u64),
}

/// Coalesces concurrent requests for the same block number within one
/// `sync()` call (spec.md §4.4 "Per-sync block cache"). Scoped to a single
/// call and dropped at the end of it.
#[derive(Default)]
struct BlockCache {
    slots: Mutex<HashMap<u64, Arc<OnceCell<Option<Block>>>>>,
}

impl BlockCache {
    async fn get_or_fetch(
        &self,
        queue: &RpcRequestQueue,
        number: u64,
    ) -> Result<Option<Block>, HistoricalSyncError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(number).or_insert_with(|| Arc::new(OnceCell::new())).clone()
        };

        let block = slot
            .get_or_try_init(|| async { queue.get_block_by_number(number).await })
            .await?;
        Ok(block.clone())
    }
}

pub struct HistoricalSync {
    queue: Arc<RpcRequestQueue>,
    store: Arc<dyn RawStore>,
}

impl HistoricalSync {
    pub fn new(queue: Arc<RpcRequestQueue>, store: Arc<dyn RawStore>) -> Self {
        HistoricalSync { queue, store }
    }

    /// `sync(interval)` entry point (spec.md §4.4 steps 1–4), run once per
    /// configured source (filter) for this network.
    pub async fn sync(&self, filter: &Filter, interval: Interval) -> Result<u64, HistoricalSyncError> {
        let clipped = match clip_to_filter_bounds(filter, interval) {
            Some(clipped) => clipped,
            None => return Ok(0),
        };

        let covered = IntervalSet::from_intervals(self.store.get_intervals(filter).await?);
        let required = IntervalSet::from_intervals([clipped]).difference(&covered);

        if required.is_empty() {
            return Ok(0);
        }

        let cache = BlockCache::default();
        let mut latest_block = 0u64;

        for sub_interval in required.as_slice() {
            let highest = match filter {
                Filter::Log(log_filter) => self.sync_log_interval(log_filter, *sub_interval, &cache).await?,
                Filter::Block(block_filter) => {
                    self.sync_block_interval(block_filter, *sub_interval, &cache).await?
                }
                Filter::CallTrace(trace_filter) => {
                    self.sync_call_trace_interval(trace_filter, *sub_interval, &cache).await?
                }
            };
            latest_block = latest_block.max(highest);
        }

        self.store.insert_interval(filter, clipped).await?;
        info!(latest_block, ?clipped, "historical sync completed interval");
        Ok(latest_block)
    }

    async fn sync_log_interval(
        &self,
        filter: &LogFilter,
        interval: Interval,
        cache: &BlockCache,
    ) -> Result<u64, HistoricalSyncError> {
        let addresses = match &filter.address {
            None => vec![],
            Some(AddressSource::Single(addr)) => vec![*addr],
            Some(AddressSource::Multi(addrs)) => addrs.clone(),
            Some(AddressSource::Factory(factory)) => {
                // First sync the factory's own defining event over this
                // range, then resolve however many child addresses exist.
                let factory_filter = Filter::Log(LogFilter {
                    chain_id: factory.chain_id,
                    from_block: interval.start,
                    to_block: Some(interval.end),
                    address: Some(AddressSource::Single(factory.address)),
                    topics: [
                        crate::filter::topic::TopicSlot::Single(factory.event_selector),
                        Default::default(),
                        Default::default(),
                        Default::default(),
                    ],
                    include_receipts: false,
                });
                Box::pin(self.sync(&factory_filter, interval)).await?;

                let children = self.store.get_child_addresses(factory, ADDRESS_FILTER_LIMIT + 1).await?;
                if children.len() > ADDRESS_FILTER_LIMIT {
                    warn!(
                        count = children.len(),
                        cap = ADDRESS_FILTER_LIMIT,
                        "factory child-address set exceeds cap; omitting address filter from eth_getLogs"
                    );
                    vec![]
                } else {
                    children
                }
            }
        };

        let topics: [Topic; 4] = [
            topic_slot_to_alloy(&filter.topics[0]),
            topic_slot_to_alloy(&filter.topics[1]),
            topic_slot_to_alloy(&filter.topics[2]),
            topic_slot_to_alloy(&filter.topics[3]),
        ];

        let had_explicit_addresses = !addresses.is_empty();
        let address_batches: Vec<Vec<Address>> = if addresses.is_empty() {
            vec![vec![]]
        } else {
            addresses.chunks(ADDRESS_BATCH_SIZE).map(|c| c.to_vec()).collect()
        };

        // Prefetch the interval's last block, per spec.md §4.4 step 2.
        cache.get_or_fetch(&self.queue, interval.end).await?;

        let mut fetches = FuturesUnordered::new();
        for batch in address_batches {
            let mut alloy_filter = AlloyFilter::new().from_block(interval.start).to_block(interval.end);
            if had_explicit_addresses {
                alloy_filter = alloy_filter.address(batch);
            }
            alloy_filter = alloy_filter.event_signature(topics[0].clone());
            alloy_filter = alloy_filter.topic1(topics[1].clone());
            alloy_filter = alloy_filter.topic2(topics[2].clone());
            alloy_filter = alloy_filter.topic3(topics[3].clone());

            let queue = self.queue.clone();
            fetches.push(async move { queue.get_logs(&alloy_filter).await });
        }

        let mut highest_block = interval.start;
        let mut rows = Vec::new();
        while let Some(result) = fetches.next().await {
            for log in result? {
                let Some(block_number) = log.block_number else { continue };
                highest_block = highest_block.max(block_number);
                cache.get_or_fetch(&self.queue, block_number).await?;

                let log_index = log.log_index.unwrap_or_default();
                let topic0 = log.inner.topics().first().copied();
                let topic1 = log.inner.topics().get(1).copied();
                let topic2 = log.inner.topics().get(2).copied();
                let topic3 = log.inner.topics().get(3).copied();
                rows.push(LogRow {
                    id: LogRow::synthesize_id(filter.chain_id, block_number, log_index),
                    chain_id: filter.chain_id,
                    block_hash: log.block_hash.unwrap_or_default(),
                    block_number,
                    transaction_hash: log.transaction_hash.unwrap_or_default(),
                    transaction_index: log.transaction_index.unwrap_or_default(),
                    log_index,
                    address: log.inner.address,
                    topic0,
                    topic1,
                    topic2,
                    topic3,
                    data: log.inner.data.data.clone(),
                    fragment_id: crate::filter::log_fragment_id_for_match(
                        filter,
                        log.inner.address,
                        topic0,
                        topic1,
                        topic2,
                        topic3,
                    ),
                    checkpoint: crate::checkpoint::Checkpoint::new(
                        0,
                        filter.chain_id,
                        block_number,
                        log.transaction_index.unwrap_or_default(),
                        crate::checkpoint::EventType::Log,
                        log_index,
                    ),
                });
            }
        }

        if !rows.is_empty() {
            self.store.insert_logs(filter.chain_id, &rows).await?;
        }

        Ok(highest_block)
    }

    async fn sync_block_interval(
        &self,
        filter: &BlockFilter,
        interval: Interval,
        cache: &BlockCache,
    ) -> Result<u64, HistoricalSyncError> {
        let blocks = filter.matching_blocks(interval.start, interval.end);
        let mut highest = interval.start;
        for number in blocks {
            if cache.get_or_fetch(&self.queue, number).await?.is_some() {
                highest = highest.max(number);
            }
        }
        Ok(highest)
    }

    async fn sync_call_trace_interval(
        &self,
        filter: &CallTraceFilter,
        interval: Interval,
        cache: &BlockCache,
    ) -> Result<u64, HistoricalSyncError> {
        // `to_address` resolution mirrors the Log branch's factory-aware
        // cap rule (spec.md §4.4).
        let to_addresses = match &filter.to_address {
            AddressSource::Single(addr) => Some(vec![*addr]),
            AddressSource::Multi(addrs) => Some(addrs.clone()),
            AddressSource::Factory(factory) => {
                let factory_filter = Filter::Log(LogFilter {
                    chain_id: factory.chain_id,
                    from_block: interval.start,
                    to_block: Some(interval.end),
                    address: Some(AddressSource::Single(factory.address)),
                    topics: [
                        crate::filter::topic::TopicSlot::Single(factory.event_selector),
                        Default::default(),
                        Default::default(),
                        Default::default(),
                    ],
                    include_receipts: false,
                });
                Box::pin(self.sync(&factory_filter, interval)).await?;

                let children = self.store.get_child_addresses(factory, ADDRESS_FILTER_LIMIT + 1).await?;
                if children.len() > ADDRESS_FILTER_LIMIT {
                    warn!(
                        count = children.len(),
                        cap = ADDRESS_FILTER_LIMIT,
                        "factory child-address set exceeds cap; filtering to_address client-side"
                    );
                    None
                } else {
                    Some(children)
                }
            }
        };

        let chunk_starts: Vec<u64> =
            IntervalSet::from_intervals([interval]).chunks(TRACE_CHUNK_SIZE).into_iter().map(|c| c.start).collect();

        let mut highest = interval.start;
        let mut surviving: Vec<serde_json::Value> = Vec::new();

        for chunk_start in chunk_starts {
            let chunk_end = (chunk_start + TRACE_CHUNK_SIZE - 1).min(interval.end);
            // The raw `trace_filter` RPC call and receipt-based revert
            // filtering happen against the provider queue; the shape of
            // the params/result is provider-specific JSON, passed through
            // verbatim rather than modeled as a typed alloy call.
            let mut params_obj = serde_json::json!({
                "fromBlock": format!("0x{:x}", chunk_start),
                "toBlock": format!("0x{:x}", chunk_end),
            });
            if let (Some(addrs), Some(obj)) = (&to_addresses, params_obj.as_object_mut()) {
                obj.insert(
                    "toAddress".to_string(),
                    serde_json::Value::Array(addrs.iter().map(|a| serde_json::json!(format!("{a:#x}"))).collect()),
                );
            }
            if let (Some(from), Some(obj)) = (&filter.from_address, params_obj.as_object_mut()) {
                obj.insert(
                    "fromAddress".to_string(),
                    serde_json::Value::Array(from.iter().map(|a| serde_json::json!(format!("{a:#x}"))).collect()),
                );
            }
            let traces: Vec<serde_json::Value> = self.queue.trace_filter(serde_json::json!([params_obj])).await?;

            for trace in traces {
                if trace.get("type").and_then(|v| v.as_str()) != Some("call") {
                    continue;
                }
                // client-side to_address filter, used when the factory's
                // child-address set exceeded the cap above.
                if to_addresses.is_none() {
                    if let Some(to_hex) = trace.get("action").and_then(|a| a.get("to")).and_then(|v| v.as_str()) {
                        if let Ok(to) = to_hex.parse::<Address>() {
                            let matches = self.store.filter_child_addresses(
                                match &filter.to_address {
                                    AddressSource::Factory(f) => f,
                                    _ => unreachable!("to_addresses is only None for the Factory branch"),
                                },
                                &[to],
                            );
                            if matches.await?.is_empty() {
                                continue;
                            }
                        }
                    }
                }
                if !matches_function_selector(&trace, &filter.function_selectors) {
                    continue;
                }

                let Some(tx_hash_str) = trace.get("transactionHash").and_then(|v| v.as_str()) else { continue };
                let Ok(tx_hash) = tx_hash_str.parse::<TxHash>() else { continue };

                if let Some(receipt) = self.queue.get_transaction_receipt(tx_hash).await? {
                    if !receipt.status() {
                        continue; // reverted trace, per spec.md §4.4
                    }
                }
                surviving.push(trace);
            }
            highest = highest.max(chunk_end);
        }

        if surviving.is_empty() {
            return Ok(highest);
        }

        // checkpoint's event_index must reflect the trace's position in
        // the sorted `traceAddress` order within its transaction
        // (spec.md §4.2 `insertLogs`/.../`insertCallTraces` guarantees).
        surviving.sort_by(|a, b| {
            let tx_a = a.get("transactionHash").and_then(|v| v.as_str()).unwrap_or_default();
            let tx_b = b.get("transactionHash").and_then(|v| v.as_str()).unwrap_or_default();
            (tx_a, trace_address_of(a)).cmp(&(tx_b, trace_address_of(b)))
        });

        let mut rows = Vec::new();
        let mut index_within_tx: HashMap<String, u64> = HashMap::new();
        for trace in &surviving {
            let Some(row) = call_trace_row_from_json(filter, trace, &mut index_within_tx) else { continue };
            if let Some(number) = trace.get("blockNumber").and_then(|v| v.as_u64()) {
                cache.get_or_fetch(&self.queue, number).await?;
            }
            rows.push(row);
        }

        if !rows.is_empty() {
            self.store.insert_call_traces(filter.chain_id, &rows).await?;
        }

        Ok(highest)
    }
}

fn trace_address_of(trace: &serde_json::Value) -> Vec<u32> {
    trace
        .get("traceAddress")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|n| n.as_u64()).map(|n| n as u32).collect())
        .unwrap_or_default()
}

fn matches_function_selector(trace: &serde_json::Value, selectors: &[[u8; 4]]) -> bool {
    if selectors.is_empty() {
        return true;
    }
    let Some(input_hex) = trace.get("action").and_then(|a| a.get("input")).and_then(|v| v.as_str()) else {
        return false;
    };
    let Ok(input) = hex::decode(input_hex.trim_start_matches("0x")) else { return false };
    if input.len() < 4 {
        return false;
    }
    selectors.iter().any(|sel| input[..4] == sel[..])
}

fn call_trace_row_from_json(
    filter: &CallTraceFilter,
    trace: &serde_json::Value,
    index_within_tx: &mut HashMap<String, u64>,
) -> Option<crate::store::types::CallTraceRow> {
    let chain_id = filter.chain_id;
    let tx_hash: TxHash = trace.get("transactionHash")?.as_str()?.parse().ok()?;
    let trace_address = trace_address_of(trace);
    let action = trace.get("action")?;
    let result = trace.get("result");

    let from: Address = action.get("from")?.as_str()?.parse().ok()?;
    let to = action.get("to").and_then(|v| v.as_str()).and_then(|s| s.parse::<Address>().ok());
    let input = action.get("input").and_then(|v| v.as_str()).map(hex_to_bytes).unwrap_or_default();
    let output = result.and_then(|r| r.get("output")).and_then(|v| v.as_str()).map(hex_to_bytes).unwrap_or_default();
    let value = action
        .get("value")
        .and_then(|v| v.as_str())
        .and_then(|s| alloy::primitives::U256::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        .unwrap_or_default();
    let gas = parse_hex_u64(action.get("gas").and_then(|v| v.as_str()));
    let gas_used = parse_hex_u64(result.and_then(|r| r.get("gasUsed")).and_then(|v| v.as_str()));
    let call_type = action.get("callType").and_then(|v| v.as_str()).unwrap_or("call").to_string();
    let block_number = trace.get("blockNumber")?.as_u64()?;
    let transaction_position = trace.get("transactionPosition").and_then(|v| v.as_u64()).unwrap_or_default();
    let subtraces = trace.get("subtraces").and_then(|v| v.as_u64()).unwrap_or_default() as u32;
    let error = trace.get("error").and_then(|v| v.as_str()).map(|s| s.to_string());

    let event_index = {
        let key = format!("{tx_hash:#x}");
        let counter = index_within_tx.entry(key).or_insert(0);
        let current = *counter;
        *counter += 1;
        current
    };

    Some(crate::store::types::CallTraceRow {
        id: crate::store::types::CallTraceRow::synthesize_id(tx_hash, &trace_address),
        chain_id,
        block_number,
        transaction_hash: tx_hash,
        transaction_position,
        trace_address,
        from,
        to,
        input,
        output,
        value,
        gas,
        gas_used,
        subtraces,
        call_type,
        error,
        fragment_id: crate::filter::trace_fragment_id_for_match(filter, to),
        checkpoint: crate::checkpoint::Checkpoint::new(
            0,
            chain_id,
            block_number,
            transaction_position,
            crate::checkpoint::EventType::CallTrace,
            event_index,
        ),
    })
}

fn parse_hex_u64(value: Option<&str>) -> u64 {
    value.and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()).unwrap_or_default()
}

fn hex_to_bytes(value: &str) -> alloy::primitives::Bytes {
    hex::decode(value.trim_start_matches("0x")).map(alloy::primitives::Bytes::from).unwrap_or_default()
}

fn topic_slot_to_alloy(slot: &crate::filter::topic::TopicSlot) -> Topic {
    let values = slot.values();
    if values.is_empty() {
        Topic::default()
    } else {
        Topic::from(values)
    }
}

/// Clips `interval` to `[filter.from_block, filter.to_block ?? +inf]`
/// (spec.md §4.4 step 1). Returns `None` if the clipped range is empty.
fn clip_to_filter_bounds(filter: &Filter, interval: Interval) -> Option<Interval> {
    let start = interval.start.max(filter.from_block());
    let end = match filter.to_block() {
        Some(to) => interval.end.min(to),
        None => interval.end,
    };
    if start > end {
        None
    } else {
        Some(Interval::new(start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_narrows_to_filter_from_block() {
        let filter = Filter::Block(BlockFilter { chain_id: 1, from_block: 100, to_block: None, interval: 1, offset: 0 });
        let clipped = clip_to_filter_bounds(&filter, Interval::new(0, 200)).unwrap();
        assert_eq!(clipped, Interval::new(100, 200));
    }

    #[test]
    fn clip_narrows_to_filter_to_block() {
        let filter =
            Filter::Block(BlockFilter { chain_id: 1, from_block: 0, to_block: Some(50), interval: 1, offset: 0 });
        let clipped = clip_to_filter_bounds(&filter, Interval::new(0, 200)).unwrap();
        assert_eq!(clipped, Interval::new(0, 50));
    }

    #[test]
    fn clip_returns_none_when_filter_bounds_exclude_interval() {
        let filter =
            Filter::Block(BlockFilter { chain_id: 1, from_block: 300, to_block: None, interval: 1, offset: 0 });
        assert!(clip_to_filter_bounds(&filter, Interval::new(0, 200)).is_none());
    }
}
