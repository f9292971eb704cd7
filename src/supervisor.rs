//! Sync Supervisor (spec.md §4.7): wires the Raw Sync Store, Metadata
//! Store, per-network RPC queues, historical and realtime syncs, and the
//! downstream pipeline/indexing-store contracts into one runnable process.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::checkpoint::{Checkpoint, EventType};
use crate::cursor::{CursorEvent, EventBatch};
use crate::filter::Filter;
use crate::historical_sync::HistoricalSync;
use crate::interval::Interval;
use crate::manifest::{Database, Manifest, Network};
use crate::metadata::{MetadataError, MetadataStore};
use crate::pipeline::{IndexingPipeline, IndexingStore, IndexingStoreMode, PipelineError, PipelineStatus};
use crate::provider::{create_provider, ProviderError, RpcRequestQueue};
use crate::realtime_sync::{RealtimeEvent, RealtimeSync, RealtimeSyncError};
use crate::store::{BigEncoder, PostgresStore, RawStore, StoreError};
use crate::system_state::{initiate_shutdown, is_running, SyncTaskGuard};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Realtime(#[from] RealtimeSyncError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// How many events `getEvents` is asked for per drain iteration during
/// historical catch-up (spec.md §4.7 step 4).
const EVENTS_PER_BATCH: usize = 1_000;

/// Per-network wiring: the RPC queue its syncs dispatch through and the
/// filters its contracts decomposed into (spec.md §4.7 step 2).
struct NetworkContext {
    network: Network,
    queue: Arc<RpcRequestQueue>,
    filters: Vec<Filter>,
}

/// Wires everything together and drives the lifecycle described in
/// spec.md §4.7: bootstrap, historical catch-up, realtime hand-off, kill.
pub struct Supervisor {
    store: Arc<PostgresStore>,
    metadata: Arc<MetadataStore>,
    pipeline: Arc<dyn IndexingPipeline>,
    indexing_store: Arc<dyn IndexingStore>,
    networks: Vec<NetworkContext>,
}

impl Supervisor {
    /// Step 1–2: opens the database, runs migrations, and constructs one
    /// RPC queue plus the decomposed filter list per configured network.
    pub async fn bootstrap(
        manifest: &Manifest,
        pipeline: Arc<dyn IndexingPipeline>,
        indexing_store: Arc<dyn IndexingStore>,
    ) -> Result<Self, SupervisorError> {
        let Database::Postgres { connection_string } = &manifest.database;
        let connection_string = crate::store::postgres::connection_string(connection_string);

        let encoder = BigEncoder::from_database_kind(manifest.database.kind_name());
        let store = Arc::new(PostgresStore::connect(&connection_string, encoder).await?);
        let metadata = Arc::new(MetadataStore::new(Arc::new(store.pool()), store.encoder()));

        let mut networks = Vec::with_capacity(manifest.networks.len());
        for network in &manifest.networks {
            let provider = create_provider(network).await?;
            let queue =
                Arc::new(RpcRequestQueue::new(provider, network.name.clone(), network.max_rpc_request_concurrency));

            let filters: Vec<Filter> = manifest
                .contracts_for_network(&network.name)
                .map(|contract| contract.to_filter(network.chain_id))
                .collect();

            networks.push(NetworkContext { network: network.clone(), queue, filters });
        }

        Ok(Supervisor { store, metadata, pipeline, indexing_store, networks })
    }

    /// Runs the full lifecycle (spec.md §4.7 steps 3–6) until `kill()` is
    /// called or a realtime sync hits an unrecoverable error.
    pub async fn run(&self) -> Result<(), SupervisorError> {
        let setup_status = self.pipeline.process_setup_events().await?;
        if setup_status != PipelineStatus::Success {
            warn!(?setup_status, "setup events did not report success");
        }

        self.historical_catchup().await?;

        // Step 5: one large flush, then swap the indexing store into
        // transactional-per-block mode before realtime events can land.
        self.indexing_store.flush(true).await?;
        self.pipeline.update_indexing_store(IndexingStoreMode::Realtime).await;

        self.run_realtime().await
    }

    /// Step 4: syncs every network's filters up to its current chain head
    /// in parallel `tokio::spawn` tasks (spec.md §5 "cross-network
    /// historical syncs run in parallel"), then drains `getEvents` against
    /// the merged filter set, dispatching batches to the pipeline between
    /// status updates.
    async fn historical_catchup(&self) -> Result<(), SupervisorError> {
        let mut tasks = Vec::with_capacity(self.networks.len());
        for ctx in &self.networks {
            let queue = ctx.queue.clone();
            let store: Arc<dyn RawStore> = self.store.clone();
            let filters = ctx.filters.clone();
            let network_name = ctx.network.name.clone();

            tasks.push(tokio::spawn(async move {
                let _guard = SyncTaskGuard::acquire();
                let historical = HistoricalSync::new(queue.clone(), store);

                let head = match queue.get_latest_block().await {
                    Ok(Some(block)) => block.header.number,
                    Ok(None) => return,
                    Err(err) => {
                        warn!(network = %network_name, error = %err, "failed to fetch chain head for historical sync");
                        return;
                    }
                };

                for filter in &filters {
                    if !is_running() {
                        break;
                    }
                    let to = filter.to_block().unwrap_or(head).min(head);
                    if filter.from_block() > to {
                        continue;
                    }
                    if let Err(err) = historical.sync(filter, Interval::new(filter.from_block(), to)).await {
                        warn!(network = %network_name, error = %err, "historical sync failed for filter");
                    }
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }

        self.drain_historical_events().await
    }

    /// Repeatedly calls `getEvents` starting from the persisted checkpoint
    /// (or the beginning, on a fresh database) until it returns fewer than
    /// a full page, dispatching every batch to the pipeline and persisting
    /// the cursor after each one so a crash mid-drain resumes correctly.
    async fn drain_historical_events(&self) -> Result<(), SupervisorError> {
        let filters: Vec<(usize, Filter)> =
            self.networks.iter().flat_map(|ctx| ctx.filters.iter().cloned()).enumerate().collect();
        if filters.is_empty() {
            return Ok(());
        }

        let mut from = self.metadata.get_checkpoint().await?;
        let ceiling = Checkpoint::new(u64::MAX, u64::MAX, u64::MAX, u64::MAX, EventType::CallTrace, u64::MAX);

        loop {
            if !is_running() {
                return Ok(());
            }

            let page = self.store.get_events(&filters, from, ceiling, EVENTS_PER_BATCH).await?;
            let batch = to_event_batch(&page.events);

            if !batch.is_empty() {
                let status = self.pipeline.process_events(&batch).await?;
                if status != PipelineStatus::Success {
                    warn!(?status, "historical batch did not report success");
                }
                if let Some(high_watermark) = batch.high_watermark() {
                    self.metadata.set_checkpoint(high_watermark).await?;
                    self.pipeline.update_total_seconds(high_watermark).await;
                }
            }

            if page.events.len() < EVENTS_PER_BATCH {
                break;
            }
            from = Some(page.cursor);
        }

        info!("historical catch-up drained");
        Ok(())
    }

    /// Step 3 & 6: spawns one `RealtimeSync` per network, each feeding a
    /// concurrency-1 `mpsc` queue that this task drains in order, applying
    /// `block | reorg | finalize` events strictly as they arrive so no
    /// two events for the same network are ever handled concurrently.
    async fn run_realtime(&self) -> Result<(), SupervisorError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, RealtimeEvent)>();

        let mut handles = Vec::with_capacity(self.networks.len());
        for ctx in &self.networks {
            let network = ctx.network.clone();
            let queue = ctx.queue.clone();
            let store: Arc<dyn RawStore> = self.store.clone();
            let filters = ctx.filters.clone();
            let network_name = ctx.network.name.clone();
            let events_tx = tx.clone();

            handles.push(tokio::spawn(async move {
                let _guard = SyncTaskGuard::acquire();
                let (forward_tx, mut forward_rx) = mpsc::unbounded_channel();
                let mut realtime = RealtimeSync::new(network, queue, store, filters, forward_tx);

                let forwarder = tokio::spawn({
                    let network_name = network_name.clone();
                    async move {
                        while let Some(event) = forward_rx.recv().await {
                            if events_tx.send((network_name.clone(), event)).is_err() {
                                break;
                            }
                        }
                    }
                });

                if let Err(err) = realtime.run().await {
                    warn!(network = %network_name, error = %err, "realtime sync exited with an error");
                }
                forwarder.abort();
            }));
        }
        drop(tx);

        while let Some((network_name, event)) = rx.recv().await {
            if !is_running() {
                break;
            }
            match event {
                RealtimeEvent::Block { checkpoint } | RealtimeEvent::Finalize { checkpoint } => {
                    self.apply_realtime_checkpoint(checkpoint).await?;
                }
                RealtimeEvent::Reorg { checkpoint } => {
                    // spec.md §5: revert must happen before any further
                    // event application for this network.
                    warn!(network = %network_name, ?checkpoint, "applying reorg revert");
                    self.indexing_store.revert(checkpoint).await?;

                    // The next Block event for the re-extended chain carries
                    // a lower checkpoint than whatever we'd last persisted.
                    // Roll the resume cursor back to the ancestor now, or
                    // apply_realtime_checkpoint's `from..to` window would be
                    // vacuous and silently skip the first post-reorg block.
                    self.metadata.set_checkpoint(checkpoint).await?;
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Drains whatever new events the raw store now exposes up through
    /// `checkpoint` and dispatches them to the pipeline (spec.md §5:
    /// status must be read before any other async step in the handler).
    async fn apply_realtime_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), SupervisorError> {
        let mut status = self.metadata.get_status().await.unwrap_or_default();
        let filters: Vec<(usize, Filter)> =
            self.networks.iter().flat_map(|ctx| ctx.filters.iter().cloned()).enumerate().collect();
        if filters.is_empty() {
            return Ok(());
        }

        let from = self.metadata.get_checkpoint().await?;
        let page = self.store.get_events(&filters, from, checkpoint, EVENTS_PER_BATCH).await?;
        let batch = to_event_batch(&page.events);

        if !batch.is_empty() {
            let result = self.pipeline.process_events(&batch).await?;
            if result != PipelineStatus::Success {
                warn!(?result, "realtime batch did not report success");
            }
        }

        status.insert(
            checkpoint.chain_id,
            crate::metadata::ChainStatus {
                block: crate::metadata::BlockPointer {
                    number: checkpoint.block_number,
                    timestamp: checkpoint.block_timestamp,
                },
                ready: true,
            },
        );

        self.metadata.set_checkpoint(checkpoint).await?;
        self.metadata.set_status(&status).await?;
        self.pipeline.update_total_seconds(checkpoint).await;
        Ok(())
    }

    /// Step 6: flips the shared shutdown flag, tells the pipeline and
    /// every in-flight sync task to stop, and waits for them to drain.
    pub async fn kill(&self) {
        self.pipeline.kill().await;
        initiate_shutdown().await;
    }
}

/// Wraps a page of raw store events as a pipeline-facing batch. The store
/// already returns events sorted by `(checkpoint, filterIndex)` across all
/// configured fragments (spec.md §4.2 `getEvents`), so no further k-way
/// merge is needed here — `CheckpointCursor` remains available for
/// callers that assemble per-fragment streams themselves.
fn to_event_batch(events: &[crate::store::EventRow]) -> EventBatch<crate::store::EventPayload> {
    EventBatch {
        events: events
            .iter()
            .map(|e| CursorEvent {
                checkpoint: e.checkpoint,
                fragment_id: e.filter_index.to_string(),
                payload: e.payload.clone(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::BlockRow;
    use crate::store::EventPayload;
    use alloy::primitives::BlockHash;

    fn block_event(number: u64, filter_index: usize) -> crate::store::EventRow {
        crate::store::EventRow {
            filter_index,
            checkpoint: Checkpoint::new(1_700_000_000, 1, number, 0, EventType::Block, 0),
            payload: EventPayload::Block {
                block: BlockRow {
                    hash: BlockHash::repeat_byte(1),
                    chain_id: 1,
                    number,
                    parent_hash: BlockHash::repeat_byte(0),
                    timestamp: 1_700_000_000,
                    nonce: 0,
                },
            },
        }
    }

    #[test]
    fn to_event_batch_preserves_store_order_and_high_watermark() {
        let events = vec![block_event(1, 0), block_event(2, 0)];
        let batch = to_event_batch(&events);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.high_watermark(), Some(events[1].checkpoint));
    }

    #[test]
    fn to_event_batch_is_empty_for_no_events() {
        let batch = to_event_batch(&[]);
        assert!(batch.is_empty());
    }
}
