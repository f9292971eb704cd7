//! Realtime Sync (spec.md §4.5): per-network poll loop, an in-memory
//! unfinalized block chain, reorg detection, and `block | reorg |
//! finalize` event emission.

use std::collections::VecDeque;
use std::sync::Arc;

use alloy::primitives::BlockHash;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::checkpoint::{Checkpoint, EventType};
use crate::historical_sync::{HistoricalSync, HistoricalSyncError};
use crate::interval::Interval;
use crate::manifest::Network;
use crate::provider::{RpcRequestQueue, RpcRequestQueueError};
use crate::store::{RawStore, StoreError};
use crate::system_state::is_running;

#[derive(Debug, Error)]
pub enum RealtimeSyncError {
    #[error(transparent)]
    Rpc(#[from] RpcRequestQueueError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Historical(#[from] HistoricalSyncError),
    #[error("reorg at block {block_number} extends past the finality depth of {finality_depth}")]
    ReorgPastFinality { block_number: u64, finality_depth: u64 },
}

/// One link in the unfinalized chain.
#[derive(Debug, Clone, Copy)]
struct ChainLink {
    number: u64,
    hash: BlockHash,
    parent_hash: BlockHash,
    timestamp: u64,
}

#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    Block { checkpoint: Checkpoint },
    Reorg { checkpoint: Checkpoint },
    Finalize { checkpoint: Checkpoint },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Initializing,
    HistoricalCatchup,
    Realtime,
    Killed,
}

pub struct RealtimeSync {
    network: Network,
    chain_id: u64,
    finality_depth: u64,
    queue: Arc<RpcRequestQueue>,
    store: Arc<dyn RawStore>,
    historical: HistoricalSync,
    filters: Vec<crate::filter::Filter>,
    unfinalized: VecDeque<ChainLink>,
    state: SyncState,
    events: mpsc::UnboundedSender<RealtimeEvent>,
}

impl RealtimeSync {
    pub fn new(
        network: Network,
        queue: Arc<RpcRequestQueue>,
        store: Arc<dyn RawStore>,
        filters: Vec<crate::filter::Filter>,
        events: mpsc::UnboundedSender<RealtimeEvent>,
    ) -> Self {
        let chain_id = network.chain_id;
        let finality_depth = crate::reorg::reorg_safe_distance_for_chain(chain_id);
        RealtimeSync {
            network,
            chain_id,
            finality_depth,
            historical: HistoricalSync::new(queue.clone(), store.clone()),
            queue,
            store,
            filters,
            unfinalized: VecDeque::new(),
            state: SyncState::Initializing,
            events,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Drives the poll loop at `network.polling_interval()` until
    /// `is_running()` goes false (spec.md §5 Cancellation).
    pub async fn run(&mut self) -> Result<(), RealtimeSyncError> {
        self.state = SyncState::HistoricalCatchup;

        let mut interval = tokio::time::interval(self.network.polling_interval());
        loop {
            if !is_running() {
                self.state = SyncState::Killed;
                return Ok(());
            }
            interval.tick().await;
            self.poll_once().await?;
        }
    }

    async fn poll_once(&mut self) -> Result<(), RealtimeSyncError> {
        let head = match self.queue.get_latest_block().await {
            Ok(block) => block,
            Err(err) => {
                warn!(network = %self.network.name, error = %err, "failed to poll latest block");
                return Ok(());
            }
        };
        let Some(head) = head else { return Ok(()) };
        let number = head.header.number;

        let link = ChainLink {
            number,
            hash: head.header.hash,
            parent_hash: head.header.parent_hash,
            timestamp: head.header.timestamp,
        };

        match self.unfinalized.back() {
            None => self.extend_chain(link).await?,
            Some(tip) if tip.hash == link.parent_hash => self.extend_chain(link).await?,
            Some(tip) if tip.hash == link.hash => {} // no new block yet
            Some(_) => self.handle_reorg(link).await?,
        }

        self.finalize_if_needed().await?;

        if self.state == SyncState::HistoricalCatchup {
            self.state = SyncState::Realtime;
        }

        Ok(())
    }

    /// Extends the unfinalized chain by one block and syncs every
    /// configured filter over just that block (spec.md §4.5).
    async fn extend_chain(&mut self, link: ChainLink) -> Result<(), RealtimeSyncError> {
        for filter in &self.filters {
            self.historical.sync(filter, Interval::new(link.number, link.number)).await?;
        }

        self.unfinalized.push_back(link);

        let checkpoint = Checkpoint::new(link.timestamp, self.chain_id, link.number, 0, EventType::Block, 0);
        let _ = self.events.send(RealtimeEvent::Block { checkpoint });
        info!(network = %self.network.name, block = link.number, "extended realtime chain");
        Ok(())
    }

    /// Walks back from `new_head` to find the common ancestor with the
    /// locally held unfinalized chain, then reports the orphaned suffix as
    /// a reorg (spec.md §4.5, §8 scenario e).
    async fn handle_reorg(&mut self, new_head: ChainLink) -> Result<(), RealtimeSyncError> {
        let mut candidate = new_head;
        let mut walked_back = Vec::new();

        loop {
            if let Some(position) = self.unfinalized.iter().position(|l| l.hash == candidate.parent_hash) {
                // Truncate local chain at the common ancestor.
                let ancestor = self.unfinalized[position];
                self.unfinalized.truncate(position + 1);

                if new_head.number.saturating_sub(ancestor.number) > self.finality_depth {
                    return Err(RealtimeSyncError::ReorgPastFinality {
                        block_number: new_head.number,
                        finality_depth: self.finality_depth,
                    });
                }

                self.store.prune_by_chain(self.chain_id, ancestor.number + 1).await?;

                let checkpoint =
                    Checkpoint::new(ancestor.timestamp, self.chain_id, ancestor.number, 0, EventType::Block, 0);
                let _ = self.events.send(RealtimeEvent::Reorg { checkpoint });
                warn!(network = %self.network.name, ancestor = ancestor.number, "reorg detected");

                walked_back.reverse();
                for link in walked_back {
                    self.extend_chain(link).await?;
                }
                self.extend_chain(new_head).await?;
                return Ok(());
            }

            let Some(parent_number) = candidate.number.checked_sub(1) else {
                return Err(RealtimeSyncError::ReorgPastFinality {
                    block_number: new_head.number,
                    finality_depth: self.finality_depth,
                });
            };
            let Some(parent_block) = self.queue.get_block_by_number(parent_number).await? else {
                return Err(RealtimeSyncError::ReorgPastFinality {
                    block_number: new_head.number,
                    finality_depth: self.finality_depth,
                });
            };

            walked_back.push(candidate);
            candidate = ChainLink {
                number: parent_number,
                hash: parent_block.header.hash,
                parent_hash: parent_block.header.parent_hash,
                timestamp: parent_block.header.timestamp,
            };
        }
    }

    /// Emits a `finalize` event once the chain has advanced past
    /// `finality_depth` blocks beyond the oldest retained link.
    async fn finalize_if_needed(&mut self) -> Result<(), RealtimeSyncError> {
        let Some(tip) = self.unfinalized.back().copied() else { return Ok(()) };

        while let Some(oldest) = self.unfinalized.front().copied() {
            if tip.number.saturating_sub(oldest.number) < self.finality_depth {
                break;
            }
            self.unfinalized.pop_front();
            let checkpoint = Checkpoint::new(oldest.timestamp, self.chain_id, oldest.number, 0, EventType::Block, 0);
            let _ = self.events.send(RealtimeEvent::Finalize { checkpoint });
            info!(network = %self.network.name, block = oldest.number, "finalized");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(number: u64, hash: u8, parent: u8) -> ChainLink {
        ChainLink {
            number,
            hash: BlockHash::repeat_byte(hash),
            parent_hash: BlockHash::repeat_byte(parent),
            timestamp: 1_700_000_000 + number,
        }
    }

    #[test]
    fn chain_link_parent_matching_detects_extension() {
        let tip = link(100, 1, 0);
        let next = link(101, 2, 1);
        assert_eq!(tip.hash, next.parent_hash);
    }
}
