//! Downstream collaborator contracts (spec.md §6 "Downstream (indexing
//! pipeline)" and "Indexing store contract"). The core calls these; it
//! does not implement them — the indexing-function runtime is out of
//! scope (spec.md §1 Non-goals).

use async_trait::async_trait;
use thiserror::Error;

use crate::checkpoint::Checkpoint;
use crate::cursor::EventBatch;
use crate::store::EventPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Success,
    Error,
    Killed,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("indexing pipeline reported an error: {0}")]
    HandlerError(String),
    #[error("indexing pipeline was killed mid-call")]
    Killed,
}

/// The downstream indexing pipeline (spec.md §6). `process_setup_events`
/// runs once before any events flow; `process_events` is called once per
/// batch the Checkpoint Cursor produces.
#[async_trait]
pub trait IndexingPipeline: Send + Sync {
    async fn process_setup_events(&self) -> Result<PipelineStatus, PipelineError>;
    async fn process_events(&self, batch: &EventBatch<EventPayload>) -> Result<PipelineStatus, PipelineError>;
    async fn update_total_seconds(&self, checkpoint: Checkpoint);
    async fn update_indexing_store(&self, mode: IndexingStoreMode);
    async fn kill(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingStoreMode {
    Historical,
    Realtime,
}

/// The indexing store contract (spec.md §6): historical buffers writes
/// and flushes in bulk; realtime wraps each block in a transaction keyed
/// by checkpoint so it can be rolled back atomically on reorg.
#[async_trait]
pub trait IndexingStore: Send + Sync {
    async fn flush(&self, is_full_flush: bool) -> Result<(), PipelineError>;
    async fn revert(&self, checkpoint: Checkpoint) -> Result<(), PipelineError>;
}

/// A no-op double satisfying both contracts, provided so the crate
/// compiles and is directly testable without a real downstream runtime
/// wired in (spec.md §1: the runtime itself is an external collaborator).
pub struct NoopPipeline;

#[async_trait]
impl IndexingPipeline for NoopPipeline {
    async fn process_setup_events(&self) -> Result<PipelineStatus, PipelineError> {
        Ok(PipelineStatus::Success)
    }

    async fn process_events(&self, _batch: &EventBatch<EventPayload>) -> Result<PipelineStatus, PipelineError> {
        Ok(PipelineStatus::Success)
    }

    async fn update_total_seconds(&self, _checkpoint: Checkpoint) {}

    async fn update_indexing_store(&self, _mode: IndexingStoreMode) {}

    async fn kill(&self) {}
}

pub struct NoopIndexingStore;

#[async_trait]
impl IndexingStore for NoopIndexingStore {
    async fn flush(&self, _is_full_flush: bool) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn revert(&self, _checkpoint: Checkpoint) -> Result<(), PipelineError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_pipeline_always_reports_success() {
        let pipeline = NoopPipeline;
        assert_eq!(pipeline.process_setup_events().await.unwrap(), PipelineStatus::Success);
        let batch = EventBatch::default();
        assert_eq!(pipeline.process_events(&batch).await.unwrap(), PipelineStatus::Success);
    }

    #[tokio::test]
    async fn noop_store_flush_and_revert_succeed() {
        let store = NoopIndexingStore;
        store.flush(true).await.unwrap();
        store.revert(Checkpoint::new(0, 1, 0, 0, crate::checkpoint::EventType::Block, 0)).await.unwrap();
    }
}
