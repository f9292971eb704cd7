//! Per-network bounded-concurrency RPC dispatcher (spec.md §4.1).

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{BlockHash, TxHash};
use alloy::providers::Provider;
use alloy::rpc::types::{Block, Filter as AlloyFilter, Log, TransactionReceipt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::adaptive_concurrency::AdaptiveConcurrency;
use super::retry::{classify_error, RetryClass};
use super::ChainProvider;

const MAX_ATTEMPTS: u32 = 8;

#[derive(Debug, Error)]
pub enum RpcRequestQueueError {
    #[error("{method} failed on network {network} after {attempts} attempts: {message}")]
    ExhaustedRetries { network: String, method: &'static str, attempts: u32, message: String },
    #[error("{method} on network {network} rejected the block range; provider suggests at most {suggested_range} blocks per call")]
    BlockRangeTooLarge { network: String, method: &'static str, suggested_range: u64 },
    #[error("{method} on network {network} failed with a non-retryable error: {message}")]
    NonRetryable { network: String, method: &'static str, message: String },
}

/// Wraps one network's provider with a semaphore-bounded concurrency cap,
/// adaptive backoff on rate-limiting, and provider-specific error
/// classification (spec.md §4.1, §7).
pub struct RpcRequestQueue {
    provider: ChainProvider,
    network_name: String,
    semaphore: Arc<Semaphore>,
    adaptive: Arc<AdaptiveConcurrency>,
}

impl RpcRequestQueue {
    pub fn new(provider: ChainProvider, network_name: String, max_concurrency: usize) -> Self {
        RpcRequestQueue {
            provider,
            network_name,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            adaptive: Arc::new(AdaptiveConcurrency::new(1, max_concurrency)),
        }
    }

    fn attempted_range(filter: &AlloyFilter) -> u64 {
        match (filter.get_from_block(), filter.get_to_block()) {
            (Some(from), Some(to)) => to.saturating_sub(from) + 1,
            _ => 1,
        }
    }

    async fn with_retry<T, F, Fut>(&self, method: &'static str, mut call: F) -> Result<T, RpcRequestQueueError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, String>>,
    {
        self.with_retry_ranged(method, 1, |_| call()).await
    }

    async fn with_retry_ranged<T, F, Fut>(
        &self,
        method: &'static str,
        attempted_range: u64,
        mut call: F,
    ) -> Result<T, RpcRequestQueueError>
    where
        F: FnMut(u64) -> Fut,
        Fut: std::future::Future<Output = Result<T, String>>,
    {
        let _permit = self.semaphore.acquire().await.expect("semaphore never closed");

        let mut attempts = 0;
        let mut last_message = String::new();

        while attempts < MAX_ATTEMPTS {
            attempts += 1;
            match call(attempted_range).await {
                Ok(value) => {
                    self.adaptive.record_success();
                    return Ok(value);
                }
                Err(message) => {
                    last_message = message.clone();
                    match classify_error(&message, attempted_range) {
                        RetryClass::Retryable => {
                            self.adaptive.record_error();
                            debug!(network = %self.network_name, %method, attempt = attempts, "retrying transient RPC error");
                        }
                        RetryClass::RateLimited => {
                            self.adaptive.record_rate_limit();
                            let backoff = self.adaptive.backoff_ms();
                            warn!(network = %self.network_name, %method, backoff_ms = backoff, "rate limited, backing off");
                            tokio::time::sleep(Duration::from_millis(backoff)).await;
                        }
                        RetryClass::NarrowBlockRange { suggested_range } => {
                            return Err(RpcRequestQueueError::BlockRangeTooLarge {
                                network: self.network_name.clone(),
                                method,
                                suggested_range,
                            });
                        }
                        RetryClass::NonRetryable => {
                            return Err(RpcRequestQueueError::NonRetryable {
                                network: self.network_name.clone(),
                                method,
                                message,
                            });
                        }
                    }
                }
            }
        }

        Err(RpcRequestQueueError::ExhaustedRetries {
            network: self.network_name.clone(),
            method,
            attempts,
            message: last_message,
        })
    }

    pub async fn get_block_by_number(&self, number: u64) -> Result<Option<Block>, RpcRequestQueueError> {
        self.with_retry("eth_getBlockByNumber", || async {
            self.provider
                .get_block_by_number(number.into())
                .full()
                .await
                .map_err(|e| e.to_string())
        })
        .await
    }

    pub async fn get_latest_block(&self) -> Result<Option<Block>, RpcRequestQueueError> {
        self.with_retry("eth_getBlockByNumber(latest)", || async {
            self.provider
                .get_block_by_number(alloy::eips::BlockNumberOrTag::Latest)
                .full()
                .await
                .map_err(|e| e.to_string())
        })
        .await
    }

    pub async fn get_block_by_hash(&self, hash: BlockHash) -> Result<Option<Block>, RpcRequestQueueError> {
        self.with_retry("eth_getBlockByHash", || async {
            self.provider.get_block_by_hash(hash).full().await.map_err(|e| e.to_string())
        })
        .await
    }

    pub async fn get_logs(&self, filter: &AlloyFilter) -> Result<Vec<Log>, RpcRequestQueueError> {
        let attempted_range = Self::attempted_range(filter);
        self.with_retry_ranged("eth_getLogs", attempted_range, |_| async {
            self.provider.get_logs(filter).await.map_err(|e| e.to_string())
        })
        .await
    }

    pub async fn get_transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<TransactionReceipt>, RpcRequestQueueError> {
        self.with_retry("eth_getTransactionReceipt", || async {
            self.provider.get_transaction_receipt(hash).await.map_err(|e| e.to_string())
        })
        .await
    }

    /// `trace_filter` is not part of alloy's core `Provider` trait (it's an
    /// optional Parity/Erigon-style trace API), so it goes through the raw
    /// JSON-RPC client the way the teacher's `debug_trace_block_by_number`
    /// does.
    pub async fn trace_filter<P, R>(&self, params: P) -> Result<R, RpcRequestQueueError>
    where
        P: Serialize + Send + Sync + Clone,
        R: DeserializeOwned + Send,
    {
        self.with_retry("trace_filter", || async {
            self.provider
                .client()
                .request("trace_filter", params.clone())
                .await
                .map_err(|e| e.to_string())
        })
        .await
    }

    /// Generic passthrough for anything not covered by a typed method
    /// above (spec.md §4.1 "`send`").
    pub async fn send<P, R>(&self, method: &'static str, params: P) -> Result<R, RpcRequestQueueError>
    where
        P: Serialize + Send + Sync + Clone,
        R: DeserializeOwned + Send,
    {
        self.with_retry(method, || async {
            self.provider.client().request(method, params.clone()).await.map_err(|e| e.to_string())
        })
        .await
    }

    pub fn current_concurrency(&self) -> usize {
        self.adaptive.current()
    }
}
