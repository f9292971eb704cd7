//! RPC access (spec.md §4.1, §6 upstream interface), grounded on the
//! teacher's `provider.rs` and `indexer/fetch_logs.rs`: a thin alloy
//! provider wrapper plus the bounded-concurrency, retrying request queue
//! built on top of it.

pub mod adaptive_concurrency;
pub mod retry;
pub mod rpc_queue;

pub use rpc_queue::{RpcRequestQueue, RpcRequestQueueError};

use std::sync::Arc;

use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use thiserror::Error;
use url::Url;

use crate::manifest::Network;

pub type ChainProvider = Arc<RootProvider>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid RPC url for network {network}: {source}")]
    InvalidUrl { network: String, #[source] source: url::ParseError },
    #[error("failed to reach chain id for network {network}: {source}")]
    ChainId { network: String, #[source] source: alloy::transports::RpcError<alloy::transports::TransportErrorKind> },
    #[error("network {network} declares chain_id {declared} but provider reports {observed}")]
    ChainIdMismatch { network: String, declared: u64, observed: u64 },
}

/// Builds an alloy HTTP provider for `network`, verifying its reported
/// chain id matches the manifest's declared one before handing it back —
/// a misconfigured RPC url is a common enough mistake to fail fast on.
pub async fn create_provider(network: &Network) -> Result<ChainProvider, ProviderError> {
    let url: Url = network
        .rpc
        .parse()
        .map_err(|source| ProviderError::InvalidUrl { network: network.name.clone(), source })?;

    let provider = ProviderBuilder::new().on_http(url);
    let observed = provider
        .get_chain_id()
        .await
        .map_err(|source| ProviderError::ChainId { network: network.name.clone(), source })?;

    if observed != network.chain_id {
        return Err(ProviderError::ChainIdMismatch {
            network: network.name.clone(),
            declared: network.chain_id,
            observed,
        });
    }

    Ok(Arc::new(provider))
}
