use serde::{Deserialize, Serialize};

fn default_polling_interval_ms() -> u64 {
    1_000
}

fn default_max_rpc_request_concurrency() -> usize {
    10
}

/// A single chain the engine watches.
///
/// `polling_interval` and `max_rpc_request_concurrency` are the per-network
/// knobs named in spec.md §6; everything else (RPC URL, chain id) is what
/// the provider and reorg-safe-distance lookup need.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Network {
    pub name: String,

    pub chain_id: u64,

    pub rpc: String,

    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval: u64,

    #[serde(default = "default_max_rpc_request_concurrency")]
    pub max_rpc_request_concurrency: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_units_per_second: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_block_range: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_logs_bloom_checks: Option<bool>,
}

impl Network {
    pub fn polling_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.polling_interval)
    }
}
