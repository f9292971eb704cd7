//! Finality depth per chain (spec.md Glossary "Finality depth"), grounded
//! on the teacher's `indexer/reorg.rs`: mainnet and the well-known fast
//! L2s get a shallower safety margin than an unrecognized chain, which is
//! assumed to have no settled finality guarantees at all.

use alloy_chains::NamedChain;

pub type ChainId = u64;

const MAINNET_REORG_SAFE_DISTANCE: u64 = 12;
const FAST_L2_REORG_SAFE_DISTANCE: u64 = 10;
const DEFAULT_REORG_SAFE_DISTANCE: u64 = 64;

/// Number of blocks from head past which reorgs are not tolerated.
pub fn reorg_safe_distance_for_chain(chain_id: ChainId) -> u64 {
    match NamedChain::try_from(chain_id) {
        Ok(NamedChain::Mainnet) => MAINNET_REORG_SAFE_DISTANCE,
        Ok(NamedChain::Base | NamedChain::Optimism | NamedChain::Arbitrum) => FAST_L2_REORG_SAFE_DISTANCE,
        _ => DEFAULT_REORG_SAFE_DISTANCE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_uses_twelve_block_finality() {
        assert_eq!(reorg_safe_distance_for_chain(1), 12);
    }

    #[test]
    fn fast_l2_uses_shallower_finality() {
        assert_eq!(reorg_safe_distance_for_chain(8453), 10);
    }

    #[test]
    fn unrecognized_chain_uses_conservative_default() {
        assert_eq!(reorg_safe_distance_for_chain(999_999), 64);
    }
}
