//! The Filter Model (spec.md §4.3, §3): the typed description of what to
//! sync, independent of how it's stored or synced.

pub mod factory;
pub mod fragment;
pub mod topic;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

pub use factory::{ChildAddressLocation, Factory};
pub use fragment::{canonicalize, log_fragment_id_for_match, trace_fragment_id_for_match, Fragment};
pub use topic::TopicSlot;

/// Where a filter's address set comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressSource {
    Single(Address),
    Multi(Vec<Address>),
    Factory(Factory),
}

impl AddressSource {
    /// spec.md §4.3: "`isAddressFactory(address)` discrimination".
    pub fn is_factory(&self) -> bool {
        matches!(self, AddressSource::Factory(_))
    }
}

pub fn is_address_factory(address: &AddressSource) -> bool {
    address.is_factory()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub chain_id: u64,
    pub from_block: u64,
    pub to_block: Option<u64>,
    pub address: Option<AddressSource>,
    pub topics: [TopicSlot; 4],
    pub include_receipts: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFilter {
    pub chain_id: u64,
    pub from_block: u64,
    pub to_block: Option<u64>,
    pub interval: u64,
    pub offset: u64,
}

impl BlockFilter {
    /// Selects blocks where `(n - offset) mod interval == 0` (spec.md §3).
    pub fn matches(&self, block_number: u64) -> bool {
        if self.interval == 0 {
            return false;
        }
        block_number
            .checked_sub(self.offset)
            .map(|delta| delta % self.interval == 0)
            .unwrap_or(false)
    }

    /// Enumerates the matching blocks within `[interval_start, interval_end]`
    /// (spec.md §4.4 step 2, Block branch).
    pub fn matching_blocks(&self, interval_start: u64, interval_end: u64) -> Vec<u64> {
        if self.interval == 0 || interval_start > interval_end {
            return vec![];
        }
        let offset_prime = (interval_start.wrapping_sub(self.offset)) % self.interval;
        let first = if offset_prime == 0 {
            interval_start
        } else {
            interval_start + (self.interval - offset_prime)
        };

        let mut blocks = Vec::new();
        let mut n = first;
        while n <= interval_end {
            blocks.push(n);
            n += self.interval;
        }
        blocks
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTraceFilter {
    pub chain_id: u64,
    pub from_block: u64,
    pub to_block: Option<u64>,
    pub from_address: Option<Vec<Address>>,
    pub to_address: AddressSource,
    pub function_selectors: Vec<[u8; 4]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Log(LogFilter),
    Block(BlockFilter),
    CallTrace(CallTraceFilter),
}

impl Filter {
    pub fn chain_id(&self) -> u64 {
        match self {
            Filter::Log(f) => f.chain_id,
            Filter::Block(f) => f.chain_id,
            Filter::CallTrace(f) => f.chain_id,
        }
    }

    pub fn from_block(&self) -> u64 {
        match self {
            Filter::Log(f) => f.from_block,
            Filter::Block(f) => f.from_block,
            Filter::CallTrace(f) => f.from_block,
        }
    }

    pub fn to_block(&self) -> Option<u64> {
        match self {
            Filter::Log(f) => f.to_block,
            Filter::Block(f) => f.to_block,
            Filter::CallTrace(f) => f.to_block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_filter_matches_offset_interval() {
        let filter = BlockFilter { chain_id: 1, from_block: 0, to_block: None, interval: 10, offset: 3 };
        assert!(filter.matches(3));
        assert!(filter.matches(13));
        assert!(!filter.matches(4));
    }

    #[test]
    fn block_filter_enumerates_matching_blocks_in_range() {
        let filter = BlockFilter { chain_id: 1, from_block: 0, to_block: None, interval: 5, offset: 0 };
        assert_eq!(filter.matching_blocks(1, 16), vec![5, 10, 15]);
    }

    #[test]
    fn block_filter_handles_interval_start_aligned() {
        let filter = BlockFilter { chain_id: 1, from_block: 0, to_block: None, interval: 5, offset: 0 };
        assert_eq!(filter.matching_blocks(10, 20), vec![10, 15, 20]);
    }
}
