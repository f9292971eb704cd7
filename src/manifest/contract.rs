use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// Where a contract's event selector comes from, declared directly in the
/// manifest rather than derived from an ABI (ABI decoding is an external
/// collaborator's concern per spec.md §1 Non-goals — the core only ever
/// needs the `topic0` hash, never the full signature).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventDeclaration {
    pub name: String,
    pub topic0: B256,
}

/// `address | factory` (spec.md §6 Configuration, per-contract).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ContractSource {
    Address(Vec<Address>),
    Factory {
        factory_address: Address,
        factory_event_topic0: B256,
        child_address_location: crate::filter::ChildAddressLocation,
    },
}

fn default_start_block() -> u64 {
    0
}

fn default_max_block_range() -> u64 {
    10_000
}

/// A single contract declaration (spec.md §6): which networks it's synced
/// on, its address source, the block range to cover, and the events to
/// extract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contract {
    pub name: String,

    pub network: Vec<String>,

    pub source: ContractSource,

    #[serde(default = "default_start_block")]
    pub start_block: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_block: Option<u64>,

    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,

    pub events: Vec<EventDeclaration>,

    /// Whether transaction receipts should be fetched alongside matched logs.
    #[serde(default)]
    pub include_receipts: bool,
}

impl Contract {
    pub fn is_factory(&self) -> bool {
        matches!(self.source, ContractSource::Factory { .. })
    }

    pub fn networks(&self) -> &[String] {
        &self.network
    }

    /// Builds the `LogFilter` this contract declaration decomposes into
    /// (spec.md §4.3): a single filter whose `topic0` slot carries every
    /// declared event's selector, so one `eth_getLogs` call covers the
    /// whole contract rather than one call per event.
    pub fn to_filter(&self, chain_id: u64) -> crate::filter::Filter {
        let address = match &self.source {
            ContractSource::Address(addrs) if addrs.len() == 1 => {
                Some(crate::filter::AddressSource::Single(addrs[0]))
            }
            ContractSource::Address(addrs) => Some(crate::filter::AddressSource::Multi(addrs.clone())),
            ContractSource::Factory { factory_address, factory_event_topic0, child_address_location } => {
                Some(crate::filter::AddressSource::Factory(crate::filter::Factory {
                    chain_id,
                    address: *factory_address,
                    event_selector: *factory_event_topic0,
                    child_address_location: *child_address_location,
                }))
            }
        };

        let topic0 = crate::filter::TopicSlot::from_values(self.events.iter().map(|e| e.topic0).collect());

        crate::filter::Filter::Log(crate::filter::LogFilter {
            chain_id,
            from_block: self.start_block,
            to_block: self.end_block,
            address,
            topics: [topic0, Default::default(), Default::default(), Default::default()],
            include_receipts: self.include_receipts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_address_source_from_yaml_list() {
        let yaml = r#"
name: MyToken
network: ["mainnet"]
source: ["0x0000000000000000000000000000000000000001"]
events:
  - name: Transfer
    topic0: "0x0000000000000000000000000000000000000000000000000000000000000001"
"#;
        let contract: Contract = serde_yaml::from_str(yaml).unwrap();
        assert!(!contract.is_factory());
        assert_eq!(contract.max_block_range, 10_000);
        assert_eq!(contract.start_block, 0);
    }

    #[test]
    fn deserializes_factory_source_from_yaml_map() {
        let yaml = r#"
name: Pool
network: ["mainnet"]
source:
  factory_address: "0x0000000000000000000000000000000000000002"
  factory_event_topic0: "0x0000000000000000000000000000000000000000000000000000000000000002"
  child_address_location: topic1
events:
  - name: Swap
    topic0: "0x0000000000000000000000000000000000000000000000000000000000000003"
"#;
        let contract: Contract = serde_yaml::from_str(yaml).unwrap();
        assert!(contract.is_factory());
    }

    #[test]
    fn to_filter_collapses_single_event_topic0_to_scalar() {
        let yaml = r#"
name: MyToken
network: ["mainnet"]
source: ["0x0000000000000000000000000000000000000001"]
events:
  - name: Transfer
    topic0: "0x0000000000000000000000000000000000000000000000000000000000000001"
"#;
        let contract: Contract = serde_yaml::from_str(yaml).unwrap();
        let filter = contract.to_filter(1);
        match filter {
            crate::filter::Filter::Log(log) => {
                assert!(matches!(log.address, Some(crate::filter::AddressSource::Single(_))));
                assert!(!log.topics[0].is_null());
            }
            _ => panic!("expected a Log filter"),
        }
    }

    #[test]
    fn to_filter_combines_multiple_events_into_one_topic0_array() {
        let yaml = r#"
name: MultiEvent
network: ["mainnet"]
source: ["0x0000000000000000000000000000000000000001"]
events:
  - name: Transfer
    topic0: "0x0000000000000000000000000000000000000000000000000000000000000001"
  - name: Approval
    topic0: "0x0000000000000000000000000000000000000000000000000000000000000002"
"#;
        let contract: Contract = serde_yaml::from_str(yaml).unwrap();
        let filter = contract.to_filter(1);
        match filter {
            crate::filter::Filter::Log(log) => {
                assert_eq!(log.topics[0].values().len(), 2);
            }
            _ => panic!("expected a Log filter"),
        }
    }
}
