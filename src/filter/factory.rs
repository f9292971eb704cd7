use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// Where in a defining log a factory-created child address is encoded.
///
/// `Offset(n)` means "decode a 20-byte address starting at byte `n` of the
/// log's `data`"; the `topicN` variants decode the whole 32-byte topic
/// word, right-aligned, as an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildAddressLocation {
    Topic1,
    Topic2,
    Topic3,
    Offset(u32),
}

impl ChildAddressLocation {
    pub fn canonical_tag(&self) -> String {
        match self {
            ChildAddressLocation::Topic1 => "topic1".to_string(),
            ChildAddressLocation::Topic2 => "topic2".to_string(),
            ChildAddressLocation::Topic3 => "topic3".to_string(),
            ChildAddressLocation::Offset(n) => format!("offset{n}"),
        }
    }

    /// Decodes a child address out of a log's topics/data per spec.md §3.
    pub fn decode(&self, topics: &[B256], data: &[u8]) -> Option<Address> {
        match self {
            ChildAddressLocation::Topic1 => topics.get(1).map(topic_to_address),
            ChildAddressLocation::Topic2 => topics.get(2).map(topic_to_address),
            ChildAddressLocation::Topic3 => topics.get(3).map(topic_to_address),
            ChildAddressLocation::Offset(offset) => {
                let start = *offset as usize;
                data.get(start..start + 20).map(Address::from_slice)
            }
        }
    }
}

fn topic_to_address(topic: &B256) -> Address {
    Address::from_slice(&topic.as_slice()[12..32])
}

/// An address set defined by emissions of a prior log (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Factory {
    pub chain_id: u64,
    pub address: Address,
    pub event_selector: B256,
    pub child_address_location: ChildAddressLocation,
}

impl Factory {
    pub fn fragment_id(&self) -> String {
        format!(
            "factory:{}:{:#x}:{:#x}:{}",
            self.chain_id,
            self.address,
            self.event_selector,
            self.child_address_location.canonical_tag()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_child_address_from_topic1() {
        let mut topic = [0u8; 32];
        topic[31] = 0xef;
        topic[12] = 0xde;
        let topics = vec![B256::ZERO, B256::from(topic)];
        let factory = Factory {
            chain_id: 1,
            address: Address::ZERO,
            event_selector: B256::ZERO,
            child_address_location: ChildAddressLocation::Topic1,
        };
        let decoded = factory.child_address_location.decode(&topics, &[]).unwrap();
        assert_eq!(decoded.as_slice()[0], 0xde);
        assert_eq!(decoded.as_slice()[19], 0xef);
    }

    #[test]
    fn decodes_child_address_from_data_offset() {
        let mut data = vec![0u8; 64];
        data[32..52].copy_from_slice(&[7u8; 20]);
        let loc = ChildAddressLocation::Offset(32);
        let decoded = loc.decode(&[], &data).unwrap();
        assert_eq!(decoded.as_slice(), &[7u8; 20]);
    }
}
