//! Fragment canonicalization (spec.md §4.3, §3).
//!
//! A user-declared filter is broken into one or more storage-level
//! fragments whose union of matches equals the original filter: one
//! fragment per topic-slot value for array-valued topics, one fragment per
//! address for an enumerated address list. Each fragment carries a
//! deterministic `id` derived from its distinguishing columns, used as the
//! primary key into the interval index (spec.md §3 "Interval index").

use alloy::primitives::{Address, B256};

use super::factory::Factory;
use super::topic::TopicSlot;
use super::{AddressSource, BlockFilter, CallTraceFilter, Filter, LogFilter};

fn hex_or_dash(value: Option<B256>) -> String {
    value.map(|v| format!("{v:#x}")).unwrap_or_else(|| "-".to_string())
}

fn addr_or_dash(value: Option<Address>) -> String {
    value.map(|v| format!("{v:#x}")).unwrap_or_else(|| "-".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFragment {
    pub id: String,
    pub chain_id: u64,
    /// `None` when the fragment is address-less (topics-only) or sourced
    /// from a factory (see `factory`).
    pub address: Option<Address>,
    pub factory: Option<Factory>,
    pub topic0: Option<B256>,
    pub topic1: Option<B256>,
    pub topic2: Option<B256>,
    pub topic3: Option<B256>,
    pub include_receipts: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFragment {
    pub id: String,
    pub chain_id: u64,
    pub interval: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFragment {
    pub id: String,
    pub chain_id: u64,
    pub to_address: Option<Address>,
    pub factory: Option<Factory>,
    pub from_addresses: Vec<Address>,
    pub function_selectors: Vec<[u8; 4]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Log(LogFragment),
    Block(BlockFragment),
    Trace(TraceFragment),
}

impl Fragment {
    pub fn id(&self) -> &str {
        match self {
            Fragment::Log(f) => &f.id,
            Fragment::Block(f) => &f.id,
            Fragment::Trace(f) => &f.id,
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Fragment::Log(f) => f.chain_id,
            Fragment::Block(f) => f.chain_id,
            Fragment::Trace(f) => f.chain_id,
        }
    }

    /// The storage table name this fragment's interval rows live in,
    /// matching spec.md §3's `{LogFilter | FactoryLogFilter | BlockFilter |
    /// TraceFilter | FactoryTraceFilter}` table set.
    pub fn table_kind(&self) -> &'static str {
        match self {
            Fragment::Log(f) if f.factory.is_some() => "factory_log_filter",
            Fragment::Log(_) => "log_filter",
            Fragment::Block(_) => "block_filter",
            Fragment::Trace(f) if f.factory.is_some() => "factory_trace_filter",
            Fragment::Trace(_) => "trace_filter",
        }
    }
}

/// Builds a log fragment's canonical id (spec.md §3 Interval index). Shared
/// between `canonicalize_log` (which enumerates every fragment a filter
/// decomposes into) and `log_fragment_id_for_match` (which, given a single
/// already-matched log, recovers the one fragment it belongs to) so the two
/// can never disagree on the id shape.
fn format_log_fragment_id(
    chain_id: u64,
    address: Option<Address>,
    factory: Option<&Factory>,
    topic0: Option<B256>,
    topic1: Option<B256>,
    topic2: Option<B256>,
    topic3: Option<B256>,
) -> String {
    match factory {
        // A factory fragment carries no address component: the whole point
        // is that its address set is discovered dynamically, not fixed at
        // canonicalization time (spec.md §3 Factory).
        Some(f) => format!(
            "{}:{}:{}:{}:{}",
            f.fragment_id(),
            hex_or_dash(topic0),
            hex_or_dash(topic1),
            hex_or_dash(topic2),
            hex_or_dash(topic3)
        ),
        None => format!(
            "log:{chain_id}:{}:{}:{}:{}:{}",
            addr_or_dash(address),
            hex_or_dash(topic0),
            hex_or_dash(topic1),
            hex_or_dash(topic2),
            hex_or_dash(topic3)
        ),
    }
}

fn canonicalize_log(filter: &LogFilter) -> Vec<Fragment> {
    let (addresses, factory): (Vec<Option<Address>>, Option<Factory>) = match &filter.address {
        None => (vec![None], None),
        Some(AddressSource::Single(addr)) => (vec![Some(*addr)], None),
        Some(AddressSource::Multi(addrs)) => (addrs.iter().map(|a| Some(*a)).collect(), None),
        Some(AddressSource::Factory(factory)) => (vec![None], Some(factory.clone())),
    };

    let t0 = filter.topics[0].fragment_values();
    let t1 = filter.topics[1].fragment_values();
    let t2 = filter.topics[2].fragment_values();
    let t3 = filter.topics[3].fragment_values();

    let mut fragments = Vec::new();
    for address in &addresses {
        for topic0 in &t0 {
            for topic1 in &t1 {
                for topic2 in &t2 {
                    for topic3 in &t3 {
                        let id = format_log_fragment_id(
                            filter.chain_id,
                            *address,
                            factory.as_ref(),
                            *topic0,
                            *topic1,
                            *topic2,
                            *topic3,
                        );
                        fragments.push(Fragment::Log(LogFragment {
                            id,
                            chain_id: filter.chain_id,
                            address: *address,
                            factory: factory.clone(),
                            topic0: *topic0,
                            topic1: *topic1,
                            topic2: *topic2,
                            topic3: *topic3,
                            include_receipts: filter.include_receipts,
                        }));
                    }
                }
            }
        }
    }
    fragments
}

/// Recovers the single canonical fragment id a concrete, already-matched
/// log belongs to, given the filter that produced it (spec.md §4.2
/// `insertLogs`: "the `checkpoint` column is overwritten on conflict" — the
/// row also needs to land under the right `fragment_id` for `getEvents` to
/// ever find it again).
///
/// A `Null` topic slot or an address-less filter always contributes `None`
/// to the id (one fragment matches every concrete value at that position);
/// a `Single` slot/address contributes its declared value; an `Any` slot or
/// a `Multi` address list contributes the log's own concrete value, since
/// that's what distinguishes which of the per-value fragments it landed in.
/// A factory-sourced filter never contributes an address component at all.
pub fn log_fragment_id_for_match(
    filter: &LogFilter,
    log_address: Address,
    log_topic0: Option<B256>,
    log_topic1: Option<B256>,
    log_topic2: Option<B256>,
    log_topic3: Option<B256>,
) -> String {
    let factory = match &filter.address {
        Some(AddressSource::Factory(f)) => Some(f),
        _ => None,
    };
    let address = match &filter.address {
        None | Some(AddressSource::Factory(_)) => None,
        Some(AddressSource::Single(_)) | Some(AddressSource::Multi(_)) => Some(log_address),
    };

    let topic_component = |slot: &TopicSlot, matched: Option<B256>| match slot {
        TopicSlot::Null => None,
        TopicSlot::Single(v) => Some(*v),
        TopicSlot::Any(_) => matched,
    };

    format_log_fragment_id(
        filter.chain_id,
        address,
        factory,
        topic_component(&filter.topics[0], log_topic0),
        topic_component(&filter.topics[1], log_topic1),
        topic_component(&filter.topics[2], log_topic2),
        topic_component(&filter.topics[3], log_topic3),
    )
}

fn canonicalize_block(filter: &BlockFilter) -> Vec<Fragment> {
    vec![Fragment::Block(BlockFragment {
        id: format!("block:{}:{}:{}", filter.chain_id, filter.interval, filter.offset),
        chain_id: filter.chain_id,
        interval: filter.interval,
        offset: filter.offset,
    })]
}

/// Builds a trace fragment's canonical id; shared between
/// `canonicalize_call_trace` and `trace_fragment_id_for_match` for the same
/// reason as `format_log_fragment_id` above.
fn format_trace_fragment_id(chain_id: u64, to_address: Option<Address>, factory: Option<&Factory>) -> String {
    match factory {
        Some(f) => f.fragment_id(),
        None => format!("trace:{chain_id}:{}", addr_or_dash(to_address)),
    }
}

fn canonicalize_call_trace(filter: &CallTraceFilter) -> Vec<Fragment> {
    let (to_addresses, factory): (Vec<Option<Address>>, Option<Factory>) = match &filter.to_address
    {
        AddressSource::Single(addr) => (vec![Some(*addr)], None),
        AddressSource::Multi(addrs) => (addrs.iter().map(|a| Some(*a)).collect(), None),
        AddressSource::Factory(factory) => (vec![None], Some(factory.clone())),
    };

    to_addresses
        .into_iter()
        .map(|to_address| {
            let id = format_trace_fragment_id(filter.chain_id, to_address, factory.as_ref());
            Fragment::Trace(TraceFragment {
                id,
                chain_id: filter.chain_id,
                to_address,
                factory: factory.clone(),
                from_addresses: filter.from_address.clone().unwrap_or_default(),
                function_selectors: filter.function_selectors.clone(),
            })
        })
        .collect()
}

/// Recovers the canonical fragment id a concrete, already-matched call
/// trace belongs to, mirroring `log_fragment_id_for_match`: a factory
/// source contributes no address component, a `Single`/`Multi` source
/// contributes the trace's own concrete `to` address.
pub fn trace_fragment_id_for_match(filter: &CallTraceFilter, to_address: Option<Address>) -> String {
    match &filter.to_address {
        AddressSource::Factory(f) => f.fragment_id(),
        AddressSource::Single(_) | AddressSource::Multi(_) => {
            format_trace_fragment_id(filter.chain_id, to_address, None)
        }
    }
}

/// Decomposes a filter into its storage fragments per spec.md §4.3.
pub fn canonicalize(filter: &Filter) -> Vec<Fragment> {
    match filter {
        Filter::Log(f) => canonicalize_log(f),
        Filter::Block(f) => canonicalize_block(f),
        Filter::CallTrace(f) => canonicalize_call_trace(f),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::topic::TopicSlot;

    fn b(n: u8) -> B256 {
        B256::repeat_byte(n)
    }

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    #[test]
    fn topic0_array_yields_one_fragment_per_value() {
        let filter = LogFilter {
            chain_id: 1,
            from_block: 0,
            to_block: None,
            address: None,
            topics: [
                TopicSlot::Any(vec![b(0xa), b(0xb)]),
                TopicSlot::Null,
                TopicSlot::Null,
                TopicSlot::Null,
            ],
            include_receipts: false,
        };
        let fragments = canonicalize_log(&filter);
        assert_eq!(fragments.len(), 2);
        let ids: Vec<&str> = fragments.iter().map(|f| f.id()).collect();
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn enumerated_address_list_yields_one_fragment_per_address() {
        let filter = LogFilter {
            chain_id: 1,
            from_block: 0,
            to_block: None,
            address: Some(AddressSource::Multi(vec![addr(1), addr(2), addr(3)])),
            topics: Default::default(),
            include_receipts: false,
        };
        let fragments = canonicalize_log(&filter);
        assert_eq!(fragments.len(), 3);
    }

    #[test]
    fn fragment_id_is_deterministic() {
        let filter = LogFilter {
            chain_id: 1,
            from_block: 0,
            to_block: None,
            address: Some(AddressSource::Single(addr(9))),
            topics: [TopicSlot::Single(b(1)), TopicSlot::Null, TopicSlot::Null, TopicSlot::Null],
            include_receipts: false,
        };
        let a = canonicalize_log(&filter);
        let b = canonicalize_log(&filter);
        assert_eq!(a[0].id(), b[0].id());
    }
}
