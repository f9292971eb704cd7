//! `TopicSlot` — one of the (at most) four topic positions in a log filter.
//!
//! spec.md §9 Open Question: the original collapses a single-element topic
//! array to a scalar before matching. We do the same, and we do it once, at
//! construction, so every downstream layer (fragment canonicalization, SQL
//! generation, RPC filter building) only ever sees the collapsed form.

use alloy::primitives::B256;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum TopicSlot {
    #[default]
    Null,
    Single(B256),
    Any(Vec<B256>),
}

impl TopicSlot {
    /// Builds a slot from a list of candidate topic values, collapsing a
    /// single-element list to `Single` and an empty list to `Null`.
    pub fn from_values(mut values: Vec<B256>) -> Self {
        match values.len() {
            0 => TopicSlot::Null,
            1 => TopicSlot::Single(values.remove(0)),
            _ => TopicSlot::Any(values),
        }
    }

    pub fn values(&self) -> Vec<B256> {
        match self {
            TopicSlot::Null => vec![],
            TopicSlot::Single(v) => vec![*v],
            TopicSlot::Any(vs) => vs.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TopicSlot::Null)
    }

    /// One fragment per distinct value, per spec.md §4.3: a topic slot with
    /// `n` candidate values decomposes into `n` fragments whose union
    /// reproduces the original filter's matches.
    pub fn fragment_values(&self) -> Vec<Option<B256>> {
        match self {
            TopicSlot::Null => vec![None],
            TopicSlot::Single(v) => vec![Some(*v)],
            TopicSlot::Any(vs) => vs.iter().map(|v| Some(*v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(n: u8) -> B256 {
        B256::repeat_byte(n)
    }

    #[test]
    fn single_element_array_collapses_to_scalar() {
        let from_array = TopicSlot::from_values(vec![b(1)]);
        let from_scalar = TopicSlot::Single(b(1));
        assert_eq!(from_array, from_scalar);
    }

    #[test]
    fn empty_is_null() {
        assert_eq!(TopicSlot::from_values(vec![]), TopicSlot::Null);
    }

    #[test]
    fn multi_value_fragments_one_per_value() {
        let slot = TopicSlot::from_values(vec![b(1), b(2)]);
        assert_eq!(slot.fragment_values(), vec![Some(b(1)), Some(b(2))]);
    }
}
