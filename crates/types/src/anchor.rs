//! Anchor outputs.

use crate::{ChainId, CommitteeAddress, Hash, OutputId};
use sbor::prelude::BasicSbor;
use std::cmp::Ordering;

/// The L1 output holding a chain's current state commitment.
///
/// Ordered by `state_index`; equality compares every field, so two outputs at
/// the same index that differ in content are distinct (a fork).
#[derive(Debug, Clone, PartialEq, Eq, Hash, BasicSbor)]
pub struct AnchorOutput {
    pub id: OutputId,
    pub chain_id: ChainId,
    pub state_index: u32,
    /// Committee allowed to produce the next anchor output.
    pub state_controller: CommitteeAddress,
    pub state_commitment: Hash,
}

impl AnchorOutput {
    /// Whether `self` directly follows `prev` in the chain.
    pub fn follows(&self, prev: &AnchorOutput) -> bool {
        self.chain_id == prev.chain_id && self.state_index == prev.state_index.saturating_add(1)
    }
}

impl PartialOrd for AnchorOutput {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AnchorOutput {
    fn cmp(&self, other: &Self) -> Ordering {
        self.state_index
            .cmp(&other.state_index)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl std::fmt::Display for AnchorOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AO[{}]@{}", self.state_index, self.id)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::*;

    #[test]
    fn test_ordered_by_state_index() {
        let chain = test_chain(1);
        let cmt = test_committee(1);
        let a = test_anchor_output(chain, cmt, 1, 9);
        let b = test_anchor_output(chain, cmt, 2, 1);
        assert!(a < b);
        assert!(b.follows(&a));
        assert!(!a.follows(&b));
    }
}
