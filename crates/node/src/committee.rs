use anchorchain_types::{CommitteeAddress, NodeId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Membership of a committee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitteeInfo {
    pub address: CommitteeAddress,
    pub nodes: Vec<NodeId>,
    /// Faulty nodes tolerated.
    pub f: usize,
}

impl CommitteeInfo {
    pub fn new(address: CommitteeAddress, nodes: Vec<NodeId>) -> Self {
        let f = anchorchain_cmtlog::max_faulty(nodes.len());
        Self { address, nodes, f }
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes.contains(node)
    }
}

/// Lookup of committees by address, e.g. backed by the key registry filled
/// in by distributed key generation.
pub trait CommitteeRegistry: Send + Sync + 'static {
    fn committee(&self, address: &CommitteeAddress) -> Option<CommitteeInfo>;
}

#[derive(Debug, Default)]
pub struct InMemoryCommitteeRegistry {
    committees: RwLock<HashMap<CommitteeAddress, CommitteeInfo>>,
}

impl InMemoryCommitteeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: CommitteeInfo) {
        self.committees.write().insert(info.address, info);
    }
}

impl CommitteeRegistry for InMemoryCommitteeRegistry {
    fn committee(&self, address: &CommitteeAddress) -> Option<CommitteeInfo> {
        self.committees.read().get(address).cloned()
    }
}
