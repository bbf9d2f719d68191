//! Chain manager.
//!
//! A chain is controlled by one committee at a time, named by the
//! `state_controller` of its latest anchor output. The [`ChainManager`] keeps
//! a [`CmtLog`](anchorchain_cmtlog::CmtLog) for every committee this node is a
//! member of, routes L1 events to the one in control and keeps the others
//! suspended. Its output tells the node which consensus instance to run and
//! which peers to gossip with.
//!
//! ```text
//!   L1 confirmations ──► ChainManager ──► CmtLog(committee A)  (active)
//!                            │        └─► CmtLog(committee B)  (suspended)
//!                            ▼
//!                      ChainMgrOutput { need_consensus, committee_nodes, access_nodes }
//! ```

mod chain_manager;
mod committee;

pub use chain_manager::{ChainManager, ChainMgrInput, ChainMgrOutput, NeedConsensus};
pub use committee::{CommitteeInfo, CommitteeRegistry, InMemoryCommitteeRegistry};
