//! Committee log.
//!
//! Decides, round by round, which log index and anchor output a committee
//! runs consensus on next. It is assembled from three variables:
//!
//! - [`VarLocalView`]: this node's belief about the anchor output chain tip,
//!   reconciling L1 confirmations with outputs produced locally
//! - [`VarLogIndex`]: agreement on the next log index among committee nodes
//! - [`VarOutput`]: releases a round decision once a log index, a tip and the
//!   "may propose" condition line up
//!
//! [`CmtLog`] wires them together as a [`Gpa`](anchorchain_core::Gpa).

mod cmt_log;
mod registry;
mod var_local_view;
mod var_log_index;
mod var_output;

pub use cmt_log::{CmtLog, CmtLogConfig, CmtLogError, CmtLogInput};
pub use registry::{ConsensusStateRegistry, InMemoryConsensusStateRegistry, RegistryError};
pub use var_local_view::{LocalViewUpdate, VarLocalView};
pub use var_log_index::VarLogIndex;
pub use var_output::{Output, VarOutput};

/// Maximum number of faulty nodes tolerated by a committee of `n` nodes.
pub fn max_faulty(n: usize) -> usize {
    n.saturating_sub(1) / 3
}
