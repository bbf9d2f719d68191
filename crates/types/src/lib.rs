//! Core types for anchorchain consensus bookkeeping.
//!
//! This crate provides the foundational types used throughout the committee
//! log and mempool implementation:
//!
//! - **Primitives**: [`Hash`], [`Timestamp`]
//! - **Identifiers**: [`NodeId`], [`ChainId`], [`CommitteeAddress`], [`OutputId`],
//!   [`RequestId`], [`LogIndex`]
//! - **Requests**: [`Request`] (on-ledger and off-ledger) and [`RequestRef`]
//! - **L1 commitments**: [`AnchorOutput`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend on
//! any other workspace crates, making it the foundation layer.

mod anchor;
mod hash;
mod identifiers;
mod request;
mod time;

pub use anchor::AnchorOutput;
pub use hash::{Hash, HexError};
pub use identifiers::{ChainId, CommitteeAddress, LogIndex, NodeId, OutputId, RequestId};
pub use request::{
    CallTarget, OffLedgerRequest, OnLedgerRequest, OutputFeatures, Request, RequestBody,
    RequestRef, RequestRefError, REQUEST_REF_LEN,
};
pub use time::Timestamp;

/// Read-only mempool counters, exposed for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MempoolInfo {
    /// Number of requests currently held in the pool.
    pub total_pool: usize,
    /// Number of requests ever admitted.
    pub in_pool_counter: u64,
    /// Number of requests ever removed.
    pub out_pool_counter: u64,
}

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Create a test NodeId from a seed byte.
    pub fn test_node(seed: u8) -> NodeId {
        NodeId([seed; 32])
    }

    /// Create a test ChainId from a seed byte.
    pub fn test_chain(seed: u8) -> ChainId {
        ChainId(Hash::from_bytes(&[b'c', seed]))
    }

    /// Create a test committee address from a seed byte.
    pub fn test_committee(seed: u8) -> CommitteeAddress {
        CommitteeAddress(Hash::from_bytes(&[b'k', seed]))
    }

    /// Create a signed-looking off-ledger request with a distinct nonce.
    pub fn test_off_ledger_request(chain_id: ChainId, nonce: u64) -> Request {
        Request::new(RequestBody::OffLedger(OffLedgerRequest {
            chain_id,
            call: CallTarget {
                contract: 0x1234,
                entry_point: 0x5678,
            },
            params: b"foo=bar".to_vec(),
            gas_budget: 1_000,
            nonce,
            sender: [7u8; 32],
        }))
    }

    /// Create an on-ledger request targeting `chain_id` with the given features.
    pub fn test_on_ledger_request(chain_id: ChainId, seed: u8, features: OutputFeatures) -> Request {
        Request::new(RequestBody::OnLedger(OnLedgerRequest {
            output_id: OutputId::new(Hash::from_bytes(&[b'o', seed]), u16::from(seed)),
            target: chain_id,
            call: CallTarget {
                contract: 0x1234,
                entry_point: 0x5678,
            },
            params: vec![seed],
            gas_budget: 1_000,
            features,
        }))
    }

    /// Create an anchor output for `chain_id` controlled by `committee`.
    pub fn test_anchor_output(
        chain_id: ChainId,
        committee: CommitteeAddress,
        state_index: u32,
        seed: u8,
    ) -> AnchorOutput {
        AnchorOutput {
            id: OutputId::new(Hash::from_bytes(&[b'a', seed]), 0),
            chain_id,
            state_index,
            state_controller: committee,
            state_commitment: Hash::from_bytes(&[b's', seed]),
        }
    }
}
