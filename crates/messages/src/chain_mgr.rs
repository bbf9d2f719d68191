//! Chain manager messages.
//!
//! The chain manager runs one committee log per committee and only adds the
//! committee address in front of the inner message.
//!
//! # Wire Format
//!
//! ```text
//! [0x00][32-byte committee address][committee log message]
//! ```

use crate::{split_tag, CmtLogMessage};
use anchorchain_core::{CodecError, GpaMessage};
use anchorchain_types::{CommitteeAddress, Hash, NodeId};

const TAG_COMMITTEE: u8 = 0x00;

/// A committee log message routed to the instance of `committee`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainMgrMessage {
    pub committee: CommitteeAddress,
    pub inner: CmtLogMessage,
}

impl ChainMgrMessage {
    pub fn new(committee: CommitteeAddress, inner: CmtLogMessage) -> Self {
        Self { committee, inner }
    }

    pub fn decode(sender: NodeId, recipient: NodeId, bytes: &[u8]) -> Result<Self, CodecError> {
        let (tag, payload) = split_tag(bytes)?;
        if tag != TAG_COMMITTEE {
            return Err(CodecError::UnknownMessageType(tag));
        }
        if payload.len() < Hash::BYTES {
            return Err(CodecError::MessageTooShort);
        }
        let (addr, rest) = payload.split_at(Hash::BYTES);
        let mut raw = [0u8; Hash::BYTES];
        raw.copy_from_slice(addr);
        Ok(Self {
            committee: CommitteeAddress(Hash::from_hash_bytes(&raw)),
            inner: CmtLogMessage::decode(sender, recipient, rest)?,
        })
    }
}

impl GpaMessage for ChainMgrMessage {
    fn sender(&self) -> NodeId {
        self.inner.sender()
    }

    fn recipient(&self) -> NodeId {
        self.inner.recipient()
    }

    fn set_sender(&mut self, sender: NodeId) {
        self.inner.set_sender(sender);
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let inner = self.inner.encode()?;
        let mut bytes = Vec::with_capacity(1 + Hash::BYTES + inner.len());
        bytes.push(TAG_COMMITTEE);
        bytes.extend_from_slice(self.committee.0.as_bytes());
        bytes.extend(inner);
        Ok(bytes)
    }

    fn type_name(&self) -> &'static str {
        self.inner.type_name()
    }
}
