//! Committee log messages.
//!
//! # Wire Format
//!
//! ```text
//! NextLogIndex: [0x00][log_index: u32 big-endian]
//! ```

use crate::split_tag;
use anchorchain_core::{CodecError, GpaMessage};
use anchorchain_types::{LogIndex, NodeId};

const TAG_NEXT_LOG_INDEX: u8 = 0x00;

/// Messages exchanged between committee log instances of one committee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmtLogMessage {
    /// The sender proposes to run consensus at `log_index` next.
    NextLogIndex {
        sender: NodeId,
        recipient: NodeId,
        log_index: LogIndex,
    },
}

impl CmtLogMessage {
    pub fn decode(sender: NodeId, recipient: NodeId, bytes: &[u8]) -> Result<Self, CodecError> {
        let (tag, payload) = split_tag(bytes)?;
        match tag {
            TAG_NEXT_LOG_INDEX => {
                let raw: [u8; 4] = payload.try_into().map_err(|_| CodecError::InvalidField {
                    field: "log_index",
                    reason: format!("expected 4 bytes, got {}", payload.len()),
                })?;
                Ok(Self::NextLogIndex {
                    sender,
                    recipient,
                    log_index: LogIndex(u32::from_be_bytes(raw)),
                })
            }
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

impl GpaMessage for CmtLogMessage {
    fn sender(&self) -> NodeId {
        match self {
            Self::NextLogIndex { sender, .. } => *sender,
        }
    }

    fn recipient(&self) -> NodeId {
        match self {
            Self::NextLogIndex { recipient, .. } => *recipient,
        }
    }

    fn set_sender(&mut self, new_sender: NodeId) {
        match self {
            Self::NextLogIndex { sender, .. } => *sender = new_sender,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::NextLogIndex { log_index, .. } => {
                let mut bytes = Vec::with_capacity(5);
                bytes.push(TAG_NEXT_LOG_INDEX);
                bytes.extend_from_slice(&log_index.as_u32().to_be_bytes());
                Ok(bytes)
            }
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::NextLogIndex { .. } => "NextLogIndex",
        }
    }
}
