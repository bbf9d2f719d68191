//! Mempool gossip messages.
//!
//! # Wire Format
//!
//! ```text
//! ShareRequest:   [0x00][should_propagate: u8][SBOR-encoded request body]
//! MissingRequest: [0x01][32-byte content hash][34-byte request id]
//! ```

use crate::split_tag;
use anchorchain_core::{CodecError, GpaMessage};
use anchorchain_types::{NodeId, Request, RequestRef};
use std::sync::Arc;

const TAG_SHARE_REQUEST: u8 = 0x00;
const TAG_MISSING_REQUEST: u8 = 0x01;

/// Messages exchanged by the mempool gossip protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MempoolMessage {
    /// Carries a full request body.
    ShareRequest {
        sender: NodeId,
        recipient: NodeId,
        request: Arc<Request>,
        /// Whether the recipient should re-share the request to its own peers.
        should_propagate: bool,
    },

    /// Asks the recipient for the body of a referenced request.
    MissingRequest {
        sender: NodeId,
        recipient: NodeId,
        request_ref: RequestRef,
    },
}

impl MempoolMessage {
    /// Decode a message from `sender` addressed to `recipient`.
    pub fn decode(sender: NodeId, recipient: NodeId, bytes: &[u8]) -> Result<Self, CodecError> {
        let (tag, payload) = split_tag(bytes)?;
        match tag {
            TAG_SHARE_REQUEST => {
                let (flag, body) = payload.split_first().ok_or(CodecError::MessageTooShort)?;
                let should_propagate = match flag {
                    0 => false,
                    1 => true,
                    other => {
                        return Err(CodecError::InvalidField {
                            field: "should_propagate",
                            reason: format!("expected 0 or 1, got {}", other),
                        })
                    }
                };
                let request = Request::from_bytes(body)
                    .map_err(|e| CodecError::SborDecode(format!("{:?}", e)))?;
                Ok(Self::ShareRequest {
                    sender,
                    recipient,
                    request: Arc::new(request),
                    should_propagate,
                })
            }
            TAG_MISSING_REQUEST => {
                let request_ref =
                    RequestRef::from_bytes(payload).map_err(|e| CodecError::InvalidField {
                        field: "request_ref",
                        reason: e.to_string(),
                    })?;
                Ok(Self::MissingRequest {
                    sender,
                    recipient,
                    request_ref,
                })
            }
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }

    pub fn is_share_request(&self) -> bool {
        matches!(self, Self::ShareRequest { .. })
    }

    pub fn is_missing_request(&self) -> bool {
        matches!(self, Self::MissingRequest { .. })
    }
}

impl GpaMessage for MempoolMessage {
    fn sender(&self) -> NodeId {
        match self {
            Self::ShareRequest { sender, .. } | Self::MissingRequest { sender, .. } => *sender,
        }
    }

    fn recipient(&self) -> NodeId {
        match self {
            Self::ShareRequest { recipient, .. } | Self::MissingRequest { recipient, .. } => {
                *recipient
            }
        }
    }

    fn set_sender(&mut self, new_sender: NodeId) {
        match self {
            Self::ShareRequest { sender, .. } | Self::MissingRequest { sender, .. } => {
                *sender = new_sender
            }
        }
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::ShareRequest {
                request,
                should_propagate,
                ..
            } => {
                let body = request
                    .to_bytes()
                    .map_err(|e| CodecError::SborEncode(format!("{:?}", e)))?;
                let mut bytes = Vec::with_capacity(2 + body.len());
                bytes.push(TAG_SHARE_REQUEST);
                bytes.push(u8::from(*should_propagate));
                bytes.extend(body);
                Ok(bytes)
            }
            Self::MissingRequest { request_ref, .. } => {
                let mut bytes = Vec::with_capacity(1 + anchorchain_types::REQUEST_REF_LEN);
                bytes.push(TAG_MISSING_REQUEST);
                bytes.extend_from_slice(&request_ref.to_bytes());
                Ok(bytes)
            }
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::ShareRequest { .. } => "ShareRequest",
            Self::MissingRequest { .. } => "MissingRequest",
        }
    }
}
