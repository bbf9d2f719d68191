//! Envelope encoding for network transport.
//!
//! # Wire Format
//!
//! ```text
//! [version: u8][protocol: u8][payload: protocol message]
//! ```
//!
//! - Version is currently `1`
//! - Payload is the protocol message in its own tagged encoding
//!
//! One connection carries every protocol of a node; the protocol byte picks
//! the runner the payload is handed to.

use anchorchain_core::CodecError;

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Protocols multiplexed over one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Mempool,
    ChainMgr,
}

impl Protocol {
    pub fn tag(self) -> u8 {
        match self {
            Protocol::Mempool => 0x00,
            Protocol::ChainMgr => 0x01,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0x00 => Ok(Protocol::Mempool),
            0x01 => Ok(Protocol::ChainMgr),
            other => Err(CodecError::UnknownProtocol(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Mempool => "mempool",
            Protocol::ChainMgr => "chain_mgr",
        }
    }
}

/// Wrap a protocol payload for the wire.
pub fn encode_envelope(protocol: Protocol, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 + payload.len());
    bytes.push(WIRE_VERSION);
    bytes.push(protocol.tag());
    bytes.extend_from_slice(payload);
    bytes
}

/// Split a wire frame into its protocol and payload.
pub fn decode_envelope(data: &[u8]) -> Result<(Protocol, &[u8]), CodecError> {
    let [version, tag, payload @ ..] = data else {
        return Err(CodecError::MessageTooShort);
    };
    if *version != WIRE_VERSION {
        return Err(CodecError::UnknownVersion(*version));
    }
    Ok((Protocol::from_tag(*tag)?, payload))
}
