//! Identifier newtypes.

use crate::Hash;
use sbor::prelude::BasicSbor;
use std::fmt;

/// Peer identity used for addressing only.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub struct NodeId(pub [u8; 32]);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..4]))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

/// Identity of a chain anchored on the L1.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub struct ChainId(pub Hash);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain:{}", self.0.short())
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainId({})", self.0.short())
    }
}

/// Address of a committee (the state controller of an anchor output).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub struct CommitteeAddress(pub Hash);

impl fmt::Display for CommitteeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmt:{}", self.0.short())
    }
}

impl fmt::Debug for CommitteeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitteeAddress({})", self.0.short())
    }
}

/// Reference to an L1 output: the producing transaction and the output index.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub struct OutputId {
    pub tx_id: Hash,
    pub index: u16,
}

impl OutputId {
    /// Encoded size: 32-byte transaction id followed by a big-endian u16.
    pub const BYTES: usize = Hash::BYTES + 2;

    pub fn new(tx_id: Hash, index: u16) -> Self {
        Self { tx_id, index }
    }

    pub fn to_bytes(&self) -> [u8; Self::BYTES] {
        let mut out = [0u8; Self::BYTES];
        out[..Hash::BYTES].copy_from_slice(self.tx_id.as_bytes());
        out[Hash::BYTES..].copy_from_slice(&self.index.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::BYTES]) -> Self {
        let mut tx = [0u8; Hash::BYTES];
        tx.copy_from_slice(&bytes[..Hash::BYTES]);
        let index = u16::from_be_bytes([bytes[Hash::BYTES], bytes[Hash::BYTES + 1]]);
        Self {
            tx_id: Hash::from_hash_bytes(&tx),
            index,
        }
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_id.short(), self.index)
    }
}

impl fmt::Debug for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputId({})", self)
    }
}

/// Globally unique request identifier.
///
/// On-ledger requests are identified by the L1 output that carries them;
/// off-ledger requests by a synthetic output id derived from their content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub struct RequestId(pub OutputId);

impl RequestId {
    pub const BYTES: usize = OutputId::BYTES;

    pub fn output_id(&self) -> OutputId {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

/// Round number of one committee agreement attempt.
///
/// `LogIndex::NIL` is the "no candidate yet" sentinel; real indices start at 1.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor)]
pub struct LogIndex(pub u32);

impl LogIndex {
    pub const NIL: LogIndex = LogIndex(0);

    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }

    pub fn next(&self) -> LogIndex {
        LogIndex(self.0.saturating_add(1))
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "nil")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Debug for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LI({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_id_bytes_layout() {
        let id = OutputId::new(Hash::from_bytes(b"tx"), 0x0102);
        let bytes = id.to_bytes();
        assert_eq!(&bytes[..32], Hash::from_bytes(b"tx").as_bytes());
        assert_eq!(&bytes[32..], &[0x01, 0x02]);
        assert_eq!(OutputId::from_bytes(&bytes), id);
    }

    #[test]
    fn test_log_index_nil_and_next() {
        assert!(LogIndex::NIL.is_nil());
        assert_eq!(LogIndex::NIL.next(), LogIndex(1));
        assert!(!LogIndex(1).is_nil());
        assert_eq!(LogIndex(7).to_string(), "7");
        assert_eq!(LogIndex::NIL.to_string(), "nil");
    }
}
