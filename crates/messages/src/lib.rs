//! Network messages for the anchorchain protocols.
//!
//! Every message encodes as `[1-byte type tag][payload]`. The sender and
//! recipient are not part of the payload: the transport reports the sender and
//! the recipient is the decoding node.

pub mod chain_mgr;
pub mod cmtlog;
pub mod mempool;

pub use chain_mgr::ChainMgrMessage;
pub use cmtlog::CmtLogMessage;
pub use mempool::MempoolMessage;

use anchorchain_core::CodecError;

/// Split a message into its type tag and payload.
pub(crate) fn split_tag(bytes: &[u8]) -> Result<(u8, &[u8]), CodecError> {
    match bytes.split_first() {
        Some((tag, payload)) => Ok((*tag, payload)),
        None => Err(CodecError::MessageTooShort),
    }
}
