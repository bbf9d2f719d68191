//! Transport abstraction and inbound routing.

mod codec;
mod loopback;

pub use codec::{decode_envelope, encode_envelope, Protocol, WIRE_VERSION};
pub use loopback::{LoopbackNetwork, LoopbackTransport};

use anchorchain_types::NodeId;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("unknown peer {0}")]
    UnknownPeer(NodeId),

    #[error("peer {0} is not accepting messages")]
    PeerUnavailable(NodeId),
}

/// A frame as received from the wire.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Sender as authenticated by the transport.
    pub from: NodeId,
    pub bytes: Vec<u8>,
}

/// A protocol payload with the envelope removed.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub from: NodeId,
    pub payload: Vec<u8>,
}

/// Point-to-point delivery of encoded frames.
///
/// Sending never blocks: a peer that cannot take the frame right now loses
/// it, and protocols recover through their own retries.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, to: NodeId, bytes: Vec<u8>) -> Result<(), NetworkError>;
}

/// Spawn the task handing inbound frames to the runner of their protocol.
pub fn spawn_inbound_router(
    mut frames: mpsc::Receiver<InboundFrame>,
    routes: HashMap<Protocol, mpsc::Sender<Inbound>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let (protocol, payload) = match decode_envelope(&frame.bytes) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(from = %frame.from, error = %e, "Dropping undecodable frame");
                    continue;
                }
            };
            let Some(route) = routes.get(&protocol) else {
                debug!(from = %frame.from, protocol = protocol.name(), "No runner for protocol");
                continue;
            };
            let inbound = Inbound {
                from: frame.from,
                payload: payload.to_vec(),
            };
            if route.try_send(inbound).is_err() {
                warn!(from = %frame.from, protocol = protocol.name(), "Runner inbound queue full or closed, dropping");
            }
        }
        trace!("Inbound router stopped");
    })
}
