//! In-process transport for tests and local clusters.

use super::{InboundFrame, NetworkError, Transport};
use anchorchain_types::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Connects every registered node to every other through bounded channels.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    nodes: Arc<RwLock<HashMap<NodeId, mpsc::Sender<InboundFrame>>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the network as `me`, replacing any earlier registration.
    pub fn register(
        &self,
        me: NodeId,
        capacity: usize,
    ) -> (LoopbackTransport, mpsc::Receiver<InboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.nodes.write().insert(me, tx);
        let transport = LoopbackTransport {
            me,
            network: self.clone(),
        };
        (transport, rx)
    }

    /// Leave the network; frames for `node` are refused afterwards.
    pub fn unregister(&self, node: &NodeId) {
        self.nodes.write().remove(node);
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One node's handle on a [`LoopbackNetwork`].
#[derive(Clone)]
pub struct LoopbackTransport {
    me: NodeId,
    network: LoopbackNetwork,
}

impl LoopbackTransport {
    pub fn me(&self) -> NodeId {
        self.me
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, to: NodeId, bytes: Vec<u8>) -> Result<(), NetworkError> {
        let nodes = self.network.nodes.read();
        let peer = nodes.get(&to).ok_or(NetworkError::UnknownPeer(to))?;
        trace!(from = %self.me, to = %to, len = bytes.len(), "Loopback send");
        peer.try_send(InboundFrame {
            from: self.me,
            bytes,
        })
        .map_err(|_| NetworkError::PeerUnavailable(to))
    }
}
