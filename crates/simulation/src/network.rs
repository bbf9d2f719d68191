//! Simulated network with deterministic packet loss and partitions.

use anchorchain_types::NodeId;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;

/// Configuration for simulated network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Packet loss rate (0.0 - 1.0). Messages are dropped with this probability.
    pub packet_loss_rate: f64,
    /// Deliver in-flight messages in random order instead of send order.
    pub reorder: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            packet_loss_rate: 0.0,
            reorder: true,
        }
    }
}

/// What happens to a message put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Deliver,
    DroppedPartition,
    DroppedLoss,
}

/// Simulated network for deterministic message delivery.
///
/// Supports:
/// - Packet loss (probabilistic message drops)
/// - Network partitions (blocking communication between node pairs)
#[derive(Debug)]
pub struct SimulatedNetwork {
    config: NetworkConfig,
    /// Partitioned node pairs. If (a, b) is in this set, messages from a to b are dropped.
    /// Partitions are directional - add both (a, b) and (b, a) for bidirectional partition.
    partitions: HashSet<(NodeId, NodeId)>,
}

impl SimulatedNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            partitions: HashSet::new(),
        }
    }

    // ─── Partition Management ───

    /// Check if a message from `from` to `to` would be dropped by a partition.
    pub fn is_partitioned(&self, from: NodeId, to: NodeId) -> bool {
        self.partitions.contains(&(from, to))
    }

    pub fn partition_unidirectional(&mut self, from: NodeId, to: NodeId) {
        self.partitions.insert((from, to));
    }

    pub fn partition_bidirectional(&mut self, a: NodeId, b: NodeId) {
        self.partitions.insert((a, b));
        self.partitions.insert((b, a));
    }

    /// Isolate `node` from every node in `others`.
    pub fn isolate_node(&mut self, node: NodeId, others: &[NodeId]) {
        for other in others.iter().filter(|o| **o != node) {
            self.partition_bidirectional(node, *other);
        }
    }

    pub fn heal_bidirectional(&mut self, a: NodeId, b: NodeId) {
        self.partitions.remove(&(a, b));
        self.partitions.remove(&(b, a));
    }

    /// Restore full connectivity.
    pub fn heal_all(&mut self) {
        self.partitions.clear();
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    // ─── Packet Loss ───

    pub fn should_drop_packet(&self, rng: &mut ChaCha8Rng) -> bool {
        self.config.packet_loss_rate > 0.0 && rng.gen::<f64>() < self.config.packet_loss_rate
    }

    /// Set the packet loss rate, clamped to 0.0 - 1.0.
    pub fn set_packet_loss_rate(&mut self, rate: f64) {
        self.config.packet_loss_rate = rate.clamp(0.0, 1.0);
    }

    pub fn packet_loss_rate(&self) -> f64 {
        self.config.packet_loss_rate
    }

    // ─── Message Delivery Decision ───

    /// Decide the fate of a message from `from` to `to`. Partitions are
    /// checked first, so they never consume randomness.
    pub fn delivery(&self, from: NodeId, to: NodeId, rng: &mut ChaCha8Rng) -> Delivery {
        if self.is_partitioned(from, to) {
            return Delivery::DroppedPartition;
        }
        if self.should_drop_packet(rng) {
            return Delivery::DroppedLoss;
        }
        Delivery::Deliver
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }
}
