//! Deterministic multi-node runner for protocol automata.
//!
//! Messages travel through the real codec: every delivery encodes the message
//! and the recipient decodes it with the sender reported by the network.

use crate::network::{Delivery, NetworkConfig, SimulatedNetwork};
use anchorchain_core::{Gpa, GpaMessage, OutMessages, StaggeredMessages};
use anchorchain_types::NodeId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Upper bound on staggered ticks in one `run_all`, so that a batch whose
/// stop condition never fires cannot run forever.
const DEFAULT_MAX_TICKS: u64 = 10_000;

/// Statistics collected during a run.
#[derive(Debug, Default, Clone)]
pub struct SimulationStats {
    pub inputs_applied: u64,
    /// Messages handed to their recipient.
    pub messages_delivered: u64,
    pub messages_dropped_partition: u64,
    pub messages_dropped_loss: u64,
    /// Messages addressed to a node not in the simulation.
    pub messages_unroutable: u64,
    /// Messages the recipient could not decode.
    pub codec_errors: u64,
    /// Staggered batch releases.
    pub staggered_ticks: u64,
}

impl SimulationStats {
    /// Total messages dropped (partition + packet loss).
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped_partition + self.messages_dropped_loss
    }
}

/// Orders staggered releases by virtual time, ties broken by scheduling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TickKey {
    time: Duration,
    seq: u64,
}

/// Runs a set of protocol instances against each other in one thread.
///
/// Given the same seed, produces identical results every run.
pub struct TestContext<G: Gpa> {
    nodes: BTreeMap<NodeId, G>,
    in_flight: Vec<G::Message>,
    staggered: BTreeMap<TickKey, StaggeredMessages<G::Message>>,
    network: SimulatedNetwork,
    rng: ChaCha8Rng,
    /// Virtual time, advanced by staggered releases only.
    now: Duration,
    sequence: u64,
    max_ticks: u64,
    stats: SimulationStats,
}

impl<G: Gpa> TestContext<G> {
    pub fn new(nodes: impl IntoIterator<Item = (NodeId, G)>, seed: u64) -> Self {
        Self::with_network(nodes, seed, NetworkConfig::default())
    }

    pub fn with_network(
        nodes: impl IntoIterator<Item = (NodeId, G)>,
        seed: u64,
        config: NetworkConfig,
    ) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            in_flight: Vec::new(),
            staggered: BTreeMap::new(),
            network: SimulatedNetwork::new(config),
            rng: ChaCha8Rng::seed_from_u64(seed),
            now: Duration::ZERO,
            sequence: 0,
            max_ticks: DEFAULT_MAX_TICKS,
            stats: SimulationStats::default(),
        }
    }

    pub fn set_max_ticks(&mut self, max_ticks: u64) -> &mut Self {
        self.max_ticks = max_ticks;
        self
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn node(&self, id: &NodeId) -> Option<&G> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut G> {
        self.nodes.get_mut(id)
    }

    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Staggered batches still scheduled.
    pub fn staggered_pending(&self) -> usize {
        self.staggered.len()
    }

    pub fn outputs(&self) -> BTreeMap<NodeId, G::Output> {
        self.nodes.iter().map(|(id, n)| (*id, n.output())).collect()
    }

    /// Apply `input` on `node` now; resulting messages wait for `run_all`.
    pub fn with_input(&mut self, node: NodeId, input: G::Input) -> &mut Self {
        let Some(gpa) = self.nodes.get_mut(&node) else {
            warn!(node = %node, "Input for unknown node ignored");
            return self;
        };
        let out = gpa.input(input);
        self.stats.inputs_applied += 1;
        self.enqueue(out);
        self
    }

    pub fn with_inputs(&mut self, inputs: impl IntoIterator<Item = (NodeId, G::Input)>) -> &mut Self {
        for (node, input) in inputs {
            self.with_input(node, input);
        }
        self
    }

    /// Deliver messages and release staggered batches until nothing is left
    /// to do.
    pub fn run_all(&mut self) -> &mut Self {
        let mut ticks = 0u64;
        loop {
            while !self.in_flight.is_empty() {
                let msg = if self.network.config().reorder {
                    let idx = self.rng.gen_range(0..self.in_flight.len());
                    self.in_flight.swap_remove(idx)
                } else {
                    self.in_flight.remove(0)
                };
                self.deliver(msg);
            }

            if ticks >= self.max_ticks {
                warn!(
                    pending = self.staggered.len(),
                    "Tick limit reached with staggered batches pending"
                );
                break;
            }
            let Some((key, mut batch)) = self.staggered.pop_first() else {
                break;
            };
            ticks += 1;
            self.now = key.time;
            let released = batch.next_batch();
            self.stats.staggered_ticks += 1;
            trace!(time = ?self.now, released = released.len(), "Staggered release");
            self.in_flight.extend(released);
            if !batch.is_done() {
                self.schedule(batch);
            }
        }
        debug!(
            delivered = self.stats.messages_delivered,
            dropped = self.stats.messages_dropped(),
            time = ?self.now,
            "Run complete"
        );
        self
    }

    pub fn print_all_status_strings(&self, title: &str) {
        for (id, node) in &self.nodes {
            info!(node = %id, status = %node.status_string(), "{title}");
        }
    }

    fn enqueue(&mut self, out: OutMessages<G::Message>) {
        let (immediate, staggered) = out.into_parts();
        self.in_flight.extend(immediate);
        for batch in staggered {
            // The first release happens right away.
            let key = self.next_key(Duration::ZERO);
            self.staggered.insert(key, batch);
        }
    }

    fn schedule(&mut self, batch: StaggeredMessages<G::Message>) {
        let key = self.next_key(batch.interval());
        self.staggered.insert(key, batch);
    }

    fn next_key(&mut self, delay: Duration) -> TickKey {
        self.sequence += 1;
        TickKey {
            time: self.now + delay,
            seq: self.sequence,
        }
    }

    fn deliver(&mut self, msg: G::Message) {
        let from = msg.sender();
        let to = msg.recipient();
        match self.network.delivery(from, to, &mut self.rng) {
            Delivery::Deliver => {}
            Delivery::DroppedPartition => {
                self.stats.messages_dropped_partition += 1;
                return;
            }
            Delivery::DroppedLoss => {
                self.stats.messages_dropped_loss += 1;
                return;
            }
        }
        let Some(node) = self.nodes.get_mut(&to) else {
            self.stats.messages_unroutable += 1;
            trace!(to = %to, "Message for unknown node dropped");
            return;
        };
        let decoded = msg
            .encode()
            .and_then(|bytes| node.unmarshal_message(from, &bytes));
        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.codec_errors += 1;
                warn!(from = %from, to = %to, kind = msg.type_name(), error = %e, "Codec error");
                return;
            }
        };
        self.stats.messages_delivered += 1;
        let out = node.message(decoded);
        self.enqueue(out);
    }
}
