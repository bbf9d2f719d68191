//! Async host for one protocol state machine.
//!
//! A [`GpaRunner`] owns a [`Gpa`] and is its only caller. Inputs and inbound
//! payloads arrive on channels, immediate messages leave through the
//! [`Transport`], staggered batches are released by the [`StaggerDispatcher`]
//! and fed back into the same loop, and the output is published on a
//! `watch` channel whenever it changes.

use crate::metrics::NodeMetrics;
use crate::network::{encode_envelope, Inbound, Protocol, Transport};
use crate::timers::StaggerDispatcher;
use anchorchain_core::{Gpa, GpaMessage, OutMessages};
use anchorchain_types::NodeId;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, span, trace, warn, Level};

/// Errors surfaced to callers of a running protocol.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("{0} runner has stopped")]
    Stopped(&'static str),

    #[error("{0} runner input queue is full")]
    QueueFull(&'static str),
}

/// Channel capacities of a runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub input_capacity: usize,
    pub inbound_capacity: usize,
    pub release_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            input_capacity: 1024,
            inbound_capacity: 4096,
            release_capacity: 256,
        }
    }
}

/// Handle for shutting down a runner.
///
/// Dropping the handle also shuts the runner down.
pub struct ShutdownHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl ShutdownHandle {
    /// Trigger shutdown (consumes the handle).
    pub fn shutdown(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Caller side of a running protocol.
pub struct GpaHandle<G: Gpa> {
    protocol: Protocol,
    inputs: mpsc::Sender<G::Input>,
    inbound: mpsc::Sender<Inbound>,
    output: watch::Receiver<G::Output>,
}

impl<G: Gpa> Clone for GpaHandle<G> {
    fn clone(&self) -> Self {
        Self {
            protocol: self.protocol,
            inputs: self.inputs.clone(),
            inbound: self.inbound.clone(),
            output: self.output.clone(),
        }
    }
}

impl<G: Gpa> GpaHandle<G>
where
    G::Output: Clone,
{
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Queue a local input, waiting for room.
    pub async fn input(&self, input: G::Input) -> Result<(), RunnerError> {
        self.inputs
            .send(input)
            .await
            .map_err(|_| RunnerError::Stopped(self.protocol.name()))
    }

    /// Queue a local input without waiting.
    pub fn try_input(&self, input: G::Input) -> Result<(), RunnerError> {
        self.inputs.try_send(input).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RunnerError::QueueFull(self.protocol.name()),
            mpsc::error::TrySendError::Closed(_) => RunnerError::Stopped(self.protocol.name()),
        })
    }

    /// Sender the inbound router hands this protocol's payloads to.
    pub fn inbound_sender(&self) -> mpsc::Sender<Inbound> {
        self.inbound.clone()
    }

    /// Latest published output.
    pub fn output(&self) -> G::Output {
        self.output.borrow().clone()
    }

    /// Receiver notified on every output change.
    pub fn subscribe(&self) -> watch::Receiver<G::Output> {
        self.output.clone()
    }
}

/// Runs one protocol state machine until shut down.
pub struct GpaRunner<G: Gpa> {
    me: NodeId,
    protocol: Protocol,
    gpa: G,
    transport: Arc<dyn Transport>,
    metrics: Option<Arc<NodeMetrics>>,
    input_rx: mpsc::Receiver<G::Input>,
    inbound_rx: mpsc::Receiver<Inbound>,
    release_rx: mpsc::Receiver<Vec<G::Message>>,
    stagger: StaggerDispatcher<G::Message>,
    output_tx: watch::Sender<G::Output>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl<G> GpaRunner<G>
where
    G: Gpa + Send + 'static,
    G::Input: Send + 'static,
    G::Output: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(
        me: NodeId,
        protocol: Protocol,
        gpa: G,
        transport: Arc<dyn Transport>,
        config: &RunnerConfig,
    ) -> (Self, GpaHandle<G>, ShutdownHandle) {
        let (input_tx, input_rx) = mpsc::channel(config.input_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (release_tx, release_rx) = mpsc::channel(config.release_capacity.max(1));
        let (output_tx, output_rx) = watch::channel(gpa.output());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let runner = Self {
            me,
            protocol,
            gpa,
            transport,
            metrics: None,
            input_rx,
            inbound_rx,
            release_rx,
            stagger: StaggerDispatcher::new(release_tx),
            output_tx,
            shutdown_rx,
        };
        let handle = GpaHandle {
            protocol,
            inputs: input_tx,
            inbound: inbound_tx,
            output: output_rx,
        };
        (runner, handle, ShutdownHandle { tx: Some(shutdown_tx) })
    }

    pub fn with_metrics(mut self, metrics: Arc<NodeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run the event loop.
    ///
    /// Stops on shutdown or once every input handle is gone. Priority order:
    /// shutdown, released staggered messages, local inputs, inbound payloads.
    pub async fn run(mut self) {
        info!(node = %self.me, protocol = self.protocol.name(), "Starting protocol runner");

        loop {
            tokio::select! {
                biased;

                _ = &mut self.shutdown_rx => {
                    info!(protocol = self.protocol.name(), "Shutdown signal received");
                    break;
                }

                Some(released) = self.release_rx.recv() => {
                    let mut out = OutMessages::none();
                    out.add_all(released);
                    self.dispatch(out);
                }

                input = self.input_rx.recv() => {
                    let Some(input) = input else {
                        debug!(protocol = self.protocol.name(), "Input channel closed");
                        break;
                    };
                    span!(Level::DEBUG, "handle_input", protocol = self.protocol.name()).in_scope(|| {
                        let out = self.gpa.input(input);
                        self.dispatch(out);
                        self.publish_output();
                    });
                }

                Some(inbound) = self.inbound_rx.recv() => {
                    span!(
                        Level::DEBUG,
                        "handle_message",
                        protocol = self.protocol.name(),
                        from = %inbound.from,
                    )
                    .in_scope(|| {
                        self.on_inbound(inbound);
                        self.publish_output();
                    });
                }
            }
        }

        self.stagger.cancel_all();
        info!(
            protocol = self.protocol.name(),
            status = %self.gpa.status_string(),
            "Protocol runner stopped"
        );
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        let msg = match self.gpa.unmarshal_message(inbound.from, &inbound.payload) {
            Ok(msg) => msg,
            Err(e) => {
                if let Some(m) = &self.metrics {
                    m.invalid_messages_received
                        .with_label_values(&[self.protocol.name()])
                        .inc();
                }
                warn!(from = %inbound.from, error = %e, "Dropping undecodable message");
                return;
            }
        };
        if let Some(m) = &self.metrics {
            m.messages_received.with_label_values(&[self.protocol.name()]).inc();
        }
        trace!(from = %inbound.from, kind = msg.type_name(), "Message received");
        let out = self.gpa.message(msg);
        self.dispatch(out);
    }

    /// Send immediate messages and schedule staggered batches. Messages a
    /// protocol addresses to this node are applied locally.
    fn dispatch(&mut self, out: OutMessages<G::Message>) {
        let mut queue = VecDeque::from([out]);
        while let Some(out) = queue.pop_front() {
            let (immediate, staggered) = out.into_parts();
            for batch in staggered {
                self.stagger.schedule(batch);
            }
            for msg in immediate {
                if msg.recipient() == self.me {
                    queue.push_back(self.gpa.message(msg));
                } else {
                    self.send(msg);
                }
            }
        }
    }

    fn send(&self, msg: G::Message) {
        let to = msg.recipient();
        let payload = match msg.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(to = %to, kind = msg.type_name(), error = %e, "Failed to encode message");
                return;
            }
        };
        let frame = encode_envelope(self.protocol, &payload);
        match self.transport.send(to, frame) {
            Ok(()) => {
                if let Some(m) = &self.metrics {
                    m.messages_sent.with_label_values(&[self.protocol.name()]).inc();
                }
                trace!(to = %to, kind = msg.type_name(), "Message sent");
            }
            Err(e) => {
                if let Some(m) = &self.metrics {
                    m.send_failures.with_label_values(&[self.protocol.name()]).inc();
                }
                debug!(to = %to, kind = msg.type_name(), error = %e, "Send failed");
            }
        }
    }

    fn publish_output(&self) {
        let output = self.gpa.output();
        self.output_tx.send_if_modified(|current| {
            if *current == output {
                return false;
            }
            *current = output;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{spawn_inbound_router, LoopbackNetwork};
    use anchorchain_core::{CodecError, StaggeredMessages};
    use anchorchain_types::test_utils::test_node;
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    struct Ping {
        sender: NodeId,
        recipient: NodeId,
        value: u8,
    }

    impl GpaMessage for Ping {
        fn sender(&self) -> NodeId {
            self.sender
        }

        fn recipient(&self) -> NodeId {
            self.recipient
        }

        fn set_sender(&mut self, sender: NodeId) {
            self.sender = sender;
        }

        fn encode(&self) -> Result<Vec<u8>, CodecError> {
            Ok(vec![0x00, self.value])
        }

        fn type_name(&self) -> &'static str {
            "Ping"
        }
    }

    enum PingInput {
        /// Send `value` to every peer right away.
        Broadcast(u8),
        /// Send `value` to every peer, one per tick.
        Stagger(u8),
        /// Send `value` to this node.
        ToSelf(u8),
    }

    /// Sums the values it receives.
    struct PingGpa {
        me: NodeId,
        peers: Vec<NodeId>,
        sum: u32,
    }

    impl PingGpa {
        fn to_peers(&self, value: u8) -> Vec<Ping> {
            self.peers
                .iter()
                .map(|p| Ping {
                    sender: self.me,
                    recipient: *p,
                    value,
                })
                .collect()
        }
    }

    impl Gpa for PingGpa {
        type Input = PingInput;
        type Message = Ping;
        type Output = u32;

        fn input(&mut self, input: PingInput) -> OutMessages<Ping> {
            let mut out = OutMessages::none();
            match input {
                PingInput::Broadcast(value) => {
                    out.add_all(self.to_peers(value));
                }
                PingInput::Stagger(value) => {
                    out.add_staggered(StaggeredMessages::new(
                        self.to_peers(value),
                        1,
                        Duration::from_millis(5),
                        || false,
                    ));
                }
                PingInput::ToSelf(value) => {
                    out.add(Ping {
                        sender: self.me,
                        recipient: self.me,
                        value,
                    });
                }
            }
            out
        }

        fn message(&mut self, msg: Ping) -> OutMessages<Ping> {
            self.sum += u32::from(msg.value);
            OutMessages::none()
        }

        fn output(&self) -> u32 {
            self.sum
        }

        fn unmarshal_message(&self, sender: NodeId, bytes: &[u8]) -> Result<Ping, CodecError> {
            match bytes {
                [0x00, value] => Ok(Ping {
                    sender,
                    recipient: self.me,
                    value: *value,
                }),
                [tag, ..] if *tag != 0x00 => Err(CodecError::UnknownMessageType(*tag)),
                _ => Err(CodecError::MessageTooShort),
            }
        }

        fn status_string(&self) -> String {
            format!("Ping[{}] sum={}", self.me, self.sum)
        }
    }

    struct Node {
        handle: GpaHandle<PingGpa>,
        shutdown: ShutdownHandle,
        task: tokio::task::JoinHandle<()>,
    }

    fn start_cluster(n: u8) -> (LoopbackNetwork, Vec<Node>) {
        let network = LoopbackNetwork::new();
        let ids: Vec<NodeId> = (1..=n).map(test_node).collect();
        let nodes = ids
            .iter()
            .map(|me| {
                let (transport, frames) = network.register(*me, 64);
                let gpa = PingGpa {
                    me: *me,
                    peers: ids.iter().filter(|p| *p != me).copied().collect(),
                    sum: 0,
                };
                let (runner, handle, shutdown) = GpaRunner::new(
                    *me,
                    Protocol::Mempool,
                    gpa,
                    Arc::new(transport),
                    &RunnerConfig::default(),
                );
                spawn_inbound_router(frames, HashMap::from([(Protocol::Mempool, handle.inbound_sender())]));
                let task = tokio::spawn(runner.run());
                Node {
                    handle,
                    shutdown,
                    task,
                }
            })
            .collect();
        (network, nodes)
    }

    async fn wait_for_output(handle: &GpaHandle<PingGpa>, expected: u32) {
        let mut rx = handle.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|sum| *sum == expected))
            .await
            .expect("timeout")
            .expect("runner stopped");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_peers() {
        let (_network, nodes) = start_cluster(3);
        nodes[0].handle.input(PingInput::Broadcast(5)).await.unwrap();

        wait_for_output(&nodes[1].handle, 5).await;
        wait_for_output(&nodes[2].handle, 5).await;
        assert_eq!(nodes[0].handle.output(), 0);
    }

    #[tokio::test]
    async fn test_staggered_batch_is_released() {
        let (_network, nodes) = start_cluster(4);
        nodes[0].handle.input(PingInput::Stagger(2)).await.unwrap();
        for node in &nodes[1..] {
            wait_for_output(&node.handle, 2).await;
        }
    }

    #[tokio::test]
    async fn test_self_addressed_message_applied_locally() {
        let (_network, nodes) = start_cluster(2);
        nodes[0].handle.input(PingInput::ToSelf(7)).await.unwrap();
        wait_for_output(&nodes[0].handle, 7).await;
        assert_eq!(nodes[1].handle.output(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_dropped() {
        let (_network, nodes) = start_cluster(2);
        let inbound = nodes[1].handle.inbound_sender();
        inbound
            .send(Inbound {
                from: test_node(1),
                payload: vec![0x09],
            })
            .await
            .unwrap();
        nodes[0].handle.input(PingInput::Broadcast(1)).await.unwrap();
        wait_for_output(&nodes[1].handle, 1).await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_runner() {
        let (_network, mut nodes) = start_cluster(1);
        let node = nodes.remove(0);
        node.shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), node.task)
            .await
            .expect("runner did not stop")
            .unwrap();
        assert_eq!(
            node.handle.input(PingInput::Broadcast(1)).await,
            Err(RunnerError::Stopped("mempool"))
        );
    }
}
