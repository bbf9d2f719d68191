//! Mempool gossip protocol.
//!
//! Shares new requests with committee and access nodes and recovers requests
//! consensus references but this node lacks. Both directions are staggered:
//! sharing goes out to one peer per second until the request leaves the pool,
//! recovery asks two committee peers every 300ms until the request shows up.
//!
//! A peer's identity is addressing only. Whatever a peer sends goes through
//! the pool's regular admission checks, so a misbehaving peer can waste
//! bandwidth but cannot corrupt the pool.

use crate::{GossipConfig, RequestPool};
use anchorchain_core::{CodecError, Gpa, OutMessages, StaggeredMessages};
use anchorchain_messages::MempoolMessage;
use anchorchain_types::{NodeId, Request, RequestRef};
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

/// Local events driving the gossip protocol.
#[derive(Debug, Clone)]
pub enum MempoolInput {
    /// A request entered the local pool.
    NewRequest {
        request: Arc<Request>,
        /// Peer it came from, which is not sent the request back.
        received_from: Option<NodeId>,
    },

    /// Consensus references a request this node does not hold.
    RequestNeeded(RequestRef),

    /// Committee or access node membership changed.
    SetPeers {
        committee: Vec<NodeId>,
        access: Vec<NodeId>,
    },
}

/// Counters exposed as the protocol's output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GossipStats {
    pub committee_peers: usize,
    pub access_peers: usize,
    /// Share batches started (local or re-propagated).
    pub shares_started: u64,
    /// Share messages received from peers.
    pub shares_received: u64,
    /// Recovery batches started.
    pub recoveries_started: u64,
    /// Missing-request messages answered with the request.
    pub requests_served: u64,
    /// Missing-request messages whose hash did not match the held request.
    pub hash_mismatches: u64,
}

/// Gossip protocol instance for one chain on one node.
pub struct MempoolGpa {
    me: NodeId,
    pool: Arc<dyn RequestPool>,
    config: GossipConfig,
    committee: Vec<NodeId>,
    access: Vec<NodeId>,
    stats: GossipStats,
}

impl MempoolGpa {
    pub fn new(me: NodeId, pool: Arc<dyn RequestPool>, config: GossipConfig) -> Self {
        Self {
            me,
            pool,
            config,
            committee: Vec::new(),
            access: Vec::new(),
            stats: GossipStats::default(),
        }
    }

    pub fn me(&self) -> NodeId {
        self.me
    }

    fn set_peers(&mut self, committee: Vec<NodeId>, access: Vec<NodeId>) {
        let me = self.me;
        let mut committee: Vec<_> = committee.into_iter().filter(|n| *n != me).collect();
        committee.sort();
        committee.dedup();
        let mut access: Vec<_> = access
            .into_iter()
            .filter(|n| *n != me && !committee.contains(n))
            .collect();
        access.sort();
        access.dedup();

        debug!(committee = committee.len(), access = access.len(), "Mempool peers updated");
        self.stats.committee_peers = committee.len();
        self.stats.access_peers = access.len();
        self.committee = committee;
        self.access = access;
    }

    /// Share `request` with every peer except `except`, one peer per tick,
    /// until the request has left the local pool.
    fn share(&mut self, request: Arc<Request>, except: Option<NodeId>) -> OutMessages<MempoolMessage> {
        let messages: Vec<_> = self
            .committee
            .iter()
            .chain(self.access.iter())
            .filter(|peer| Some(**peer) != except)
            .map(|peer| MempoolMessage::ShareRequest {
                sender: self.me,
                recipient: *peer,
                request: request.clone(),
                should_propagate: true,
            })
            .collect();
        if messages.is_empty() {
            return OutMessages::none();
        }

        self.stats.shares_started += 1;
        trace!(request_id = %request.id(), peers = messages.len(), "Sharing request");
        let pool = self.pool.clone();
        let id = request.id();
        let mut out = OutMessages::none();
        out.add_staggered(StaggeredMessages::new(
            messages,
            self.config.share_per_tick,
            self.config.share_interval,
            move || pool.get_request(&id).is_none(),
        ));
        out
    }

    /// Ask committee peers for a request until it is known or processed.
    fn recover(&mut self, request_ref: RequestRef) -> OutMessages<MempoolMessage> {
        if self
            .pool
            .get_request(&request_ref.id)
            .is_some_and(|r| request_ref.is_for(&r))
        {
            return OutMessages::none();
        }
        let messages: Vec<_> = self
            .committee
            .iter()
            .map(|peer| MempoolMessage::MissingRequest {
                sender: self.me,
                recipient: *peer,
                request_ref,
            })
            .collect();
        if messages.is_empty() {
            return OutMessages::none();
        }

        self.stats.recoveries_started += 1;
        debug!(request_ref = %request_ref, peers = messages.len(), "Asking peers for missing request");
        let pool = self.pool.clone();
        let mut out = OutMessages::none();
        out.add_staggered(StaggeredMessages::new(
            messages,
            self.config.missing_per_tick,
            self.config.missing_interval,
            move || {
                pool.get_request(&request_ref.id)
                    .is_some_and(|r| request_ref.is_for(&r))
                    || pool.has_request_been_processed(&request_ref.id)
            },
        ));
        out
    }

    #[instrument(level = "trace", skip(self, request), fields(request_id = %request.id()))]
    fn on_share_request(
        &mut self,
        sender: NodeId,
        request: Arc<Request>,
        should_propagate: bool,
    ) -> OutMessages<MempoolMessage> {
        self.stats.shares_received += 1;
        if !self.pool.receive_request(request.clone()) {
            trace!("Shared request not admitted");
            return OutMessages::none();
        }
        if !should_propagate {
            return OutMessages::none();
        }
        self.share(request, Some(sender))
    }

    fn on_missing_request(&mut self, sender: NodeId, request_ref: RequestRef) -> OutMessages<MempoolMessage> {
        let Some(request) = self.pool.get_request(&request_ref.id) else {
            return OutMessages::none();
        };
        if !request_ref.is_for(&request) {
            self.stats.hash_mismatches += 1;
            warn!(
                request_ref = %request_ref,
                held_hash = %request.hash().short(),
                from = %sender,
                "Missing request hash does not match the request in the pool"
            );
            return OutMessages::none();
        }
        self.stats.requests_served += 1;
        OutMessages::single(MempoolMessage::ShareRequest {
            sender: self.me,
            recipient: sender,
            request,
            should_propagate: false,
        })
    }
}

impl Gpa for MempoolGpa {
    type Input = MempoolInput;
    type Message = MempoolMessage;
    type Output = GossipStats;

    fn input(&mut self, input: MempoolInput) -> OutMessages<MempoolMessage> {
        match input {
            MempoolInput::NewRequest {
                request,
                received_from,
            } => self.share(request, received_from),
            MempoolInput::RequestNeeded(request_ref) => self.recover(request_ref),
            MempoolInput::SetPeers { committee, access } => {
                self.set_peers(committee, access);
                OutMessages::none()
            }
        }
    }

    fn message(&mut self, msg: MempoolMessage) -> OutMessages<MempoolMessage> {
        match msg {
            MempoolMessage::ShareRequest {
                sender,
                request,
                should_propagate,
                ..
            } => self.on_share_request(sender, request, should_propagate),
            MempoolMessage::MissingRequest {
                sender,
                request_ref,
                ..
            } => self.on_missing_request(sender, request_ref),
        }
    }

    fn output(&self) -> GossipStats {
        self.stats
    }

    fn unmarshal_message(&self, sender: NodeId, bytes: &[u8]) -> Result<MempoolMessage, CodecError> {
        MempoolMessage::decode(sender, self.me, bytes)
    }

    fn status_string(&self) -> String {
        format!(
            "MempoolGpa[me={}, committee={}, access={}, shared={}, served={}, mismatches={}]",
            self.me,
            self.committee.len(),
            self.access.len(),
            self.stats.shares_started,
            self.stats.requests_served,
            self.stats.hash_mismatches
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchorchain_core::GpaMessage;
    use anchorchain_types::test_utils::*;
    use anchorchain_types::{Hash, RequestId};
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    /// Pool double that admits anything not yet held.
    #[derive(Default)]
    struct TestPool {
        requests: Mutex<HashMap<RequestId, Arc<Request>>>,
        processed: Mutex<HashSet<RequestId>>,
    }

    impl TestPool {
        fn remove(&self, id: &RequestId) {
            self.requests.lock().remove(id);
        }
    }

    impl RequestPool for TestPool {
        fn receive_request(&self, request: Arc<Request>) -> bool {
            let mut requests = self.requests.lock();
            if requests.contains_key(&request.id()) {
                return false;
            }
            requests.insert(request.id(), request);
            true
        }

        fn get_request(&self, id: &RequestId) -> Option<Arc<Request>> {
            self.requests.lock().get(id).cloned()
        }

        fn has_request_been_processed(&self, id: &RequestId) -> bool {
            self.processed.lock().contains(id)
        }
    }

    fn make_gpa(pool: Arc<TestPool>) -> MempoolGpa {
        let mut gpa = MempoolGpa::new(test_node(0), pool, GossipConfig::default());
        gpa.input(MempoolInput::SetPeers {
            committee: vec![test_node(1), test_node(2)],
            access: vec![test_node(3)],
        });
        gpa
    }

    fn request(nonce: u64) -> Arc<Request> {
        Arc::new(test_off_ledger_request(test_chain(1), nonce))
    }

    fn drain(out: OutMessages<MempoolMessage>) -> Vec<MempoolMessage> {
        let (mut msgs, staggered) = out.into_parts();
        for mut batch in staggered {
            loop {
                let next = batch.next_batch();
                if next.is_empty() {
                    break;
                }
                msgs.extend(next);
            }
        }
        msgs
    }

    #[test]
    fn test_new_request_shared_to_every_peer_staggered() {
        let pool = Arc::new(TestPool::default());
        let mut gpa = make_gpa(pool.clone());
        let req = request(1);
        pool.receive_request(req.clone());

        let out = gpa.input(MempoolInput::NewRequest {
            request: req,
            received_from: None,
        });
        assert!(out.immediate().is_empty());
        assert_eq!(out.staggered().len(), 1);
        assert_eq!(out.len(), 3);
        assert_eq!(out.staggered()[0].per_tick(), 1);

        let msgs = drain(out);
        let recipients: HashSet<_> = msgs.iter().map(|m| m.recipient()).collect();
        assert_eq!(recipients, HashSet::from([test_node(1), test_node(2), test_node(3)]));
        assert!(msgs.iter().all(|m| matches!(
            m,
            MempoolMessage::ShareRequest { should_propagate: true, .. }
        )));
    }

    #[test]
    fn test_share_stops_once_request_leaves_pool() {
        let pool = Arc::new(TestPool::default());
        let mut gpa = make_gpa(pool.clone());
        let req = request(1);
        pool.receive_request(req.clone());

        let (_, mut staggered) = gpa
            .input(MempoolInput::NewRequest {
                request: req.clone(),
                received_from: None,
            })
            .into_parts();
        let batch = &mut staggered[0];
        assert_eq!(batch.next_batch().len(), 1);
        pool.remove(&req.id());
        assert!(batch.next_batch().is_empty());
        assert!(batch.is_done());
    }

    #[test]
    fn test_share_skips_the_peer_it_came_from() {
        let pool = Arc::new(TestPool::default());
        let mut gpa = make_gpa(pool.clone());
        let req = request(1);
        pool.receive_request(req.clone());

        let msgs = drain(gpa.input(MempoolInput::NewRequest {
            request: req,
            received_from: Some(test_node(2)),
        }));
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(|m| m.recipient() != test_node(2)));
    }

    #[test]
    fn test_missing_request_for_unknown_ref_yields_nothing() {
        let pool = Arc::new(TestPool::default());
        let mut gpa = make_gpa(pool);
        let out = gpa.message(MempoolMessage::MissingRequest {
            sender: test_node(1),
            recipient: test_node(0),
            request_ref: request(5).to_ref(),
        });
        assert!(out.is_empty());
    }

    #[test]
    fn test_missing_request_served_to_requester_only() {
        let pool = Arc::new(TestPool::default());
        let mut gpa = make_gpa(pool.clone());
        let req = request(5);
        pool.receive_request(req.clone());

        let out = gpa.message(MempoolMessage::MissingRequest {
            sender: test_node(2),
            recipient: test_node(0),
            request_ref: req.to_ref(),
        });
        assert_eq!(
            out.immediate(),
            &[MempoolMessage::ShareRequest {
                sender: test_node(0),
                recipient: test_node(2),
                request: req,
                should_propagate: false,
            }]
        );
        assert_eq!(gpa.output().requests_served, 1);
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_missing_request_hash_mismatch_is_dropped() {
        let pool = Arc::new(TestPool::default());
        let mut gpa = make_gpa(pool.clone());
        let req = request(5);
        pool.receive_request(req.clone());
        let mut bad_ref = req.to_ref();
        bad_ref.hash = Hash::from_bytes(b"something else");

        let out = gpa.message(MempoolMessage::MissingRequest {
            sender: test_node(2),
            recipient: test_node(0),
            request_ref: bad_ref,
        });
        assert!(out.is_empty());
        assert_eq!(gpa.output().hash_mismatches, 1);
        assert!(logs_contain("hash does not match"));
    }

    #[test]
    fn test_duplicate_share_propagates_once() {
        let pool = Arc::new(TestPool::default());
        let mut gpa = make_gpa(pool.clone());
        let req = request(7);

        let first = gpa.message(MempoolMessage::ShareRequest {
            sender: test_node(1),
            recipient: test_node(0),
            request: req.clone(),
            should_propagate: true,
        });
        let second = gpa.message(MempoolMessage::ShareRequest {
            sender: test_node(2),
            recipient: test_node(0),
            request: req.clone(),
            should_propagate: false,
        });

        assert_eq!(first.staggered().len(), 1, "first delivery re-propagates");
        assert_eq!(first.len(), 2, "to everyone but the sender");
        assert!(second.is_empty());
        assert_eq!(pool.requests.lock().len(), 1);
        assert_eq!(gpa.output().shares_started, 1);
    }

    #[tokio::test]
    async fn test_redelivered_timelocked_share_propagates_once() {
        use crate::{InMemoryStateReader, Mempool, MempoolConfig, NoopMetrics, SystemClock};
        use anchorchain_types::{OutputFeatures, Timestamp};
        use std::time::Duration;

        let pool = Arc::new(Mempool::new(
            test_chain(1),
            Arc::new(InMemoryStateReader::new()),
            Arc::new(NoopMetrics),
            Arc::new(SystemClock),
            MempoolConfig::default(),
            None,
        ));
        let mut gpa = MempoolGpa::new(test_node(0), pool.clone(), GossipConfig::default());
        gpa.input(MempoolInput::SetPeers {
            committee: vec![test_node(1), test_node(2)],
            access: vec![test_node(3)],
        });
        let req = Arc::new(test_on_ledger_request(
            test_chain(1),
            4,
            OutputFeatures {
                timelock: Some(Timestamp::now().saturating_add(Duration::from_secs(60))),
                ..Default::default()
            },
        ));
        let share = |from: u8| MempoolMessage::ShareRequest {
            sender: test_node(from),
            recipient: test_node(0),
            request: req.clone(),
            should_propagate: true,
        };

        let first = gpa.message(share(1));
        let second = gpa.message(share(2));

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert_eq!(gpa.output().shares_started, 1);
        assert_eq!(gpa.output().shares_received, 2);
        pool.close();
    }

    #[test]
    fn test_share_without_propagation_is_only_admitted() {
        let pool = Arc::new(TestPool::default());
        let mut gpa = make_gpa(pool.clone());
        let req = request(8);
        let out = gpa.message(MempoolMessage::ShareRequest {
            sender: test_node(1),
            recipient: test_node(0),
            request: req.clone(),
            should_propagate: false,
        });
        assert!(out.is_empty());
        assert!(pool.get_request(&req.id()).is_some());
    }

    #[test]
    fn test_request_needed_asks_committee_only() {
        let pool = Arc::new(TestPool::default());
        let mut gpa = make_gpa(pool.clone());
        let req = request(9);

        let out = gpa.input(MempoolInput::RequestNeeded(req.to_ref()));
        assert_eq!(out.staggered()[0].per_tick(), 2);
        let msgs = drain(out);
        let recipients: HashSet<_> = msgs.iter().map(|m| m.recipient()).collect();
        assert_eq!(recipients, HashSet::from([test_node(1), test_node(2)]));
        assert!(msgs.iter().all(|m| m.is_missing_request()));
    }

    #[test]
    fn test_recovery_stops_when_request_arrives_or_is_processed() {
        let pool = Arc::new(TestPool::default());
        let mut gpa = make_gpa(pool.clone());
        gpa.input(MempoolInput::SetPeers {
            committee: (1..=6).map(test_node).collect(),
            access: vec![],
        });
        let req = request(9);

        let (_, mut staggered) = gpa.input(MempoolInput::RequestNeeded(req.to_ref())).into_parts();
        assert_eq!(staggered[0].next_batch().len(), 2);
        pool.receive_request(req.clone());
        assert!(staggered[0].next_batch().is_empty());

        let other = request(10);
        let (_, mut staggered) = gpa.input(MempoolInput::RequestNeeded(other.to_ref())).into_parts();
        pool.processed.lock().insert(other.id());
        assert!(staggered[0].should_stop_sending());
    }

    #[test]
    fn test_request_needed_for_held_request_is_noop() {
        let pool = Arc::new(TestPool::default());
        let mut gpa = make_gpa(pool.clone());
        let req = request(11);
        pool.receive_request(req.clone());
        assert!(gpa.input(MempoolInput::RequestNeeded(req.to_ref())).is_empty());
    }

    #[test]
    fn test_set_peers_excludes_self_and_duplicates() {
        let pool = Arc::new(TestPool::default());
        let mut gpa = MempoolGpa::new(test_node(0), pool, GossipConfig::default());
        gpa.input(MempoolInput::SetPeers {
            committee: vec![test_node(0), test_node(1), test_node(1)],
            access: vec![test_node(1), test_node(4)],
        });
        assert_eq!(gpa.output().committee_peers, 1);
        assert_eq!(gpa.output().access_peers, 1);
    }

    #[test]
    fn test_unmarshal_uses_local_identity_as_recipient() {
        let pool = Arc::new(TestPool::default());
        let gpa = make_gpa(pool);
        let req = request(3);
        let bytes = MempoolMessage::MissingRequest {
            sender: test_node(4),
            recipient: test_node(0),
            request_ref: req.to_ref(),
        }
        .encode()
        .unwrap();

        let msg = gpa.unmarshal_message(test_node(4), &bytes).unwrap();
        assert_eq!(msg.recipient(), test_node(0));
        assert_eq!(msg.sender(), test_node(4));
        assert_eq!(
            gpa.unmarshal_message(test_node(4), &[0x09]),
            Err(CodecError::UnknownMessageType(0x09))
        );
    }
}
