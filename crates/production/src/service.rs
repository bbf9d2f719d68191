//! Mempool service: the request pool plus its gossip runner.
//!
//! ```text
//!   submit() ──► Mempool ──admitted──► MempoolGpa runner ──► Transport
//!                  │                        ▲
//!                  └── missing refs ────────┘ (RequestNeeded)
//!
//!   ChainManager output ──watch──► SetPeers
//! ```

use crate::metrics::NodeMetrics;
use crate::network::{Inbound, Protocol, Transport};
use crate::runner::{GpaHandle, GpaRunner, RunnerConfig, RunnerError, ShutdownHandle};
use anchorchain_mempool::{
    Clock, GossipConfig, GossipStats, Mempool, MempoolConfig, MempoolError, MempoolGpa,
    MempoolInput, StateReader,
};
use anchorchain_node::ChainMgrOutput;
use anchorchain_types::{AnchorOutput, ChainId, NodeId, Request, RequestRef};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Everything a mempool service is built from.
pub struct MempoolServiceConfig {
    pub mempool: MempoolConfig,
    pub gossip: GossipConfig,
    pub runner: RunnerConfig,
    pub missing_request_capacity: usize,
}

impl Default for MempoolServiceConfig {
    fn default() -> Self {
        Self {
            mempool: MempoolConfig::default(),
            gossip: GossipConfig::default(),
            runner: RunnerConfig::default(),
            missing_request_capacity: 1024,
        }
    }
}

/// A running mempool for one chain.
///
/// Dropping the service stops its background tasks; the runner stops when the
/// returned [`ShutdownHandle`] is used or dropped.
pub struct MempoolService {
    me: NodeId,
    pool: Mempool,
    gossip: GpaHandle<MempoolGpa>,
    tasks: Vec<JoinHandle<()>>,
}

impl MempoolService {
    /// Build the pool, spawn the gossip runner and the task turning missing
    /// references into recovery requests. Must be called inside a tokio runtime.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        me: NodeId,
        chain_id: ChainId,
        state_reader: Arc<dyn StateReader>,
        clock: Arc<dyn Clock>,
        metrics: Arc<NodeMetrics>,
        transport: Arc<dyn Transport>,
        config: MempoolServiceConfig,
    ) -> (Self, ShutdownHandle) {
        let (missing_tx, mut missing_rx) = mpsc::channel(config.missing_request_capacity.max(1));
        let pool = Mempool::new(
            chain_id,
            state_reader,
            metrics.clone(),
            clock,
            config.mempool,
            Some(missing_tx),
        );

        let gpa = MempoolGpa::new(me, Arc::new(pool.clone()), config.gossip);
        let (runner, gossip, shutdown) =
            GpaRunner::new(me, Protocol::Mempool, gpa, transport, &config.runner);
        let runner = runner.with_metrics(metrics);
        let mut tasks = vec![tokio::spawn(runner.run())];

        let recovery = gossip.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(request_ref) = missing_rx.recv().await {
                debug!(request_ref = %request_ref, "Requesting missing request from peers");
                if recovery.input(MempoolInput::RequestNeeded(request_ref)).await.is_err() {
                    break;
                }
            }
        }));

        info!(node = %me, chain = %chain_id, "Mempool service started");
        let service = Self {
            me,
            pool,
            gossip,
            tasks,
        };
        (service, shutdown)
    }

    pub fn me(&self) -> NodeId {
        self.me
    }

    pub fn pool(&self) -> &Mempool {
        &self.pool
    }

    pub fn gossip(&self) -> &GpaHandle<MempoolGpa> {
        &self.gossip
    }

    pub fn inbound_sender(&self) -> mpsc::Sender<Inbound> {
        self.gossip.inbound_sender()
    }

    pub fn stats(&self) -> GossipStats {
        self.gossip.output()
    }

    /// Admit a locally submitted request and start sharing it.
    ///
    /// Returns whether the pool accepted it; rejected requests are not shared.
    pub async fn submit(&self, request: Arc<Request>) -> Result<bool, RunnerError> {
        let admitted = self
            .pool
            .receive_requests(vec![request.clone()])
            .first()
            .copied()
            .unwrap_or(false);
        if !admitted {
            debug!(request_id = %request.id(), "Submitted request rejected by the pool");
            return Ok(false);
        }
        self.gossip
            .input(MempoolInput::NewRequest {
                request,
                received_from: None,
            })
            .await?;
        Ok(true)
    }

    /// Requests to propose on top of `base_ao`.
    pub async fn proposals(&self, base_ao: AnchorOutput) -> Result<Vec<RequestRef>, MempoolError> {
        self.pool
            .consensus_proposals_async(base_ao)
            .await
            .map_err(|_| MempoolError::Closed)
    }

    /// Resolve references decided by consensus, fetching missing bodies from
    /// committee peers.
    pub async fn consensus_requests(
        &self,
        refs: Vec<RequestRef>,
    ) -> Result<Vec<Arc<Request>>, MempoolError> {
        self.pool
            .consensus_requests_async(refs)
            .await
            .map_err(|_| MempoolError::Closed)?
    }

    /// Keep the gossip peers in step with the chain manager's committee and
    /// access nodes.
    pub fn follow_peers(&mut self, mut peers: watch::Receiver<ChainMgrOutput>) {
        let gossip = self.gossip.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut current: Option<(Vec<NodeId>, Vec<NodeId>)> = None;
            loop {
                let next = {
                    let out = peers.borrow_and_update();
                    (out.committee_nodes.clone(), out.access_nodes.clone())
                };
                if current.as_ref() != Some(&next) {
                    let (committee, access) = next.clone();
                    if gossip.input(MempoolInput::SetPeers { committee, access }).await.is_err() {
                        break;
                    }
                    current = Some(next);
                }
                if peers.changed().await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Stop background tasks and the pool's timelock scheduler.
    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.pool.close();
    }
}

impl Drop for MempoolService {
    fn drop(&mut self) {
        self.close();
    }
}
