//! Wiring of one node: chain manager, mempool and the inbound router.

use crate::config::{ConfigError, NodeConfig};
use crate::metrics::NodeMetrics;
use crate::network::{spawn_inbound_router, InboundFrame, Protocol, Transport};
use crate::runner::{GpaHandle, GpaRunner, ShutdownHandle};
use crate::service::{MempoolService, MempoolServiceConfig};
use anchorchain_cmtlog::ConsensusStateRegistry;
use anchorchain_mempool::{Clock, StateReader};
use anchorchain_node::{ChainManager, CommitteeRegistry, NeedConsensus};
use anchorchain_types::{ChainId, NodeId};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Collaborators a node is built with.
pub struct NodeDeps {
    pub state_reader: Arc<dyn StateReader>,
    pub clock: Arc<dyn Clock>,
    pub committees: Arc<dyn CommitteeRegistry>,
    pub consensus_state: Arc<dyn ConsensusStateRegistry>,
    pub registry: prometheus::Registry,
}

/// A running node following one chain.
pub struct NodeHost {
    me: NodeId,
    chain_id: ChainId,
    mempool: MempoolService,
    chain_mgr: GpaHandle<ChainManager>,
    router: JoinHandle<()>,
    shutdowns: Vec<ShutdownHandle>,
}

impl NodeHost {
    /// Spawn the runners and start routing `frames`. Must be called inside a
    /// tokio runtime.
    pub fn start(
        config: &NodeConfig,
        deps: NodeDeps,
        transport: Arc<dyn Transport>,
        frames: mpsc::Receiver<InboundFrame>,
    ) -> Result<Self, HostError> {
        let me = config.node_id()?;
        let chain_id = config.chain_id()?;
        let metrics = Arc::new(NodeMetrics::new(&deps.registry)?);
        let runner_config = config.runner_config();

        let (mut mempool, mempool_shutdown) = MempoolService::spawn(
            me,
            chain_id,
            deps.state_reader,
            deps.clock,
            metrics.clone(),
            transport.clone(),
            MempoolServiceConfig {
                mempool: config.mempool_config(),
                gossip: config.gossip_config(),
                runner: runner_config.clone(),
                missing_request_capacity: config.runtime.missing_request_capacity,
            },
        );

        let manager = ChainManager::new(
            me,
            chain_id,
            deps.committees,
            deps.consensus_state,
            config.cmt_log_config(),
        );
        let (runner, chain_mgr, chain_mgr_shutdown) =
            GpaRunner::new(me, Protocol::ChainMgr, manager, transport, &runner_config);
        tokio::spawn(runner.with_metrics(metrics).run());
        mempool.follow_peers(chain_mgr.subscribe());

        let routes = HashMap::from([
            (Protocol::Mempool, mempool.inbound_sender()),
            (Protocol::ChainMgr, chain_mgr.inbound_sender()),
        ]);
        let router = spawn_inbound_router(frames, routes);

        info!(node = %me, chain = %chain_id, "Node started");
        Ok(Self {
            me,
            chain_id,
            mempool,
            chain_mgr,
            router,
            shutdowns: vec![mempool_shutdown, chain_mgr_shutdown],
        })
    }

    pub fn me(&self) -> NodeId {
        self.me
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn mempool(&self) -> &MempoolService {
        &self.mempool
    }

    pub fn chain_manager(&self) -> &GpaHandle<ChainManager> {
        &self.chain_mgr
    }

    /// The consensus instance this node should currently run, if any.
    pub fn need_consensus(&self) -> Option<NeedConsensus> {
        self.chain_mgr.output().need_consensus
    }

    pub fn shutdown(mut self) {
        info!(node = %self.me, "Shutting down node");
        for handle in self.shutdowns.drain(..) {
            handle.shutdown();
        }
        self.router.abort();
        self.mempool.close();
    }
}

impl Drop for NodeHost {
    fn drop(&mut self) {
        self.router.abort();
    }
}
