//! Chain manager automaton.

use crate::committee::{CommitteeInfo, CommitteeRegistry};
use anchorchain_cmtlog::{CmtLog, CmtLogConfig, CmtLogInput, ConsensusStateRegistry};
use anchorchain_core::{CodecError, Gpa, OutMessages};
use anchorchain_messages::{ChainMgrMessage, CmtLogMessage};
use anchorchain_types::{AnchorOutput, ChainId, CommitteeAddress, LogIndex, NodeId, OutputId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Local events driving a chain manager.
#[derive(Debug, Clone)]
pub enum ChainMgrInput {
    /// The L1 confirmed an anchor output of this chain.
    AnchorOutputConfirmed(AnchorOutput),
    ConsensusOutputDone {
        committee: CommitteeAddress,
        log_index: LogIndex,
        proposed_base_ao: OutputId,
        base_ao_id: OutputId,
        next_ao: AnchorOutput,
    },
    ConsensusOutputConfirmed {
        committee: CommitteeAddress,
        ao: AnchorOutput,
        log_index: LogIndex,
    },
    ConsensusOutputRejected {
        committee: CommitteeAddress,
        ao: AnchorOutput,
        log_index: LogIndex,
    },
    CanPropose { committee: CommitteeAddress },
    /// Nodes following the chain without being in its committee.
    AccessNodesUpdated(Vec<NodeId>),
}

/// Request to run consensus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeedConsensus {
    pub committee: CommitteeAddress,
    pub log_index: LogIndex,
    pub base_ao: AnchorOutput,
}

impl fmt::Display for NeedConsensus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NeedConsensus(committee={}, li={}, base={})",
            self.committee, self.log_index, self.base_ao
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainMgrOutput {
    /// Consensus this node should take part in, if any.
    pub need_consensus: Option<NeedConsensus>,
    /// Members of the committee in control of the chain.
    pub committee_nodes: Vec<NodeId>,
    pub access_nodes: Vec<NodeId>,
}

/// Orchestrates the committee logs of one chain.
pub struct ChainManager {
    me: NodeId,
    chain_id: ChainId,
    committees: Arc<dyn CommitteeRegistry>,
    consensus_state: Arc<dyn ConsensusStateRegistry>,
    config: CmtLogConfig,
    logs: HashMap<CommitteeAddress, CmtLog>,
    /// Committee controlling the latest confirmed anchor output.
    active: Option<CommitteeInfo>,
    access_nodes: Vec<NodeId>,
}

impl ChainManager {
    pub fn new(
        me: NodeId,
        chain_id: ChainId,
        committees: Arc<dyn CommitteeRegistry>,
        consensus_state: Arc<dyn ConsensusStateRegistry>,
        config: CmtLogConfig,
    ) -> Self {
        Self {
            me,
            chain_id,
            committees,
            consensus_state,
            config,
            logs: HashMap::new(),
            active: None,
            access_nodes: Vec::new(),
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Committee in control of the chain, if known.
    pub fn active_committee(&self) -> Option<CommitteeAddress> {
        self.active.as_ref().map(|c| c.address)
    }

    fn is_active(&self, committee: &CommitteeAddress) -> bool {
        self.active_committee().as_ref() == Some(committee)
    }

    /// The log of `committee`, created on first use when this node is a member.
    fn ensure_log(&mut self, committee: CommitteeAddress) -> Option<&mut CmtLog> {
        if !self.logs.contains_key(&committee) {
            let info = self.committees.committee(&committee)?;
            if !info.contains(&self.me) {
                return None;
            }
            let mut log = match CmtLog::new(
                self.me,
                self.chain_id,
                committee,
                info.nodes,
                info.f,
                self.consensus_state.clone(),
                self.config.clone(),
            ) {
                Ok(log) => log,
                Err(e) => {
                    warn!(committee = %committee, error = %e, "Cannot create committee log");
                    return None;
                }
            };
            if !self.is_active(&committee) {
                log.input(CmtLogInput::Suspend(true));
            }
            self.logs.insert(committee, log);
        }
        self.logs.get_mut(&committee)
    }

    /// Hand control of the chain to `committee`, suspending every other log.
    fn activate(&mut self, committee: CommitteeAddress) {
        if self.is_active(&committee) {
            return;
        }
        let info = self.committees.committee(&committee);
        if info.is_none() {
            warn!(committee = %committee, "Chain controlled by an unknown committee");
        }
        info!(chain = %self.chain_id, committee = %committee, "Committee in control changed");
        self.active = Some(info.unwrap_or(CommitteeInfo {
            address: committee,
            nodes: Vec::new(),
            f: 0,
        }));
        for (address, log) in self.logs.iter_mut() {
            log.input(CmtLogInput::Suspend(*address != committee));
        }
    }

    /// Feed `input` into the log of `committee`, wrapping its messages.
    fn route(
        &mut self,
        committee: CommitteeAddress,
        input: CmtLogInput,
    ) -> OutMessages<ChainMgrMessage> {
        match self.logs.get_mut(&committee) {
            Some(log) => wrap(committee, log.input(input)),
            None => {
                debug!(committee = %committee, "No committee log for input");
                OutMessages::none()
            }
        }
    }
}

fn wrap(
    committee: CommitteeAddress,
    out: OutMessages<CmtLogMessage>,
) -> OutMessages<ChainMgrMessage> {
    out.map(move |inner| ChainMgrMessage::new(committee, inner))
}

impl Gpa for ChainManager {
    type Input = ChainMgrInput;
    type Message = ChainMgrMessage;
    type Output = ChainMgrOutput;

    #[instrument(level = "debug", skip(self), fields(chain = %self.chain_id))]
    fn input(&mut self, input: ChainMgrInput) -> OutMessages<ChainMgrMessage> {
        match input {
            ChainMgrInput::AnchorOutputConfirmed(ao) => {
                if ao.chain_id != self.chain_id {
                    warn!(ao = %ao, "Ignoring anchor output of another chain");
                    return OutMessages::none();
                }
                let committee = ao.state_controller;
                self.activate(committee);
                if self.ensure_log(committee).is_none() {
                    debug!(committee = %committee, "Not a member of the committee in control");
                    return OutMessages::none();
                }
                self.route(committee, CmtLogInput::AnchorOutputConfirmed(ao))
            }
            ChainMgrInput::ConsensusOutputDone {
                committee,
                log_index,
                proposed_base_ao,
                base_ao_id,
                next_ao,
            } => self.route(
                committee,
                CmtLogInput::ConsensusOutputDone {
                    log_index,
                    proposed_base_ao,
                    base_ao_id,
                    next_ao,
                },
            ),
            ChainMgrInput::ConsensusOutputConfirmed {
                committee,
                ao,
                log_index,
            } => self.route(
                committee,
                CmtLogInput::ConsensusOutputConfirmed { ao, log_index },
            ),
            ChainMgrInput::ConsensusOutputRejected {
                committee,
                ao,
                log_index,
            } => self.route(
                committee,
                CmtLogInput::ConsensusOutputRejected { ao, log_index },
            ),
            ChainMgrInput::CanPropose { committee } => {
                self.route(committee, CmtLogInput::CanPropose)
            }
            ChainMgrInput::AccessNodesUpdated(mut nodes) => {
                nodes.sort();
                nodes.dedup();
                self.access_nodes = nodes;
                OutMessages::none()
            }
        }
    }

    fn message(&mut self, msg: ChainMgrMessage) -> OutMessages<ChainMgrMessage> {
        let committee = msg.committee;
        match self.ensure_log(committee) {
            Some(log) => wrap(committee, log.message(msg.inner)),
            None => {
                debug!(committee = %committee, "Dropping message for a foreign committee");
                OutMessages::none()
            }
        }
    }

    fn output(&self) -> ChainMgrOutput {
        let need_consensus = self.active.as_ref().and_then(|active| {
            let out = self.logs.get(&active.address)?.output()?;
            Some(NeedConsensus {
                committee: active.address,
                log_index: out.log_index,
                base_ao: out.base_ao,
            })
        });
        ChainMgrOutput {
            need_consensus,
            committee_nodes: self
                .active
                .as_ref()
                .map(|c| c.nodes.clone())
                .unwrap_or_default(),
            access_nodes: self.access_nodes.clone(),
        }
    }

    fn unmarshal_message(&self, sender: NodeId, bytes: &[u8]) -> Result<ChainMgrMessage, CodecError> {
        ChainMgrMessage::decode(sender, self.me, bytes)
    }

    fn status_string(&self) -> String {
        let mut logs: Vec<_> = self.logs.values().map(|l| l.status_string()).collect();
        logs.sort();
        format!(
            "{{ChainMgr chain={}, active={}, logs=[{}]}}",
            self.chain_id,
            self.active_committee()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".into()),
            logs.join(", ")
        )
    }
}
