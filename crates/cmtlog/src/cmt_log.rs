//! The committee log automaton.

use crate::registry::{ConsensusStateRegistry, RegistryError};
use crate::var_local_view::{LocalViewUpdate, VarLocalView};
use crate::var_log_index::VarLogIndex;
use crate::var_output::{Output, VarOutput};
use anchorchain_core::{CodecError, Gpa, OutMessages};
use anchorchain_messages::CmtLogMessage;
use anchorchain_types::{AnchorOutput, ChainId, CommitteeAddress, LogIndex, NodeId, OutputId};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Local events driving a committee log.
#[derive(Debug, Clone)]
pub enum CmtLogInput {
    /// The L1 confirmed an anchor output controlled by this committee.
    AnchorOutputConfirmed(AnchorOutput),
    /// Consensus at `log_index` decided to build on `base_ao_id` and produced
    /// `next_ao`.
    ConsensusOutputDone {
        log_index: LogIndex,
        proposed_base_ao: OutputId,
        base_ao_id: OutputId,
        next_ao: AnchorOutput,
    },
    /// The output produced at `log_index` was confirmed by the L1.
    ConsensusOutputConfirmed { ao: AnchorOutput, log_index: LogIndex },
    /// Publishing the output produced at `log_index` failed.
    ConsensusOutputRejected { ao: AnchorOutput, log_index: LogIndex },
    /// The previous consensus instance finished; a new one may start.
    CanPropose,
    /// Another committee took over the chain (`true`) or gave it back.
    Suspend(bool),
}

#[derive(Debug, Clone, Default)]
pub struct CmtLogConfig {
    /// Outputs that may be produced ahead of L1 confirmation; `None` is unlimited.
    pub pipelining_limit: Option<usize>,
}

#[derive(Debug, Error)]
pub enum CmtLogError {
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("node {0} is not a member of the committee")]
    NotInCommittee(NodeId),
}

/// Committee log of one committee for one chain.
pub struct CmtLog {
    me: NodeId,
    chain_id: ChainId,
    committee: CommitteeAddress,
    /// Last index used before this instance started.
    persisted: LogIndex,
    /// Whether the first proposal has been made.
    started: bool,
    local_view: VarLocalView,
    log_index: VarLogIndex,
    output: VarOutput,
}

impl CmtLog {
    pub fn new(
        me: NodeId,
        chain_id: ChainId,
        committee: CommitteeAddress,
        nodes: Vec<NodeId>,
        f: usize,
        registry: Arc<dyn ConsensusStateRegistry>,
        config: CmtLogConfig,
    ) -> Result<Self, CmtLogError> {
        if !nodes.contains(&me) {
            return Err(CmtLogError::NotInCommittee(me));
        }
        let persisted = registry
            .last_used(&chain_id, &committee)?
            .unwrap_or(LogIndex::NIL);
        info!(
            chain = %chain_id,
            committee = %committee,
            n = nodes.len(),
            f,
            persisted = %persisted,
            "Committee log created"
        );

        let persist_used = Box::new(move |li: LogIndex| {
            if let Err(e) = registry.save_used(&chain_id, &committee, li) {
                warn!(log_index = %li, error = %e, "Failed to persist used log index");
            }
        });

        Ok(Self {
            me,
            chain_id,
            committee,
            persisted,
            started: false,
            local_view: VarLocalView::new(config.pipelining_limit),
            log_index: VarLogIndex::new(me, nodes, f),
            output: VarOutput::new(persist_used),
        })
    }

    pub fn committee(&self) -> CommitteeAddress {
        self.committee
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Propose the index following everything seen so far.
    fn propose_next(&mut self) -> OutMessages<CmtLogMessage> {
        let last = self
            .persisted
            .max(self.log_index.agreed())
            .max(self.log_index.proposed());
        self.propose(last.next())
    }

    fn propose(&mut self, li: LogIndex) -> OutMessages<CmtLogMessage> {
        let (out, agreed) = self.log_index.propose(li);
        self.on_agreed(agreed);
        out
    }

    /// Indexes used before a restart are never used again.
    fn on_agreed(&mut self, agreed: Option<LogIndex>) {
        let Some(li) = agreed else {
            return;
        };
        if li <= self.persisted {
            debug!(log_index = %li, persisted = %self.persisted, "Agreed log index already used");
            return;
        }
        self.output.log_index_agreed(li);
    }

    /// Feed a local view update into the output, proposing a fresh index
    /// when the view starts or is rolled back.
    fn on_view_update(&mut self, update: LocalViewUpdate) -> OutMessages<CmtLogMessage> {
        let mut out = OutMessages::none();
        if !update.accepted {
            return out;
        }
        if !self.started && update.tip.is_some() {
            self.started = true;
            out.merge(self.propose_next());
        } else if update.rollback {
            debug!("Local view rolled back, proposing a new log index");
            out.merge(self.propose_next());
        }
        self.output.tip_ao_changed(update.tip);
        out
    }
}

impl Gpa for CmtLog {
    type Input = CmtLogInput;
    type Message = CmtLogMessage;
    type Output = Option<Output>;

    #[instrument(level = "debug", skip(self), fields(committee = %self.committee))]
    fn input(&mut self, input: CmtLogInput) -> OutMessages<CmtLogMessage> {
        match input {
            CmtLogInput::AnchorOutputConfirmed(ao)
            | CmtLogInput::ConsensusOutputConfirmed { ao, .. } => {
                let update = self.local_view.anchor_output_confirmed(ao);
                self.on_view_update(update)
            }
            CmtLogInput::ConsensusOutputDone {
                log_index,
                proposed_base_ao,
                base_ao_id,
                next_ao,
            } => {
                if proposed_base_ao != base_ao_id {
                    debug!(
                        proposed = %proposed_base_ao,
                        decided = %base_ao_id,
                        "Consensus decided on a different base than proposed"
                    );
                }
                let update = self
                    .local_view
                    .consensus_output_done(log_index, base_ao_id, next_ao);
                let mut out = self.on_view_update(update);
                out.merge(self.propose_next());
                self.output.can_propose();
                out
            }
            CmtLogInput::ConsensusOutputRejected { ao, log_index } => {
                debug!(ao = %ao, "Consensus output rejected");
                let update = self.local_view.consensus_output_rejected(log_index);
                let mut out = self.on_view_update(update);
                out.merge(self.propose_next());
                self.output.can_propose();
                out
            }
            CmtLogInput::CanPropose => {
                self.output.can_propose();
                OutMessages::none()
            }
            CmtLogInput::Suspend(suspended) => {
                self.output.suspended(suspended);
                OutMessages::none()
            }
        }
    }

    fn message(&mut self, msg: CmtLogMessage) -> OutMessages<CmtLogMessage> {
        match msg {
            CmtLogMessage::NextLogIndex {
                sender, log_index, ..
            } => {
                let (out, agreed) = self.log_index.on_next_log_index(sender, log_index);
                self.on_agreed(agreed);
                out
            }
        }
    }

    fn output(&self) -> Option<Output> {
        self.output.value().cloned()
    }

    fn unmarshal_message(&self, sender: NodeId, bytes: &[u8]) -> Result<CmtLogMessage, CodecError> {
        CmtLogMessage::decode(sender, self.me, bytes)
    }

    fn status_string(&self) -> String {
        format!(
            "{{CmtLog[{}] {}, {}, {}}}",
            self.committee,
            self.local_view.status_string(),
            self.log_index.status_string(),
            self.output.status_string()
        )
    }
}
