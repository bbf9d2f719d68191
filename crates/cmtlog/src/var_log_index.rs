//! Log index agreement.
//!
//! Every committee node proposes the log index it wants to run next and
//! tells the others. A node adopts an index once `f+1` nodes proposed at
//! least that much, since at least one of them is correct. An index is agreed
//! once `n-f` nodes proposed at least that much. Proposals only move forward.

use anchorchain_core::OutMessages;
use anchorchain_messages::CmtLogMessage;
use anchorchain_types::{LogIndex, NodeId};
use std::collections::BTreeMap;
use tracing::{debug, trace};

pub struct VarLogIndex {
    me: NodeId,
    nodes: Vec<NodeId>,
    f: usize,
    /// Highest index proposed by each node, this one included.
    proposals: BTreeMap<NodeId, LogIndex>,
    agreed: LogIndex,
}

impl VarLogIndex {
    pub fn new(me: NodeId, nodes: Vec<NodeId>, f: usize) -> Self {
        Self {
            me,
            nodes,
            f,
            proposals: BTreeMap::new(),
            agreed: LogIndex::NIL,
        }
    }

    /// Latest agreed index, `NIL` if none yet.
    pub fn agreed(&self) -> LogIndex {
        self.agreed
    }

    /// Latest index this node proposed.
    pub fn proposed(&self) -> LogIndex {
        self.proposals.get(&self.me).copied().unwrap_or(LogIndex::NIL)
    }

    /// Propose `li`. Returns the messages to send and a newly agreed index.
    pub fn propose(&mut self, li: LogIndex) -> (OutMessages<CmtLogMessage>, Option<LogIndex>) {
        if li <= self.proposed() {
            return (OutMessages::none(), None);
        }
        let mut out = self.record_own(li);
        let (more, agreed) = self.evaluate();
        out.merge(more);
        (out, agreed)
    }

    fn record_own(&mut self, li: LogIndex) -> OutMessages<CmtLogMessage> {
        debug!(log_index = %li, "Proposing next log index");
        self.proposals.insert(self.me, li);
        let mut out = OutMessages::none();
        out.add_all(
            self.nodes
                .iter()
                .filter(|n| **n != self.me)
                .map(|n| CmtLogMessage::NextLogIndex {
                    sender: self.me,
                    recipient: *n,
                    log_index: li,
                }),
        );
        out
    }

    /// A peer proposed `li`.
    pub fn on_next_log_index(
        &mut self,
        sender: NodeId,
        li: LogIndex,
    ) -> (OutMessages<CmtLogMessage>, Option<LogIndex>) {
        if sender == self.me || !self.nodes.contains(&sender) {
            trace!(from = %sender, "Ignoring log index from non-member");
            return (OutMessages::none(), None);
        }
        let entry = self.proposals.entry(sender).or_default();
        if li <= *entry {
            return (OutMessages::none(), None);
        }
        *entry = li;
        self.evaluate()
    }

    /// Largest index at least `k` nodes proposed (or exceeded).
    fn supported_by(&self, k: usize) -> LogIndex {
        if k == 0 {
            return LogIndex::NIL;
        }
        let mut values: Vec<LogIndex> = self.proposals.values().copied().collect();
        values.sort_unstable_by(|a, b| b.cmp(a));
        values.get(k - 1).copied().unwrap_or(LogIndex::NIL)
    }

    fn evaluate(&mut self) -> (OutMessages<CmtLogMessage>, Option<LogIndex>) {
        let mut out = OutMessages::none();

        let adoptable = self.supported_by(self.f + 1);
        if adoptable > self.proposed() {
            out.merge(self.record_own(adoptable));
        }

        let quorum = self.nodes.len().saturating_sub(self.f);
        let agreeable = self.supported_by(quorum);
        if agreeable > self.agreed {
            debug!(log_index = %agreeable, "Log index agreed");
            self.agreed = agreeable;
            return (out, Some(agreeable));
        }
        (out, None)
    }

    pub fn status_string(&self) -> String {
        format!(
            "{{varLogIndex: agreed={}, proposed={}, n={}, f={}, proposals={:?}}}",
            self.agreed,
            self.proposed(),
            self.nodes.len(),
            self.f,
            self.proposals.values().collect::<Vec<_>>()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchorchain_types::test_utils::test_node;

    fn committee() -> Vec<NodeId> {
        (1..=4).map(test_node).collect()
    }

    #[test]
    fn test_single_node_agrees_on_own_proposal() {
        let mut var = VarLogIndex::new(test_node(1), vec![test_node(1)], 0);
        let (out, agreed) = var.propose(LogIndex(1));
        assert!(out.is_empty());
        assert_eq!(agreed, Some(LogIndex(1)));
    }

    #[test]
    fn test_proposal_sent_to_all_other_members() {
        let mut var = VarLogIndex::new(test_node(1), committee(), 1);
        let (out, agreed) = var.propose(LogIndex(3));
        assert_eq!(out.len(), 3);
        assert!(agreed.is_none());

        let (out, _) = var.propose(LogIndex(2));
        assert!(out.is_empty(), "proposals never move backwards");
    }

    #[test]
    fn test_agreement_needs_n_minus_f() {
        let mut var = VarLogIndex::new(test_node(1), committee(), 1);
        var.propose(LogIndex(1));
        assert_eq!(var.on_next_log_index(test_node(2), LogIndex(1)).1, None);
        assert_eq!(var.on_next_log_index(test_node(3), LogIndex(1)).1, Some(LogIndex(1)));
        assert_eq!(var.agreed(), LogIndex(1));
    }

    #[test]
    fn test_adopts_index_backed_by_f_plus_one() {
        let mut var = VarLogIndex::new(test_node(1), committee(), 1);
        var.propose(LogIndex(1));
        var.on_next_log_index(test_node(2), LogIndex(5));
        assert_eq!(var.proposed(), LogIndex(1), "one peer is not enough");

        let (out, _) = var.on_next_log_index(test_node(3), LogIndex(5));
        assert_eq!(var.proposed(), LogIndex(5));
        assert_eq!(out.len(), 3, "adoption is announced");
    }

    #[test]
    fn test_non_members_are_ignored() {
        let mut var = VarLogIndex::new(test_node(1), committee(), 1);
        var.propose(LogIndex(1));
        var.on_next_log_index(test_node(9), LogIndex(1));
        var.on_next_log_index(test_node(8), LogIndex(1));
        assert_eq!(var.agreed(), LogIndex::NIL);
    }
}
