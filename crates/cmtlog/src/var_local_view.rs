//! Local view of the anchor output chain.
//!
//! The committee keeps proposing while L1 confirmations lag behind, so the tip
//! it builds on is the latest output it produced itself, not the latest one
//! the L1 confirmed. Produced outputs wait in a pending queue until the L1
//! confirms them. A confirmation that matches nothing pending contradicts the
//! local view: the queue is dropped and the confirmed output becomes the tip,
//! which is reported as a rollback.
//!
//! Given the same sequence of confirmations and local productions every
//! replica ends up with the same tip.

use anchorchain_types::{AnchorOutput, LogIndex, OutputId};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Result of feeding an event into the local view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalViewUpdate {
    /// Tip after the update, `None` if there is nothing to build on.
    pub tip: Option<AnchorOutput>,
    /// Whether the event was applied.
    pub accepted: bool,
    /// Whether locally produced outputs were discarded.
    pub rollback: bool,
}

#[derive(Debug, Clone)]
struct PendingOutput {
    log_index: LogIndex,
    consumed: OutputId,
    produced: AnchorOutput,
}

pub struct VarLocalView {
    confirmed: Option<AnchorOutput>,
    pending: VecDeque<PendingOutput>,
    /// Outputs that may be produced ahead of confirmation; `None` is unlimited.
    pipelining_limit: Option<usize>,
}

impl VarLocalView {
    pub fn new(pipelining_limit: Option<usize>) -> Self {
        Self {
            confirmed: None,
            pending: VecDeque::new(),
            pipelining_limit,
        }
    }

    /// The anchor output to build the next block on.
    ///
    /// `None` before the first confirmation, or while the number of
    /// unconfirmed outputs exceeds the pipelining limit.
    pub fn value(&self) -> Option<&AnchorOutput> {
        if let Some(limit) = self.pipelining_limit {
            if self.pending.len() > limit {
                return None;
            }
        }
        self.tip()
    }

    fn tip(&self) -> Option<&AnchorOutput> {
        self.pending
            .back()
            .map(|p| &p.produced)
            .or(self.confirmed.as_ref())
    }

    fn update(&self, accepted: bool, rollback: bool) -> LocalViewUpdate {
        LocalViewUpdate {
            tip: self.value().cloned(),
            accepted,
            rollback,
        }
    }

    /// The L1 confirmed `ao`.
    pub fn anchor_output_confirmed(&mut self, ao: AnchorOutput) -> LocalViewUpdate {
        let Some(confirmed) = self.confirmed.clone() else {
            debug!(ao = %ao, "First anchor output confirmed");
            self.confirmed = Some(ao);
            self.pending.clear();
            return self.update(true, false);
        };

        if let Some(pos) = self.pending.iter().position(|p| p.produced == ao) {
            self.pending.drain(..=pos);
            debug!(ao = %ao, still_pending = self.pending.len(), "Produced output confirmed");
            self.confirmed = Some(ao);
            return self.update(true, false);
        }

        if confirmed.id == ao.id {
            return self.update(true, false);
        }

        // The L1 is authoritative even when it reports a lower state index.
        let rollback = !self.pending.is_empty();
        if rollback {
            warn!(
                ao = %ao,
                discarded = self.pending.len(),
                previous = %confirmed,
                "Confirmation contradicts locally produced outputs, rolling back"
            );
        }
        self.pending.clear();
        self.confirmed = Some(ao);
        self.update(true, rollback)
    }

    /// Consensus at `log_index` consumed `consumed` and produced `produced`.
    ///
    /// Applied only if `consumed` is the current tip; otherwise the output
    /// belongs to a view that has since been replaced.
    pub fn consensus_output_done(
        &mut self,
        log_index: LogIndex,
        consumed: OutputId,
        produced: AnchorOutput,
    ) -> LocalViewUpdate {
        match self.tip() {
            Some(tip) if tip.id == consumed => {}
            tip => {
                debug!(
                    log_index = %log_index,
                    consumed = %consumed,
                    tip = ?tip.map(|t| t.id),
                    "Consensus output does not extend the tip"
                );
                return self.update(false, false);
            }
        }
        info!(log_index = %log_index, produced = %produced, "Consensus produced anchor output");
        self.pending.push_back(PendingOutput {
            log_index,
            consumed,
            produced,
        });
        self.update(true, false)
    }

    /// Publishing the output of `log_index` failed: drop it and everything
    /// built on it.
    pub fn consensus_output_rejected(&mut self, log_index: LogIndex) -> LocalViewUpdate {
        let Some(pos) = self.pending.iter().position(|p| p.log_index == log_index) else {
            return self.update(false, false);
        };
        let dropped = self.pending.len() - pos;
        self.pending.truncate(pos);
        warn!(log_index = %log_index, dropped, "Consensus output rejected");
        self.update(true, dropped >= 1)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn status_string(&self) -> String {
        format!(
            "{{varLocalView: confirmed={}, pending=[{}], limit={:?}}}",
            self.confirmed
                .as_ref()
                .map(|ao| ao.to_string())
                .unwrap_or_else(|| "none".into()),
            self.pending
                .iter()
                .map(|p| format!("{}:{}->{}", p.log_index, p.consumed, p.produced))
                .collect::<Vec<_>>()
                .join(", "),
            self.pipelining_limit
        )
    }
}
