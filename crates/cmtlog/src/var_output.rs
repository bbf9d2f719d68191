//! Round output gate.
//!
//! An output is released only when a log index has been agreed, a tip anchor
//! output is known and proposing is allowed. Releasing consumes the log index
//! and the permission to propose; the anchor output stays until replaced.

use anchorchain_types::{AnchorOutput, LogIndex};
use std::fmt;
use tracing::info;

/// A committee log decision: run consensus at `log_index` on top of `base_ao`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub log_index: LogIndex,
    pub base_ao: AnchorOutput,
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Output(li={}, base={})", self.log_index, self.base_ao)
    }
}

/// Hook persisting a log index the moment it is used.
pub type PersistUsed = Box<dyn FnMut(LogIndex) + Send>;

pub struct VarOutput {
    candidate_li: LogIndex,
    candidate_ao: Option<AnchorOutput>,
    can_propose: bool,
    suspended: bool,
    out_value: Option<Output>,
    persist_used: PersistUsed,
}

impl VarOutput {
    pub fn new(persist_used: PersistUsed) -> Self {
        Self {
            candidate_li: LogIndex::NIL,
            candidate_ao: None,
            can_propose: true,
            suspended: false,
            out_value: None,
            persist_used,
        }
    }

    /// Latest output, hidden while suspended.
    pub fn value(&self) -> Option<&Output> {
        if self.suspended {
            return None;
        }
        self.out_value.as_ref()
    }

    pub fn log_index_agreed(&mut self, li: LogIndex) {
        self.candidate_li = li;
        self.try_output();
    }

    pub fn tip_ao_changed(&mut self, ao: Option<AnchorOutput>) {
        self.candidate_ao = ao;
        self.try_output();
    }

    pub fn can_propose(&mut self) {
        self.can_propose = true;
        self.try_output();
    }

    pub fn suspended(&mut self, suspended: bool) {
        if self.suspended && !suspended {
            info!("Committee resumed");
        }
        if !self.suspended && suspended {
            info!("Committee suspended");
        }
        self.suspended = suspended;
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn try_output(&mut self) {
        if self.candidate_li.is_nil() || !self.can_propose {
            return;
        }
        let Some(ao) = &self.candidate_ao else {
            return;
        };
        (self.persist_used)(self.candidate_li);
        let output = Output {
            log_index: self.candidate_li,
            base_ao: ao.clone(),
        };
        info!(output = %output, "Committee log output");
        self.out_value = Some(output);
        self.can_propose = false;
        self.candidate_li = LogIndex::NIL;
    }

    pub fn status_string(&self) -> String {
        format!(
            "{{varOutput: output={}, candidate{{li={}, ao={}}}, canPropose={}, suspended={}}}",
            self.out_value
                .as_ref()
                .map(|o| o.to_string())
                .unwrap_or_else(|| "none".into()),
            self.candidate_li,
            self.candidate_ao
                .as_ref()
                .map(|ao| ao.to_string())
                .unwrap_or_else(|| "none".into()),
            self.can_propose,
            self.suspended
        )
    }
}
