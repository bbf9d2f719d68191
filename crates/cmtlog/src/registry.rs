use anchorchain_types::{ChainId, CommitteeAddress, LogIndex};
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("consensus state unavailable: {0}")]
    Unavailable(String),
}

/// Durable record of the last log index a committee used for a chain.
///
/// A restarted node resumes after the recorded index so it never reuses one.
pub trait ConsensusStateRegistry: Send + Sync + 'static {
    fn last_used(
        &self,
        chain_id: &ChainId,
        committee: &CommitteeAddress,
    ) -> Result<Option<LogIndex>, RegistryError>;

    fn save_used(
        &self,
        chain_id: &ChainId,
        committee: &CommitteeAddress,
        log_index: LogIndex,
    ) -> Result<(), RegistryError>;
}

/// Registry kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryConsensusStateRegistry {
    entries: Mutex<HashMap<(ChainId, CommitteeAddress), LogIndex>>,
}

impl InMemoryConsensusStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConsensusStateRegistry for InMemoryConsensusStateRegistry {
    fn last_used(
        &self,
        chain_id: &ChainId,
        committee: &CommitteeAddress,
    ) -> Result<Option<LogIndex>, RegistryError> {
        Ok(self.entries.lock().get(&(*chain_id, *committee)).copied())
    }

    fn save_used(
        &self,
        chain_id: &ChainId,
        committee: &CommitteeAddress,
        log_index: LogIndex,
    ) -> Result<(), RegistryError> {
        let mut entries = self.entries.lock();
        let entry = entries.entry((*chain_id, *committee)).or_default();
        // Never move backwards.
        if log_index > *entry {
            *entry = log_index;
        }
        Ok(())
    }
}
