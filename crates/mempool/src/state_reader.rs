use crate::StateReadError;
use anchorchain_types::{AnchorOutput, RequestId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};

/// Read access to the chain state the pool needs.
pub trait StateReader: Send + Sync + 'static {
    /// Whether the request has already been processed on chain.
    ///
    /// May fail with [`StateReadError::Invalidated`] under concurrent state
    /// mutation; callers retry.
    fn is_request_processed(&self, id: &RequestId) -> Result<bool, StateReadError>;

    /// Requests processed in the blocks after `from` up to and including `to`.
    fn processed_requests(&self, from: Option<&AnchorOutput>, to: &AnchorOutput) -> Vec<RequestId>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    by_state_index: BTreeMap<u32, Vec<RequestId>>,
    processed: HashSet<RequestId>,
    invalidations_left: u32,
    unavailable: Option<String>,
}

/// State reader backed by an in-memory record of processed requests.
///
/// Used by local clusters and tests; it can also be told to fail reads.
#[derive(Debug, Default)]
pub struct InMemoryStateReader {
    state: RwLock<InMemoryState>,
}

impl InMemoryStateReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `ids` as processed in the block at `state_index`.
    pub fn mark_processed(&self, state_index: u32, ids: impl IntoIterator<Item = RequestId>) {
        let mut state = self.state.write();
        let ids: Vec<_> = ids.into_iter().collect();
        state.processed.extend(ids.iter().copied());
        state.by_state_index.entry(state_index).or_default().extend(ids);
    }

    /// Make the next `n` processed checks fail with `Invalidated`.
    pub fn invalidate_next(&self, n: u32) {
        self.state.write().invalidations_left = n;
    }

    /// Make every processed check fail until cleared with `None`.
    pub fn set_unavailable(&self, reason: Option<String>) {
        self.state.write().unavailable = reason;
    }
}

impl StateReader for InMemoryStateReader {
    fn is_request_processed(&self, id: &RequestId) -> Result<bool, StateReadError> {
        let mut state = self.state.write();
        if let Some(reason) = &state.unavailable {
            return Err(StateReadError::Unavailable(reason.clone()));
        }
        if state.invalidations_left > 0 {
            state.invalidations_left -= 1;
            return Err(StateReadError::Invalidated);
        }
        Ok(state.processed.contains(id))
    }

    fn processed_requests(&self, from: Option<&AnchorOutput>, to: &AnchorOutput) -> Vec<RequestId> {
        let start = from.map(|ao| ao.state_index.saturating_add(1)).unwrap_or(0);
        if start > to.state_index {
            return Vec::new();
        }
        self.state
            .read()
            .by_state_index
            .range(start..=to.state_index)
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }
}
