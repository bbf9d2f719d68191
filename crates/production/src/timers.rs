//! Staggered batch dispatch for the production runner.
//!
//! Each staggered batch gets its own tokio task ticking at the batch's
//! interval. Released messages go back to the runner over a channel, so the
//! protocol state machine is only ever touched by the runner task.

use anchorchain_core::StaggeredMessages;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// `tokio::time::interval` rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Owns the tasks releasing staggered batches.
pub struct StaggerDispatcher<M> {
    /// Active batches (id -> task handle).
    batches: HashMap<u64, JoinHandle<()>>,
    next_id: u64,
    release_tx: mpsc::Sender<Vec<M>>,
}

impl<M: Send + 'static> StaggerDispatcher<M> {
    pub fn new(release_tx: mpsc::Sender<Vec<M>>) -> Self {
        Self {
            batches: HashMap::new(),
            next_id: 0,
            release_tx,
        }
    }

    /// Start releasing `batch`. The first tick fires immediately.
    pub fn schedule(&mut self, mut batch: StaggeredMessages<M>) {
        self.batches.retain(|_, handle| !handle.is_finished());
        if batch.is_done() {
            return;
        }

        let id = self.next_id;
        self.next_id += 1;
        let release_tx = self.release_tx.clone();
        let period = batch.interval().max(MIN_INTERVAL);
        debug!(id, remaining = batch.remaining(), ?period, "Staggered batch scheduled");

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let released = batch.next_batch();
                trace!(id, released = released.len(), remaining = batch.remaining(), "Staggered tick");
                if !released.is_empty() && release_tx.send(released).await.is_err() {
                    break;
                }
                if batch.is_done() {
                    break;
                }
            }
            trace!(id, ticks = batch.ticks(), "Staggered batch finished");
        });
        self.batches.insert(id, handle);
    }

    /// Abort every batch still releasing.
    pub fn cancel_all(&mut self) {
        for (id, handle) in self.batches.drain() {
            handle.abort();
            trace!(id, "Staggered batch cancelled");
        }
    }

    /// Batches still releasing.
    pub fn active_count(&self) -> usize {
        self.batches.values().filter(|h| !h.is_finished()).count()
    }
}

impl<M> Drop for StaggerDispatcher<M> {
    fn drop(&mut self) {
        for handle in self.batches.values() {
            handle.abort();
        }
    }
}
