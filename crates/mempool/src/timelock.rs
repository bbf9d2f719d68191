//! Timelock scheduler.
//!
//! Timelocked on-ledger requests are parked here until their unlock time and
//! then handed to the pool. The scheduler is a single tokio task reachable only
//! through a bounded channel; it owns the parked set exclusively.
//!
//! After every wake the next unlock time is recomputed from the whole parked
//! set, which is expected to stay small.

use crate::Clock;
use anchorchain_types::{Request, RequestId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Why a request could not be handed to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScheduleError {
    QueueFull,
    Closed,
}

/// Handle to the scheduler task.
pub(crate) struct TimelockScheduler {
    tx: mpsc::Sender<Arc<Request>>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TimelockScheduler {
    /// Spawn the scheduler.
    ///
    /// `admit` receives every batch of unlocked requests and returns `false`
    /// once the pool is gone, which ends the task.
    pub fn spawn<F>(capacity: usize, clock: Arc<dyn Clock>, admit: F) -> Self
    where
        F: FnMut(Vec<Arc<Request>>) -> bool + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run(rx, shutdown_rx, clock, admit));
        Self {
            tx,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Park a request without blocking.
    pub fn schedule(&self, request: Arc<Request>) -> Result<(), ScheduleError> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ScheduleError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ScheduleError::Closed,
        })
    }

    /// Stop the task. Parked requests are dropped.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TimelockScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// Used when nothing is parked; the select only wakes on new requests then.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

async fn run<F>(
    mut rx: mpsc::Receiver<Arc<Request>>,
    mut shutdown: oneshot::Receiver<()>,
    clock: Arc<dyn Clock>,
    mut admit: F,
) where
    F: FnMut(Vec<Arc<Request>>) -> bool + Send + 'static,
{
    let mut parked: HashMap<RequestId, Arc<Request>> = HashMap::new();

    loop {
        let next_unlock = parked.values().filter_map(|r| r.features().timelock).min();
        let wait = next_unlock
            .map(|unlock| clock.now().until(unlock))
            .unwrap_or(IDLE_WAIT);

        tokio::select! {
            biased;

            _ = &mut shutdown => {
                debug!(parked = parked.len(), "Timelock scheduler shutting down");
                return;
            }

            received = rx.recv() => match received {
                Some(request) => {
                    trace!(request_id = %request.id(), timelock = ?request.features().timelock, "Request parked until timelock");
                    parked.insert(request.id(), request);
                }
                None => {
                    debug!("Timelock queue closed");
                    return;
                }
            },

            _ = tokio::time::sleep(wait), if next_unlock.is_some() => {
                let now = clock.now();
                let due: Vec<RequestId> = parked
                    .iter()
                    .filter(|(_, r)| r.pending_timelock(now).is_none())
                    .map(|(id, _)| *id)
                    .collect();
                if due.is_empty() {
                    continue;
                }
                let unlocked: Vec<_> = due.iter().filter_map(|id| parked.remove(id)).collect();
                debug!(count = unlocked.len(), still_parked = parked.len(), "Timelocks expired, admitting requests");
                if !admit(unlocked) {
                    warn!("Pool dropped, stopping timelock scheduler");
                    return;
                }
            }
        }
    }
}
