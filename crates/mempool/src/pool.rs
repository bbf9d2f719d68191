//! The request pool.

use crate::timelock::{ScheduleError, TimelockScheduler};
use crate::{Clock, MempoolConfig, MempoolError, MempoolMetrics, StateReadError, StateReader};
use anchorchain_types::{
    AnchorOutput, ChainId, MempoolInfo, Request, RequestId, RequestRef, Timestamp,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, instrument, trace, warn};

/// The view of the pool the gossip protocol needs.
pub trait RequestPool: Send + Sync + 'static {
    /// Try to admit a request. Returns whether it was newly accepted.
    fn receive_request(&self, request: Arc<Request>) -> bool;

    fn get_request(&self, id: &RequestId) -> Option<Arc<Request>>;

    fn has_request_been_processed(&self, id: &RequestId) -> bool;
}

#[derive(Default)]
struct PoolState {
    requests: HashMap<RequestId, Arc<Request>>,
    /// Timelocked requests waiting in the scheduler.
    parked: HashSet<RequestId>,
    in_pool_counter: u64,
    out_pool_counter: u64,
}

struct Inner {
    chain_id: ChainId,
    config: MempoolConfig,
    pool: RwLock<PoolState>,
    last_seen_anchor: Mutex<Option<AnchorOutput>>,
    state_reader: Arc<dyn StateReader>,
    metrics: Arc<dyn MempoolMetrics>,
    clock: Arc<dyn Clock>,
    /// Woken on every admission.
    arrivals: Notify,
    /// Woken whenever requests leave the pool.
    removals: Notify,
    timelocks: Mutex<Option<TimelockScheduler>>,
    /// Requests consensus references but this node does not hold.
    missing_requests: Option<mpsc::Sender<RequestRef>>,
}

/// Pending requests for one chain.
///
/// Cheap to clone; clones share the same pool. Must be created inside a tokio
/// runtime because it spawns the timelock scheduler.
#[derive(Clone)]
pub struct Mempool {
    inner: Arc<Inner>,
}

impl Mempool {
    /// Create a pool for `chain_id`.
    ///
    /// References to requests this node lacks are sent on `missing_requests`
    /// so the runtime can ask peers for them.
    pub fn new(
        chain_id: ChainId,
        state_reader: Arc<dyn StateReader>,
        metrics: Arc<dyn MempoolMetrics>,
        clock: Arc<dyn Clock>,
        config: MempoolConfig,
        missing_requests: Option<mpsc::Sender<RequestRef>>,
    ) -> Self {
        let inner = Arc::new(Inner {
            chain_id,
            config,
            pool: RwLock::new(PoolState::default()),
            last_seen_anchor: Mutex::new(None),
            state_reader,
            metrics,
            clock: clock.clone(),
            arrivals: Notify::new(),
            removals: Notify::new(),
            timelocks: Mutex::new(None),
            missing_requests,
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let scheduler = TimelockScheduler::spawn(
            inner.config.timelock_queue_capacity,
            clock,
            move |unlocked| match weak.upgrade() {
                Some(inner) => {
                    Mempool { inner }.admit_unlocked(unlocked);
                    true
                }
                None => false,
            },
        );
        *inner.timelocks.lock() = Some(scheduler);

        Self { inner }
    }

    pub fn chain_id(&self) -> ChainId {
        self.inner.chain_id
    }

    /// Offer requests to the pool. Returns one admission flag per request.
    ///
    /// A timelocked request still in its lock period is parked and reported as
    /// accepted the first time; while parked, further copies are rejected. One
    /// that expires before it unlocks is rejected outright.
    pub fn receive_requests(&self, requests: Vec<Arc<Request>>) -> Vec<bool> {
        let now = self.inner.clock.now();
        requests
            .into_iter()
            .map(|request| {
                if request.is_never_processable() {
                    debug!(request_id = %request.id(), "Rejecting request that expires before it unlocks");
                    return false;
                }
                if request.pending_timelock(now).is_some() {
                    return self.schedule_timelocked(request);
                }
                self.add_to_pool(request)
            })
            .collect()
    }

    fn schedule_timelocked(&self, request: Arc<Request>) -> bool {
        let id = request.id();
        {
            let mut pool = self.inner.pool.write();
            if pool.requests.contains_key(&id) || !pool.parked.insert(id) {
                trace!(request_id = %id, "Timelocked request already known");
                return false;
            }
        }
        let result = match self.inner.timelocks.lock().as_ref() {
            Some(scheduler) => scheduler.schedule(request),
            None => Err(ScheduleError::Closed),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(request_id = %id, error = ?e, "Cannot park timelocked request");
                self.inner.pool.write().parked.remove(&id);
                false
            }
        }
    }

    /// Requests released by the timelock scheduler.
    fn admit_unlocked(&self, unlocked: Vec<Arc<Request>>) {
        {
            let mut pool = self.inner.pool.write();
            for request in &unlocked {
                pool.parked.remove(&request.id());
            }
        }
        for request in unlocked {
            self.add_to_pool(request);
        }
    }

    /// Admit a request after the expiry, policy and processed checks.
    #[instrument(level = "trace", skip(self, request), fields(request_id = %request.id()))]
    fn add_to_pool(&self, request: Arc<Request>) -> bool {
        let id = request.id();
        if self.should_be_removed(&request, self.inner.clock.now()) {
            trace!("Request expired or excluded by policy");
            return false;
        }
        if self.inner.pool.read().requests.contains_key(&id) {
            return false;
        }
        if self.check_processed(&id) {
            trace!("Request already processed");
            return false;
        }

        {
            let mut pool = self.inner.pool.write();
            if pool.requests.contains_key(&id) {
                return false;
            }
            pool.requests.insert(id, request.clone());
            pool.in_pool_counter += 1;
            debug!(
                request_id = %id,
                pool_size = pool.requests.len(),
                in_counter = pool.in_pool_counter,
                out_counter = pool.out_pool_counter,
                "Request added to mempool"
            );
        }
        self.inner.metrics.count_request_in(&request);
        self.inner.arrivals.notify_waiters();
        true
    }

    fn should_be_removed(&self, request: &Request, now: Timestamp) -> bool {
        if !request.is_on_ledger() {
            return false;
        }
        if self.inner.config.reject_return_amount && request.features().return_amount.is_some() {
            return true;
        }
        request.is_expired(now)
    }

    /// Processed check with transparent retries on invalidated reads.
    ///
    /// A read that keeps failing is treated as "not processed", leaving the
    /// request in the pool; consensus filters it later if needed.
    fn check_processed(&self, id: &RequestId) -> bool {
        let attempts = self.inner.config.processed_check_retries.max(1);
        for attempt in 1..=attempts {
            match self.inner.state_reader.is_request_processed(id) {
                Ok(processed) => return processed,
                Err(StateReadError::Invalidated) => {
                    trace!(request_id = %id, attempt, "Processed check invalidated, retrying");
                }
                Err(e) => {
                    warn!(request_id = %id, error = %e, "Processed check failed, keeping request");
                    return false;
                }
            }
        }
        warn!(request_id = %id, attempts, "Processed check kept being invalidated, keeping request");
        false
    }

    /// Remove requests. Absent ids are ignored. Returns how many were removed.
    pub fn remove_requests(&self, ids: &[RequestId]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let mut removed = 0;
        let mut pool = self.inner.pool.write();
        for id in ids {
            if pool.requests.remove(id).is_none() {
                continue;
            }
            pool.out_pool_counter += 1;
            removed += 1;
            debug!(
                request_id = %id,
                in_counter = pool.in_pool_counter,
                out_counter = pool.out_pool_counter,
                "Request removed from mempool"
            );
            self.inner.metrics.count_request_out();
            self.inner.metrics.count_blocks_per_chain();
        }
        drop(pool);
        if removed > 0 {
            self.inner.removals.notify_waiters();
        }
        removed
    }

    pub fn get_request(&self, id: &RequestId) -> Option<Arc<Request>> {
        self.inner.pool.read().requests.get(id).cloned()
    }

    pub fn has_request(&self, id: &RequestId) -> bool {
        self.inner.pool.read().requests.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pool.read().requests.is_empty()
    }

    pub fn info(&self) -> MempoolInfo {
        let pool = self.inner.pool.read();
        MempoolInfo {
            total_pool: pool.requests.len(),
            in_pool_counter: pool.in_pool_counter,
            out_pool_counter: pool.out_pool_counter,
        }
    }

    /// Prune requests processed between the last seen anchor output and
    /// `base_ao`, then remember `base_ao`.
    fn prune_processed_since(&self, base_ao: &AnchorOutput) {
        let mut last_seen = self.inner.last_seen_anchor.lock();
        if base_ao.state_index == 0 {
            *last_seen = Some(base_ao.clone());
            return;
        }
        if let Some(prev) = last_seen.as_ref() {
            if base_ao.state_index < prev.state_index {
                warn!(
                    last_seen = %prev,
                    received = %base_ao,
                    "Anchor output older than last seen, assuming reorg"
                );
                *last_seen = Some(base_ao.clone());
                return;
            }
        }
        let processed = self
            .inner
            .state_reader
            .processed_requests(last_seen.as_ref(), base_ao);
        *last_seen = Some(base_ao.clone());
        drop(last_seen);

        let removed = self.remove_requests(&processed);
        if removed > 0 {
            debug!(removed, base_ao = %base_ao, "Pruned processed requests");
        }
    }

    /// Requests consensus may propose on top of `base_ao`.
    ///
    /// Resolves once the pool is non-empty, with references to every request
    /// unlockable now. Expired requests found on the way are removed. Dropping
    /// the receiver cancels the wait.
    #[instrument(skip(self, base_ao), fields(state_index = base_ao.state_index))]
    pub fn consensus_proposals_async(&self, base_ao: AnchorOutput) -> oneshot::Receiver<Vec<RequestRef>> {
        self.prune_processed_since(&base_ao);

        let (mut tx, rx) = oneshot::channel();
        let pool = self.clone();
        let chain = base_ao.chain_id;
        tokio::spawn(async move {
            while pool.is_empty() {
                tokio::select! {
                    _ = tx.closed() => {
                        trace!("Proposal request abandoned");
                        return;
                    }
                    _ = tokio::time::sleep(pool.inner.config.proposals_poll_interval) => {}
                }
            }

            let now = pool.inner.clock.now();
            let tolerance = pool.inner.config.time_tolerance;
            let (mut refs, expired) = {
                let state = pool.inner.pool.read();
                let mut refs = Vec::with_capacity(state.requests.len());
                let mut expired = Vec::new();
                for request in state.requests.values() {
                    if pool.should_be_removed(request, now) {
                        expired.push(request.id());
                        continue;
                    }
                    if request.is_unlockable(chain, now, tolerance) {
                        refs.push(request.to_ref());
                    }
                }
                (refs, expired)
            };
            refs.sort_by_key(|r| r.id);

            debug!(proposals = refs.len(), expired = expired.len(), "Built batch proposal");
            let _ = tx.send(refs);
            pool.remove_requests(&expired);
        });
        rx
    }

    /// Resolve references to request bodies, in order.
    ///
    /// References not held locally are announced on the missing-requests
    /// channel and awaited until the configured timeout, after which the
    /// result is [`MempoolError::RequestsNotFound`].
    pub fn consensus_requests_async(
        &self,
        refs: Vec<RequestRef>,
    ) -> oneshot::Receiver<Result<Vec<Arc<Request>>, MempoolError>> {
        let (mut tx, rx) = oneshot::channel();
        let pool = self.clone();
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + pool.inner.config.missing_request_timeout;
            let mut announced = false;
            loop {
                let notified = pool.inner.arrivals.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let (found, missing) = pool.resolve_refs(&refs);
                if missing.is_empty() {
                    let _ = tx.send(Ok(found.into_iter().flatten().collect()));
                    return;
                }
                if !announced {
                    pool.announce_missing(&missing);
                    announced = true;
                }

                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        warn!(missing = missing.len(), "Referenced requests did not arrive in time");
                        let _ = tx.send(Err(MempoolError::RequestsNotFound(missing)));
                        return;
                    }
                    _ = tx.closed() => return,
                }
            }
        });
        rx
    }

    fn resolve_refs(&self, refs: &[RequestRef]) -> (Vec<Option<Arc<Request>>>, Vec<RequestRef>) {
        let pool = self.inner.pool.read();
        let mut missing = Vec::new();
        let found = refs
            .iter()
            .map(|r| match pool.requests.get(&r.id) {
                Some(request) if r.is_for(request) => Some(request.clone()),
                _ => {
                    missing.push(*r);
                    None
                }
            })
            .collect();
        (found, missing)
    }

    fn announce_missing(&self, missing: &[RequestRef]) {
        let Some(sink) = &self.inner.missing_requests else {
            return;
        };
        for r in missing {
            if let Err(e) = sink.try_send(*r) {
                debug!(request_ref = %r, error = %e, "Cannot announce missing request");
            }
        }
    }

    /// Wait until the pool is empty. Returns `false` on timeout.
    pub async fn wait_pool_empty(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.removals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_empty() {
                return true;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return self.is_empty(),
            }
        }
    }

    /// Stop the timelock scheduler. Parked requests are dropped and new
    /// timelocked requests are rejected.
    pub fn close(&self) {
        if let Some(mut scheduler) = self.inner.timelocks.lock().take() {
            scheduler.shutdown();
        }
        self.inner.pool.write().parked.clear();
    }
}

impl RequestPool for Mempool {
    fn receive_request(&self, request: Arc<Request>) -> bool {
        self.receive_requests(vec![request]).into_iter().all(|accepted| accepted)
    }

    fn get_request(&self, id: &RequestId) -> Option<Arc<Request>> {
        Mempool::get_request(self, id)
    }

    fn has_request_been_processed(&self, id: &RequestId) -> bool {
        self.check_processed(id)
    }
}

impl std::fmt::Debug for Mempool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mempool")
            .field("chain_id", &self.inner.chain_id)
            .field("info", &self.info())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryStateReader, ManualClock, NoopMetrics, SystemClock};
    use anchorchain_types::test_utils::*;
    use anchorchain_types::OutputFeatures;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingMetrics {
        ins: AtomicU64,
        outs: AtomicU64,
    }

    impl MempoolMetrics for CountingMetrics {
        fn count_request_in(&self, _request: &Request) {
            self.ins.fetch_add(1, Ordering::SeqCst);
        }
        fn count_request_out(&self) {
            self.outs.fetch_add(1, Ordering::SeqCst);
        }
        fn count_blocks_per_chain(&self) {}
    }

    fn make_pool(reader: Arc<InMemoryStateReader>, clock: Arc<dyn Clock>) -> Mempool {
        Mempool::new(
            test_chain(1),
            reader,
            Arc::new(NoopMetrics),
            clock,
            MempoolConfig {
                proposals_poll_interval: Duration::from_millis(10),
                missing_request_timeout: Duration::from_millis(200),
                ..Default::default()
            },
            None,
        )
    }

    fn on_ledger(seed: u8, timelock: Option<Timestamp>, expiry: Option<Timestamp>) -> Arc<Request> {
        Arc::new(test_on_ledger_request(
            test_chain(1),
            seed,
            OutputFeatures {
                timelock,
                expiry,
                return_amount: None,
            },
        ))
    }

    fn off_ledger(nonce: u64) -> Arc<Request> {
        Arc::new(test_off_ledger_request(test_chain(1), nonce))
    }

    #[tokio::test]
    async fn test_admits_and_deduplicates() {
        let pool = make_pool(Arc::new(InMemoryStateReader::new()), Arc::new(SystemClock));
        let req = off_ledger(1);

        assert_eq!(pool.receive_requests(vec![req.clone(), req.clone()]), vec![true, false]);
        assert!(pool.has_request(&req.id()));
        assert_eq!(pool.info().total_pool, 1);
        assert_eq!(pool.info().in_pool_counter, 1);
    }

    #[tokio::test]
    async fn test_rejects_processed_expired_and_return_amount() {
        let reader = Arc::new(InMemoryStateReader::new());
        let clock = Arc::new(ManualClock::new(Timestamp(10_000)));
        let pool = make_pool(reader.clone(), clock);

        let processed = off_ledger(1);
        reader.mark_processed(1, [processed.id()]);
        let expired = on_ledger(2, None, Some(Timestamp(9_000)));
        let with_return = Arc::new(test_on_ledger_request(
            test_chain(1),
            3,
            OutputFeatures {
                return_amount: Some(10),
                ..Default::default()
            },
        ));

        assert_eq!(
            pool.receive_requests(vec![processed, expired, with_return]),
            vec![false, false, false]
        );
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_timelock_expiring_before_unlock_is_rejected_immediately() {
        let pool = make_pool(Arc::new(InMemoryStateReader::new()), Arc::new(SystemClock));
        let now = Timestamp::now();
        let unlock = now.saturating_add(Duration::from_secs(60));
        let req = on_ledger(1, Some(unlock), Some(unlock));

        assert_eq!(pool.receive_requests(vec![req.clone()]), vec![false]);
        assert!(!pool.has_request(&req.id()));
    }

    #[tokio::test]
    async fn test_timelocked_request_admitted_after_unlock() {
        let pool = make_pool(Arc::new(InMemoryStateReader::new()), Arc::new(SystemClock));
        let unlock = Timestamp::now().saturating_add(Duration::from_millis(150));
        let req = on_ledger(1, Some(unlock), None);

        assert_eq!(pool.receive_requests(vec![req.clone()]), vec![true]);
        assert!(!pool.has_request(&req.id()), "parked until unlock");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !pool.has_request(&req.id()) {
            assert!(tokio::time::Instant::now() < deadline, "request never unlocked");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_parked_request_is_not_accepted_twice() {
        let pool = make_pool(Arc::new(InMemoryStateReader::new()), Arc::new(SystemClock));
        let unlock = Timestamp::now().saturating_add(Duration::from_millis(150));
        let req = on_ledger(1, Some(unlock), None);

        assert_eq!(pool.receive_requests(vec![req.clone()]), vec![true]);
        assert_eq!(pool.receive_requests(vec![req.clone()]), vec![false]);
        assert!(!pool.receive_request(req.clone()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !pool.has_request(&req.id()) {
            assert!(tokio::time::Instant::now() < deadline, "request never unlocked");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(pool.receive_requests(vec![req.clone()]), vec![false], "now held in the pool");
        assert_eq!(pool.info().in_pool_counter, 1);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_timelocked_requests() {
        let pool = make_pool(Arc::new(InMemoryStateReader::new()), Arc::new(SystemClock));
        pool.close();
        let unlock = Timestamp::now().saturating_add(Duration::from_secs(60));
        assert_eq!(pool.receive_requests(vec![on_ledger(1, Some(unlock), None)]), vec![false]);
    }

    #[tokio::test]
    async fn test_invalidated_reads_are_retried() {
        let reader = Arc::new(InMemoryStateReader::new());
        let pool = make_pool(reader.clone(), Arc::new(SystemClock));
        let req = off_ledger(1);
        reader.mark_processed(1, [req.id()]);
        reader.invalidate_next(3);

        assert_eq!(pool.receive_requests(vec![req]), vec![false], "retries reach the real answer");
    }

    #[tokio::test]
    async fn test_persistent_read_failure_keeps_request() {
        let reader = Arc::new(InMemoryStateReader::new());
        let pool = make_pool(reader.clone(), Arc::new(SystemClock));
        reader.set_unavailable(Some("db offline".into()));

        assert_eq!(pool.receive_requests(vec![off_ledger(1)]), vec![true]);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent_and_counts() {
        let metrics = Arc::new(CountingMetrics::default());
        let pool = Mempool::new(
            test_chain(1),
            Arc::new(InMemoryStateReader::new()),
            metrics.clone(),
            Arc::new(SystemClock),
            MempoolConfig::default(),
            None,
        );
        let req = off_ledger(1);
        pool.receive_requests(vec![req.clone()]);

        assert_eq!(pool.remove_requests(&[req.id(), req.id()]), 1);
        assert_eq!(pool.remove_requests(&[req.id()]), 0);
        assert_eq!(pool.info().out_pool_counter, 1);
        assert_eq!(metrics.ins.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.outs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_proposals_wait_for_requests_and_skip_locked() {
        let clock = Arc::new(ManualClock::new(Timestamp(10_000)));
        let pool = make_pool(Arc::new(InMemoryStateReader::new()), clock.clone());
        let ao = test_anchor_output(test_chain(1), test_committee(1), 0, 1);

        let rx = pool.consensus_proposals_async(ao);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let ready = off_ledger(1);
        let other_chain = Arc::new(test_off_ledger_request(test_chain(2), 2));
        pool.receive_requests(vec![ready.clone(), other_chain]);

        let refs = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("proposal resolves")
            .unwrap();
        assert_eq!(refs, vec![ready.to_ref()]);
    }

    #[tokio::test]
    async fn test_proposals_remove_expired_requests() {
        let clock = Arc::new(ManualClock::new(Timestamp(10_000)));
        let pool = make_pool(Arc::new(InMemoryStateReader::new()), clock.clone());
        let expiring = on_ledger(1, None, Some(Timestamp(11_000)));
        let keeper = off_ledger(2);
        pool.receive_requests(vec![expiring.clone(), keeper.clone()]);

        clock.set(Timestamp(12_000));
        let ao = test_anchor_output(test_chain(1), test_committee(1), 0, 1);
        let refs = pool.consensus_proposals_async(ao).await.unwrap();

        assert_eq!(refs, vec![keeper.to_ref()]);
        assert!(!pool.has_request(&expiring.id()));
        assert_eq!(pool.info().out_pool_counter, 1);
    }

    #[tokio::test]
    async fn test_proposals_prune_processed_since_last_anchor() {
        let reader = Arc::new(InMemoryStateReader::new());
        let pool = make_pool(reader.clone(), Arc::new(SystemClock));
        let (a, b) = (off_ledger(1), off_ledger(2));
        pool.receive_requests(vec![a.clone(), b.clone()]);

        let chain = test_chain(1);
        let cmt = test_committee(1);
        let _ = pool.consensus_proposals_async(test_anchor_output(chain, cmt, 0, 0)).await;
        reader.mark_processed(1, [a.id()]);
        let refs = pool
            .consensus_proposals_async(test_anchor_output(chain, cmt, 1, 1))
            .await
            .unwrap();

        assert_eq!(refs, vec![b.to_ref()]);
        assert!(!pool.has_request(&a.id()));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_older_anchor_is_logged_not_fatal() {
        let pool = make_pool(Arc::new(InMemoryStateReader::new()), Arc::new(SystemClock));
        pool.receive_requests(vec![off_ledger(1)]);
        let chain = test_chain(1);
        let cmt = test_committee(1);
        let _ = pool.consensus_proposals_async(test_anchor_output(chain, cmt, 5, 5)).await;
        let refs = pool
            .consensus_proposals_async(test_anchor_output(chain, cmt, 3, 3))
            .await
            .unwrap();

        assert_eq!(refs.len(), 1);
        assert!(logs_contain("assuming reorg"));
    }

    #[tokio::test]
    async fn test_requests_resolved_in_order() {
        let pool = make_pool(Arc::new(InMemoryStateReader::new()), Arc::new(SystemClock));
        let (a, b) = (off_ledger(1), off_ledger(2));
        pool.receive_requests(vec![a.clone(), b.clone()]);

        let resolved = pool
            .consensus_requests_async(vec![b.to_ref(), a.to_ref()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved, vec![b, a]);
    }

    #[tokio::test]
    async fn test_missing_request_announced_and_awaited() {
        let (missing_tx, mut missing_rx) = mpsc::channel(8);
        let pool = Mempool::new(
            test_chain(1),
            Arc::new(InMemoryStateReader::new()),
            Arc::new(NoopMetrics),
            Arc::new(SystemClock),
            MempoolConfig::default(),
            Some(missing_tx),
        );
        let req = off_ledger(7);
        let rx = pool.consensus_requests_async(vec![req.to_ref()]);

        let announced = tokio::time::timeout(Duration::from_secs(1), missing_rx.recv())
            .await
            .expect("missing ref announced")
            .unwrap();
        assert_eq!(announced, req.to_ref());

        pool.receive_requests(vec![req.clone()]);
        let resolved = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("resolves after arrival")
            .unwrap()
            .unwrap();
        assert_eq!(resolved, vec![req]);
    }

    #[tokio::test]
    async fn test_missing_request_times_out_with_typed_error() {
        let pool = make_pool(Arc::new(InMemoryStateReader::new()), Arc::new(SystemClock));
        let req = off_ledger(9);
        let result = pool.consensus_requests_async(vec![req.to_ref()]).await.unwrap();
        assert_eq!(result, Err(MempoolError::RequestsNotFound(vec![req.to_ref()])));
    }

    #[tokio::test]
    async fn test_wait_pool_empty() {
        let pool = make_pool(Arc::new(InMemoryStateReader::new()), Arc::new(SystemClock));
        assert!(pool.wait_pool_empty(Duration::from_millis(10)).await);

        let req = off_ledger(1);
        pool.receive_requests(vec![req.clone()]);
        assert!(!pool.wait_pool_empty(Duration::from_millis(30)).await);

        let remover = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remover.remove_requests(&[req.id()]);
        });
        assert!(pool.wait_pool_empty(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_wait_pool_empty_wakes_on_last_removal_only() {
        let pool = make_pool(Arc::new(InMemoryStateReader::new()), Arc::new(SystemClock));
        let (a, b) = (off_ledger(1), off_ledger(2));
        pool.receive_requests(vec![a.clone(), b.clone()]);

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.wait_pool_empty(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.remove_requests(&[a.id()]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "one request is still pooled");

        pool.remove_requests(&[b.id()]);
        let emptied = tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("woken by the removal")
            .unwrap();
        assert!(emptied);
    }
}
