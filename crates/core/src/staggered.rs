//! Staggered message batches.
//!
//! A [`StaggeredMessages`] holds a batch of messages and releases at most
//! `per_tick` of them on every tick of its interval. Before each release the
//! stop predicate is evaluated; once it reports true the batch is finished for
//! good, even if messages remain. Runners own the timer, the batch only decides
//! what goes out on each tick.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Predicate telling a staggered batch that its goal has been reached.
pub type StopPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// A batch of messages released a few at a time.
pub struct StaggeredMessages<M> {
    pending: VecDeque<M>,
    per_tick: usize,
    interval: Duration,
    stop: StopPredicate,
    stopped: bool,
    ticks: u32,
}

impl<M> StaggeredMessages<M> {
    pub fn new(
        messages: Vec<M>,
        per_tick: usize,
        interval: Duration,
        stop: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::with_predicate(messages, per_tick, interval, Arc::new(stop))
    }

    pub fn with_predicate(
        messages: Vec<M>,
        per_tick: usize,
        interval: Duration,
        stop: StopPredicate,
    ) -> Self {
        Self {
            pending: messages.into(),
            per_tick: per_tick.max(1),
            interval,
            stop,
            stopped: false,
            ticks: 0,
        }
    }

    /// Release the next batch.
    ///
    /// Returns nothing, permanently, once the stop predicate has fired.
    pub fn next_batch(&mut self) -> Vec<M> {
        if self.stopped {
            return Vec::new();
        }
        if (self.stop)() {
            self.stopped = true;
            return Vec::new();
        }
        self.ticks += 1;
        let n = self.per_tick.min(self.pending.len());
        self.pending.drain(..n).collect()
    }

    /// Whether sending should stop now (already stopped or predicate satisfied).
    pub fn should_stop_sending(&self) -> bool {
        self.stopped || (self.stop)()
    }

    /// Nothing more will ever be released.
    pub fn is_done(&self) -> bool {
        self.stopped || self.pending.is_empty()
    }

    /// Messages not yet released.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn per_tick(&self) -> usize {
        self.per_tick
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of batches released so far.
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Messages not yet released, in release order.
    pub fn pending(&self) -> impl Iterator<Item = &M> {
        self.pending.iter()
    }

    pub fn map<N>(self, f: impl Fn(M) -> N) -> StaggeredMessages<N> {
        StaggeredMessages {
            pending: self.pending.into_iter().map(f).collect(),
            per_tick: self.per_tick,
            interval: self.interval,
            stop: self.stop,
            stopped: self.stopped,
            ticks: self.ticks,
        }
    }
}

impl<M: fmt::Debug> fmt::Debug for StaggeredMessages<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaggeredMessages")
            .field("pending", &self.pending)
            .field("per_tick", &self.per_tick)
            .field("interval", &self.interval)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_releases_per_tick_in_order() {
        let mut s = StaggeredMessages::new(vec![1, 2, 3, 4, 5], 2, Duration::from_millis(300), || false);
        assert_eq!(s.next_batch(), vec![1, 2]);
        assert_eq!(s.next_batch(), vec![3, 4]);
        assert!(!s.is_done());
        assert_eq!(s.next_batch(), vec![5]);
        assert!(s.is_done());
        assert!(s.next_batch().is_empty());
        assert_eq!(s.ticks(), 4);
    }

    #[test]
    fn test_stop_predicate_halts_permanently() {
        let flag = Arc::new(AtomicBool::new(false));
        let f = flag.clone();
        let mut s = StaggeredMessages::new(vec![1, 2, 3], 1, Duration::from_secs(1), move || {
            f.load(Ordering::SeqCst)
        });

        assert_eq!(s.next_batch(), vec![1]);
        flag.store(true, Ordering::SeqCst);
        assert!(s.should_stop_sending());
        assert!(s.next_batch().is_empty());

        // Even if the predicate flips back, a stopped batch stays stopped.
        flag.store(false, Ordering::SeqCst);
        assert!(s.next_batch().is_empty());
        assert!(s.is_done());
        assert_eq!(s.remaining(), 2, "messages remain queued but are never sent");
    }

    #[test]
    fn test_zero_per_tick_is_clamped() {
        let mut s = StaggeredMessages::new(vec!['a', 'b'], 0, Duration::from_secs(1), || false);
        assert_eq!(s.per_tick(), 1);
        assert_eq!(s.next_batch(), vec!['a']);
    }
}
