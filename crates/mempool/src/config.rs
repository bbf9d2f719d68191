use std::time::Duration;

/// Configuration for the request pool.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Clock skew tolerated when deciding whether a request is unlockable.
    pub time_tolerance: Duration,
    /// Capacity of the queue feeding the timelock scheduler.
    pub timelock_queue_capacity: usize,
    /// Attempts at the processed check when the state read is invalidated.
    pub processed_check_retries: u32,
    /// How often an empty pool is re-checked while a proposal is pending.
    pub proposals_poll_interval: Duration,
    /// How long consensus waits for referenced requests it does not hold.
    pub missing_request_timeout: Duration,
    /// Reject on-ledger requests that carry a return amount.
    pub reject_return_amount: bool,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            time_tolerance: Duration::ZERO,
            timelock_queue_capacity: 1024,
            processed_check_retries: 5,
            proposals_poll_interval: Duration::from_millis(200),
            missing_request_timeout: Duration::from_secs(10),
            reject_return_amount: true,
        }
    }
}

/// Fan-out limits for the gossip protocol.
///
/// Missing requests are recovered more aggressively than new requests are
/// shared.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Peers a new request is shared with per tick.
    pub share_per_tick: usize,
    pub share_interval: Duration,
    /// Committee peers asked for a missing request per tick.
    pub missing_per_tick: usize,
    pub missing_interval: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            share_per_tick: 1,
            share_interval: Duration::from_secs(1),
            missing_per_tick: 2,
            missing_interval: Duration::from_millis(300),
        }
    }
}
