use anchorchain_types::Request;

/// Sink for mempool counters. Calls are fire-and-forget.
pub trait MempoolMetrics: Send + Sync + 'static {
    fn count_request_in(&self, request: &Request);

    fn count_request_out(&self);

    fn count_blocks_per_chain(&self);
}

/// Metrics sink that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MempoolMetrics for NoopMetrics {
    fn count_request_in(&self, _request: &Request) {}

    fn count_request_out(&self) {}

    fn count_blocks_per_chain(&self) {}
}
