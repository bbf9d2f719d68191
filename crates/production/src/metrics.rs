//! Prometheus metrics for a node.
//!
//! Metrics are registered on a caller-provided [`Registry`] so that several
//! nodes can run in one process (tests, local clusters) without clashing.

use anchorchain_mempool::MempoolMetrics;
use anchorchain_types::Request;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters for the request pool and the protocol runners.
#[derive(Clone)]
pub struct NodeMetrics {
    // === Mempool ===
    pub requests_in: IntCounterVec,
    pub requests_out: IntCounter,
    pub blocks_per_chain: IntCounter,

    // === Runners ===
    pub messages_sent: IntCounterVec,
    pub messages_received: IntCounterVec,
    pub send_failures: IntCounterVec,
    pub invalid_messages_received: IntCounterVec,
}

impl NodeMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self {
            requests_in: IntCounterVec::new(
                Opts::new("anchorchain_mempool_requests_in_total", "Requests admitted to the pool"),
                &["kind"],
            )?,
            requests_out: IntCounter::new(
                "anchorchain_mempool_requests_out_total",
                "Requests removed from the pool",
            )?,
            blocks_per_chain: IntCounter::new(
                "anchorchain_mempool_blocks_total",
                "Anchor outputs seen by the pool",
            )?,
            messages_sent: IntCounterVec::new(
                Opts::new("anchorchain_messages_sent_total", "Protocol messages sent"),
                &["protocol"],
            )?,
            messages_received: IntCounterVec::new(
                Opts::new("anchorchain_messages_received_total", "Protocol messages received"),
                &["protocol"],
            )?,
            send_failures: IntCounterVec::new(
                Opts::new("anchorchain_send_failures_total", "Messages the transport refused"),
                &["protocol"],
            )?,
            invalid_messages_received: IntCounterVec::new(
                Opts::new(
                    "anchorchain_invalid_messages_received_total",
                    "Messages that failed to decode",
                ),
                &["protocol"],
            )?,
        };

        registry.register(Box::new(metrics.requests_in.clone()))?;
        registry.register(Box::new(metrics.requests_out.clone()))?;
        registry.register(Box::new(metrics.blocks_per_chain.clone()))?;
        registry.register(Box::new(metrics.messages_sent.clone()))?;
        registry.register(Box::new(metrics.messages_received.clone()))?;
        registry.register(Box::new(metrics.send_failures.clone()))?;
        registry.register(Box::new(metrics.invalid_messages_received.clone()))?;
        Ok(metrics)
    }
}

impl MempoolMetrics for NodeMetrics {
    fn count_request_in(&self, request: &Request) {
        let kind = if request.is_on_ledger() { "on_ledger" } else { "off_ledger" };
        self.requests_in.with_label_values(&[kind]).inc();
    }

    fn count_request_out(&self) {
        self.requests_out.inc();
    }

    fn count_blocks_per_chain(&self) {
        self.blocks_per_chain.inc();
    }
}

/// Render every metric in `registry` in the Prometheus text format.
pub fn encode_text(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
