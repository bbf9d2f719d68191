//! Production runtime with async I/O.
//!
//! This crate hosts the deterministic protocol state machines on tokio:
//!
//! - Peer messages via a [`Transport`], multiplexed by an envelope codec
//! - Staggered batches via tokio intervals
//! - Outputs published on `watch` channels
//!
//! # Architecture
//!
//! Each protocol gets a single task that owns its state machine and receives
//! inputs and inbound payloads over mpsc channels. This avoids mutex
//! contention and keeps transitions strictly sequential.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           NodeHost                               │
//! │                                                                  │
//! │  Transport ──frames──► inbound router                            │
//! │                          │ Protocol::Mempool   │ Protocol::ChainMgr
//! │                          ▼                     ▼                 │
//! │              GpaRunner<MempoolGpa>   GpaRunner<ChainManager>     │
//! │                   ▲      │                     │                 │
//! │   MempoolService ─┘      │                     │ watch           │
//! │   (submit, recovery)     │                     ▼                 │
//! │                          │              committee / access       │
//! │                          │              nodes ──► SetPeers       │
//! │                          ▼                                       │
//! │                   StaggerDispatcher (one task per batch)         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod host;
mod metrics;
pub mod network;
mod runner;
mod service;
mod telemetry;
mod timers;

pub use config::{
    CommitteeLogSection, ConfigError, GossipSection, IdentityConfig, LoggingSection,
    MempoolSection, NodeConfig, RuntimeSection,
};
pub use host::{HostError, NodeDeps, NodeHost};
pub use metrics::{encode_text, NodeMetrics};
pub use network::{LoopbackNetwork, LoopbackTransport, NetworkError, Transport};
pub use runner::{GpaHandle, GpaRunner, RunnerConfig, RunnerError, ShutdownHandle};
pub use service::{MempoolService, MempoolServiceConfig};
pub use telemetry::{env_filter, init_logging, TelemetryError};
pub use timers::StaggerDispatcher;
