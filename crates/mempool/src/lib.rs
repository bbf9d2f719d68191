//! Request pool for one chain.
//!
//! This crate holds the requests a chain has not processed yet and keeps the
//! pool replicated across committee and access nodes:
//!
//! - [`Mempool`]: concurrency-safe pool, timelock scheduling, batch proposals
//!   and request resolution for consensus
//! - [`MempoolGpa`]: gossip protocol sharing new requests and recovering
//!   missing ones, rate limited with staggered batches
//! - [`StateReader`], [`MempoolMetrics`], [`Clock`]: collaborators passed in
//!   at construction
//!
//! # Ownership
//!
//! The pool never calls into the gossip protocol. The gossip protocol only sees
//! the pool through the narrow [`RequestPool`] trait. Requests the pool needs
//! from peers are announced on a channel handed to [`Mempool::new`], and the
//! runtime turns them into gossip inputs.

mod clock;
mod config;
mod error;
mod gossip;
mod metrics;
mod pool;
mod state_reader;
mod timelock;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GossipConfig, MempoolConfig};
pub use error::{MempoolError, StateReadError};
pub use gossip::{GossipStats, MempoolGpa, MempoolInput};
pub use metrics::{MempoolMetrics, NoopMetrics};
pub use pool::{Mempool, RequestPool};
pub use state_reader::{InMemoryStateReader, StateReader};
