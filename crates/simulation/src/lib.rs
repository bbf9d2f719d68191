//! Deterministic simulation for anchorchain protocols.
//!
//! [`TestContext`] hosts one protocol instance per node, delivers their
//! messages through a [`SimulatedNetwork`] in seeded random order and releases
//! staggered batches on a virtual clock. Same seed, same run.
//!
//! ```ignore
//! let mut tc = TestContext::new(nodes, 42);
//! tc.with_inputs(inputs).run_all();
//! for (id, out) in tc.outputs() { /* ... */ }
//! ```

mod network;
mod runner;

pub use network::{Delivery, NetworkConfig, SimulatedNetwork};
pub use runner::{SimulationStats, TestContext};
