//! Protocol automaton contract for anchorchain.
//!
//! This crate provides the pieces every peer-coordinated state machine shares:
//!
//! - [`Gpa`]: the trait all protocol state machines implement
//! - [`GpaMessage`]: addressing and encoding for protocol messages
//! - [`OutMessages`]: messages produced by one transition
//! - [`StaggeredMessages`]: a batch released a few messages per tick
//! - [`CodecError`]: wire decoding failures
//!
//! # Architecture
//!
//! ```text
//! Input / Message → Gpa::input() / Gpa::message() → OutMessages
//!                            ↓
//!                      Gpa::output()
//! ```
//!
//! A protocol state machine is:
//! - **Synchronous**: No async, no .await
//! - **Deterministic**: Same state + event = same messages
//! - **Single-threaded**: Callers serialize calls per instance
//!
//! All I/O is handled by the runner (simulation or production) which:
//! 1. Delivers inputs and decoded peer messages to the state machine
//! 2. Sends the returned messages, ticking staggered batches on a timer
//! 3. Publishes the output to whoever consumes it

mod error;
mod gpa;
mod staggered;

pub use error::CodecError;
pub use gpa::{Gpa, GpaMessage, OutMessages};
pub use staggered::{StaggeredMessages, StopPredicate};
