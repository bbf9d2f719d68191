//! The protocol automaton trait.

use crate::{CodecError, StaggeredMessages};
use anchorchain_types::NodeId;
use std::fmt;

/// A message exchanged between protocol instances on different nodes.
///
/// Every message carries its own addressing so it can be applied regardless
/// of arrival order.
pub trait GpaMessage: Clone + fmt::Debug + Send + 'static {
    fn sender(&self) -> NodeId;

    fn recipient(&self) -> NodeId;

    /// Overwrite the sender with the identity reported by the transport.
    fn set_sender(&mut self, sender: NodeId);

    /// Encode as `[1-byte type tag][payload]`.
    fn encode(&self) -> Result<Vec<u8>, CodecError>;

    /// Short name for logs and metrics.
    fn type_name(&self) -> &'static str;
}

/// A generic protocol automaton.
///
/// Transitions are pure functions of (state, event) to (state, messages):
/// implementations perform no I/O and never block. Input and message enums
/// are closed sum types, so an unhandled variant is a compile error.
pub trait Gpa {
    /// Locally generated events.
    type Input;

    /// Messages exchanged with peers.
    type Message: GpaMessage;

    /// Externally visible state.
    type Output;

    /// Apply a local event.
    fn input(&mut self, input: Self::Input) -> OutMessages<Self::Message>;

    /// Apply a message received from a peer.
    fn message(&mut self, msg: Self::Message) -> OutMessages<Self::Message>;

    /// Current externally visible state.
    fn output(&self) -> Self::Output;

    /// Decode a message received from `sender` using its leading type tag.
    fn unmarshal_message(&self, sender: NodeId, bytes: &[u8]) -> Result<Self::Message, CodecError>;

    /// Diagnostic snapshot.
    fn status_string(&self) -> String;
}

/// Messages produced by a single transition.
pub struct OutMessages<M> {
    immediate: Vec<M>,
    staggered: Vec<StaggeredMessages<M>>,
}

impl<M> OutMessages<M> {
    pub fn none() -> Self {
        Self {
            immediate: Vec::new(),
            staggered: Vec::new(),
        }
    }

    pub fn single(msg: M) -> Self {
        let mut out = Self::none();
        out.add(msg);
        out
    }

    pub fn add(&mut self, msg: M) -> &mut Self {
        self.immediate.push(msg);
        self
    }

    pub fn add_all(&mut self, msgs: impl IntoIterator<Item = M>) -> &mut Self {
        self.immediate.extend(msgs);
        self
    }

    pub fn add_staggered(&mut self, batch: StaggeredMessages<M>) -> &mut Self {
        if batch.remaining() > 0 {
            self.staggered.push(batch);
        }
        self
    }

    /// Move everything from `other` into `self`.
    pub fn merge(&mut self, other: OutMessages<M>) -> &mut Self {
        self.immediate.extend(other.immediate);
        self.staggered.extend(other.staggered);
        self
    }

    /// Total messages: immediate plus every not-yet-released staggered one.
    pub fn len(&self) -> usize {
        self.immediate.len() + self.staggered.iter().map(|s| s.remaining()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn immediate(&self) -> &[M] {
        &self.immediate
    }

    pub fn staggered(&self) -> &[StaggeredMessages<M>] {
        &self.staggered
    }

    pub fn into_parts(self) -> (Vec<M>, Vec<StaggeredMessages<M>>) {
        (self.immediate, self.staggered)
    }

    /// Convert messages into another type, e.g. to wrap them in an outer envelope.
    pub fn map<N: 'static>(self, f: impl Fn(M) -> N + Clone + Send + Sync + 'static) -> OutMessages<N>
    where
        M: 'static,
    {
        OutMessages {
            immediate: self.immediate.into_iter().map(f.clone()).collect(),
            staggered: self.staggered.into_iter().map(|s| s.map(f.clone())).collect(),
        }
    }
}

impl<M> Default for OutMessages<M> {
    fn default() -> Self {
        Self::none()
    }
}

impl<M: fmt::Debug> fmt::Debug for OutMessages<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutMessages")
            .field("immediate", &self.immediate)
            .field("staggered", &self.staggered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_len_counts_immediate_and_staggered() {
        let mut out = OutMessages::single(1u32);
        out.add(2);
        out.add_staggered(StaggeredMessages::new(
            vec![3, 4, 5],
            1,
            Duration::from_secs(1),
            || false,
        ));
        assert_eq!(out.len(), 5);
        assert_eq!(out.immediate(), &[1, 2]);
        assert_eq!(out.staggered().len(), 1);
    }

    #[test]
    fn test_empty_staggered_batches_are_dropped() {
        let mut out = OutMessages::<u32>::none();
        out.add_staggered(StaggeredMessages::new(vec![], 1, Duration::from_secs(1), || false));
        assert!(out.is_empty());
        assert!(out.staggered().is_empty());
    }

    #[test]
    fn test_merge_and_map() {
        let mut a = OutMessages::single(1u32);
        let mut b = OutMessages::single(2u32);
        b.add_staggered(StaggeredMessages::new(vec![3], 1, Duration::from_millis(10), || false));
        a.merge(b);

        let mapped = a.map(|m| m * 10);
        let (immediate, mut staggered) = mapped.into_parts();
        assert_eq!(immediate, vec![10, 20]);
        assert_eq!(staggered[0].next_batch(), vec![30]);
    }
}
