use anchorchain_types::RequestRef;
use thiserror::Error;

/// Errors from reading chain state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateReadError {
    /// The state changed underneath an optimistic read; retrying may succeed.
    #[error("state read invalidated")]
    Invalidated,

    #[error("state unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned to consensus by the pool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MempoolError {
    /// Referenced requests did not arrive before the timeout.
    #[error("{} referenced requests not found in the pool", .0.len())]
    RequestsNotFound(Vec<RequestRef>),

    #[error("mempool closed")]
    Closed,
}
