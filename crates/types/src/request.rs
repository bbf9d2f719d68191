//! Requests and request references.

use crate::{ChainId, Hash, OutputId, RequestId, Timestamp};
use sbor::prelude::*;
use std::time::Duration;
use thiserror::Error;

/// Entry point invoked by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub struct CallTarget {
    pub contract: u32,
    pub entry_point: u32,
}

/// Optional L1 output features carried by an on-ledger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, BasicSbor)]
pub struct OutputFeatures {
    /// The request may not be processed before this time.
    pub timelock: Option<Timestamp>,
    /// The request may not be processed at or after this time.
    pub expiry: Option<Timestamp>,
    /// Amount that must be returned to the sender when consumed.
    pub return_amount: Option<u64>,
}

/// A request that arrived as an output on the L1.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct OnLedgerRequest {
    pub output_id: OutputId,
    pub target: ChainId,
    pub call: CallTarget,
    pub params: Vec<u8>,
    pub gas_budget: u64,
    pub features: OutputFeatures,
}

/// A request submitted directly to a node, signed by its sender.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct OffLedgerRequest {
    pub chain_id: ChainId,
    pub call: CallTarget,
    pub params: Vec<u8>,
    pub gas_budget: u64,
    pub nonce: u64,
    pub sender: [u8; 32],
}

/// Request payload.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub enum RequestBody {
    OnLedger(OnLedgerRequest),
    OffLedger(OffLedgerRequest),
}

/// An immutable request with its identifier and content hash cached.
#[derive(Clone)]
pub struct Request {
    body: RequestBody,

    /// Cached id (derived from the output id or the content hash).
    id: RequestId,

    /// Cached content hash of the encoded body.
    hash: Hash,
}

// Compare by hash; the hash covers the whole body.
impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Request {}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("hash", &self.hash)
            .field("on_ledger", &self.is_on_ledger())
            .finish_non_exhaustive()
    }
}

impl Request {
    /// Wrap a body, computing its id and content hash.
    pub fn new(body: RequestBody) -> Self {
        let payload = basic_encode(&body).expect("request body should be encodable");
        let hash = Hash::from_bytes(&payload);
        let id = match &body {
            RequestBody::OnLedger(req) => RequestId(req.output_id),
            RequestBody::OffLedger(_) => RequestId(OutputId::new(hash, 0)),
        };
        Self { body, id, hash }
    }

    /// Decode a request from its sbor-encoded body.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let body: RequestBody = basic_decode(bytes)?;
        Ok(Self::new(body))
    }

    /// Encode the request body.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        basic_encode(&self.body)
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn is_on_ledger(&self) -> bool {
        matches!(self.body, RequestBody::OnLedger(_))
    }

    /// Reference suitable for asking peers for this request.
    pub fn to_ref(&self) -> RequestRef {
        RequestRef {
            id: self.id,
            hash: self.hash,
        }
    }

    /// Chain this request is addressed to.
    pub fn target_chain(&self) -> ChainId {
        match &self.body {
            RequestBody::OnLedger(req) => req.target,
            RequestBody::OffLedger(req) => req.chain_id,
        }
    }

    /// Output features; off-ledger requests have none.
    pub fn features(&self) -> OutputFeatures {
        match &self.body {
            RequestBody::OnLedger(req) => req.features,
            RequestBody::OffLedger(_) => OutputFeatures::default(),
        }
    }

    pub fn gas_budget(&self) -> u64 {
        match &self.body {
            RequestBody::OnLedger(req) => req.gas_budget,
            RequestBody::OffLedger(req) => req.gas_budget,
        }
    }

    /// Timelock still in force at `now`, if any.
    pub fn pending_timelock(&self, now: Timestamp) -> Option<Timestamp> {
        self.features().timelock.filter(|t| *t > now)
    }

    /// Whether the request can be proposed for `chain` at `now`.
    ///
    /// `tolerance` widens both bounds so that replicas with slightly skewed
    /// clocks agree on the readiness set.
    pub fn is_unlockable(&self, chain: ChainId, now: Timestamp, tolerance: Duration) -> bool {
        if self.target_chain() != chain {
            return false;
        }
        let features = self.features();
        if let Some(timelock) = features.timelock {
            if timelock > now.saturating_sub(tolerance) {
                return false;
            }
        }
        if let Some(expiry) = features.expiry {
            if expiry <= now.saturating_add(tolerance) {
                return false;
            }
        }
        true
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.features().expiry.is_some_and(|expiry| now >= expiry)
    }

    /// A timelocked request whose expiry is not after its unlock time can
    /// never be processed.
    pub fn is_never_processable(&self) -> bool {
        let features = self.features();
        match (features.timelock, features.expiry) {
            (Some(timelock), Some(expiry)) => expiry <= timelock,
            _ => false,
        }
    }
}

// ============================================================================
// Request references
// ============================================================================

/// Encoded size of a [`RequestRef`].
pub const REQUEST_REF_LEN: usize = Hash::BYTES + RequestId::BYTES;

/// Error decoding a [`RequestRef`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestRefError {
    #[error("invalid request ref length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// A claim on a request by id and content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub struct RequestRef {
    pub id: RequestId,
    pub hash: Hash,
}

impl RequestRef {
    /// Whether `request` is exactly the one referenced.
    pub fn is_for(&self, request: &Request) -> bool {
        self.id == request.id() && self.hash == request.hash()
    }

    /// `[32-byte content hash][request id]`.
    pub fn to_bytes(&self) -> [u8; REQUEST_REF_LEN] {
        let mut out = [0u8; REQUEST_REF_LEN];
        out[..Hash::BYTES].copy_from_slice(self.hash.as_bytes());
        out[Hash::BYTES..].copy_from_slice(&self.id.0.to_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RequestRefError> {
        if bytes.len() != REQUEST_REF_LEN {
            return Err(RequestRefError::InvalidLength {
                expected: REQUEST_REF_LEN,
                actual: bytes.len(),
            });
        }
        let mut hash = [0u8; Hash::BYTES];
        hash.copy_from_slice(&bytes[..Hash::BYTES]);
        let mut id = [0u8; OutputId::BYTES];
        id.copy_from_slice(&bytes[Hash::BYTES..]);
        Ok(Self {
            hash: Hash::from_hash_bytes(&hash),
            id: RequestId(OutputId::from_bytes(&id)),
        })
    }
}

impl std::fmt::Display for RequestRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.hash.short())
    }
}
