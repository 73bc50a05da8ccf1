//! Error types for on-demand retrieval.
//!
//! Peer-level failures (`TransportError`, `ValidationError`, timeouts,
//! disconnects) are absorbed by the distributor and retried elsewhere. Only
//! `DistError` / `OdrError` reach callers.

use crate::storage::StorageError;
use lightclient_types::{PeerId, RequestKind};
use thiserror::Error;

/// Errors from the peer registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerSetError {
    /// A peer with this id is already registered.
    #[error("peer {0} already registered")]
    AlreadyRegistered(PeerId),

    /// No peer with this id is registered.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// The peer already has an outstanding request of this kind.
    #[error("peer {peer} is already serving a {kind} request")]
    AlreadyBusy { peer: PeerId, kind: RequestKind },

    /// The peer has no outstanding request of this kind.
    #[error("peer {peer} has no outstanding {kind} request")]
    NotBusy { peer: PeerId, kind: RequestKind },
}

/// Errors reported by a peer's send handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer's connection is gone.
    #[error("connection closed")]
    Closed,

    /// The peer's outbound queue is full.
    #[error("outbound queue full")]
    Full,

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

/// A response failed verification against the trusted anchor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The proof does not verify against the anchor.
    #[error("invalid proof: {0}")]
    InvalidProof(String),

    /// The response could not be interpreted at all.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Terminal outcome of a distributed request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistError {
    /// Every eligible peer was tried (or none was connected).
    #[error("no suitable peers after {attempts} attempts")]
    NoPeers { attempts: u32 },

    /// The request's overall deadline elapsed.
    #[error("request timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// The request was cancelled before completion.
    #[error("request cancelled")]
    Cancelled,

    /// The distributor is shutting down.
    #[error("distributor shut down")]
    Shutdown,
}

/// Errors from distributor control operations (peer events, status queries).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// The distributor loop is no longer running.
    #[error("distributor shut down")]
    Shutdown,

    /// The peer registry rejected the event.
    #[error(transparent)]
    PeerSet(#[from] PeerSetError),
}

/// Errors surfaced to callers of the retrieval API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OdrError {
    /// The data could not be obtained from any peer.
    #[error("data unavailable: no suitable peers after {attempts} attempts")]
    NoPeers { attempts: u32 },

    /// The query deadline elapsed.
    #[error("retrieval timed out")]
    Timeout,

    /// The query was cancelled.
    #[error("retrieval cancelled")]
    Cancelled,

    /// The retrieval engine is shutting down.
    #[error("retrieval engine shut down")]
    Shutdown,

    /// Local storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl OdrError {
    /// Whether this error means "the network could not give us the data".
    ///
    /// The domain layer treats these as retry-later conditions rather than
    /// node faults.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, OdrError::NoPeers { .. } | OdrError::Timeout)
    }
}

impl From<DistError> for OdrError {
    fn from(err: DistError) -> Self {
        match err {
            DistError::NoPeers { attempts } => OdrError::NoPeers { attempts },
            DistError::Timeout { .. } => OdrError::Timeout,
            DistError::Cancelled => OdrError::Cancelled,
            DistError::Shutdown => OdrError::Shutdown,
        }
    }
}
