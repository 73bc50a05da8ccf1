//! Wire-level request model.
//!
//! The byte layout belongs to the transport; this module only defines what a
//! request asks for. Payloads derive serde so transports can pick a codec.

use lightclient_types::{BlockNumber, Hash, RequestId, RequestKind};
use serde::{Deserialize, Serialize};

/// What a request asks the server for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestPayload {
    /// A block header by hash.
    Header { hash: Hash },
    /// The body of a block.
    Body { block_hash: Hash },
    /// The receipts of a block.
    Receipts { block_hash: Hash },
    /// A Merkle proof of `key` in the state trie rooted at `state_root`.
    StateProof { state_root: Hash, key: Vec<u8> },
    /// A canonical-hash-trie proof for the header at `block_number`.
    ChtProof {
        section: u64,
        block_number: BlockNumber,
    },
    /// A bloom-trie proof for one bloom bit of a section.
    BloomTrieProof { section: u64, bit: u32 },
}

impl RequestPayload {
    /// The request kind this payload belongs to.
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestPayload::Header { .. } => RequestKind::Headers,
            RequestPayload::Body { .. } => RequestKind::Bodies,
            RequestPayload::Receipts { .. } => RequestKind::Receipts,
            RequestPayload::StateProof { .. } => RequestKind::StateProof,
            RequestPayload::ChtProof { .. } => RequestKind::ChtProof,
            RequestPayload::BloomTrieProof { .. } => RequestKind::BloomTrieProof,
        }
    }
}

/// A request as handed to a peer's send handle.
///
/// The server echoes `id` in its response so it can be matched to the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
    pub id: RequestId,
    pub payload: RequestPayload,
}

impl WireRequest {
    pub fn kind(&self) -> RequestKind {
        self.payload.kind()
    }
}
