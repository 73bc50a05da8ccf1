//! Request kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a request sent to a server.
///
/// A server answers requests of one kind in order on a single stream, so a
/// peer serves at most one outstanding request per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RequestKind {
    /// Block headers by hash.
    Headers,
    /// Block bodies (transactions and uncles).
    Bodies,
    /// Transaction receipts of a block.
    Receipts,
    /// Merkle proof of an account or storage slot against a state root.
    StateProof,
    /// Canonical-hash-trie proof of a header against a CHT root.
    ChtProof,
    /// Bloom-trie proof of a bloom bit vector section.
    BloomTrieProof,
}

impl RequestKind {
    /// Every request kind, in a stable order.
    pub const ALL: [RequestKind; 6] = [
        RequestKind::Headers,
        RequestKind::Bodies,
        RequestKind::Receipts,
        RequestKind::StateProof,
        RequestKind::ChtProof,
        RequestKind::BloomTrieProof,
    ];

    /// Returns a string representation for metrics/logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Headers => "headers",
            RequestKind::Bodies => "bodies",
            RequestKind::Receipts => "receipts",
            RequestKind::StateProof => "state_proof",
            RequestKind::ChtProof => "cht_proof",
            RequestKind::BloomTrieProof => "bloom_trie_proof",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
