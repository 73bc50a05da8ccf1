//! Chain head advertised by a remote server.

use crate::{BlockNumber, Hash};
use serde::{Deserialize, Serialize};

/// The head of a peer's chain, as announced during the handshake and updated
/// by subsequent announcements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    /// Hash of the head block.
    pub hash: Hash,
    /// Number of the head block.
    pub number: BlockNumber,
    /// Cumulative difficulty up to and including the head.
    pub total_difficulty: u128,
}

impl ChainHead {
    pub fn new(hash: Hash, number: u64, total_difficulty: u128) -> Self {
        Self {
            hash,
            number: BlockNumber(number),
            total_difficulty,
        }
    }

    /// Whether this head covers (is at or beyond) the given block.
    pub fn covers(&self, number: BlockNumber) -> bool {
        self.number >= number
    }
}
