//! Byte-store capability.
//!
//! Persistent key-value storage is owned by the embedding node. The engine
//! only needs `get`/`put`, used for ranking persistence and result caching.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Error type for storage operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),
}

/// Minimal key-value store.
///
/// Implementations must be internally synchronized; all methods take `&self`.
pub trait KvStore: Send + Sync + 'static {
    /// Read a value. `Ok(None)` means the key is absent.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a value, replacing any previous one.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;
}

/// In-memory store, for tests and ephemeral nodes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}

/// Storage key layout.
pub mod keys {
    use crate::retriever::QueryId;

    /// Key under which the server ranking is persisted.
    pub const SERVER_RANKING: &[u8] = b"lightclient/ranking";

    const ODR_CACHE_PREFIX: &[u8] = b"lightclient/odr/";

    /// Key for a cached, already-verified retrieval result.
    pub fn odr_result(id: &QueryId) -> Vec<u8> {
        let kind = id.kind.as_str().as_bytes();
        let mut key = Vec::with_capacity(ODR_CACHE_PREFIX.len() + kind.len() + 33);
        key.extend_from_slice(ODR_CACHE_PREFIX);
        key.extend_from_slice(kind);
        key.push(b'/');
        key.extend_from_slice(id.key.as_bytes());
        key
    }
}
