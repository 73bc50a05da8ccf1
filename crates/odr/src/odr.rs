//! Light ODR façade.
//!
//! The only entry point domain code uses when local data is missing. Each
//! query carries the trusted anchor (a header hash or a trie root that was
//! already accepted locally), and responses are checked against it before
//! they are returned or cached. Proof cryptography is supplied by the
//! embedding node through [`ProofVerifier`].

use crate::error::{OdrError, ValidationError};
use crate::message::RequestPayload;
use crate::metrics;
use crate::peer_set::PeerInfo;
use crate::retriever::{OdrRequest, QueryId, RetrieveManager};
use crate::storage::{keys, KvStore};
use lightclient_types::{BlockNumber, Hash, RequestKind};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{trace, warn};

/// Blocks per canonical-hash-trie section.
pub const CHT_SECTION_SIZE: u64 = 32_768;

/// Blocks per bloom-trie section.
pub const BLOOM_TRIE_SECTION_SIZE: u64 = 32_768;

/// Merkle proof verification capability.
///
/// Called on the distributor's scheduling task for every response, so it
/// must be cheap and must not block or perform I/O. A slow verifier stalls
/// assignment of every other request.
pub trait ProofVerifier: Send + Sync + 'static {
    /// Check that `proof` proves `key` under `root` and return the proven
    /// value, or `None` if the proof is invalid.
    fn verify(&self, proof: &[u8], root: &Hash, key: &[u8]) -> Option<Vec<u8>>;
}

/// A domain-level retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OdrQuery {
    /// A header, identified by its hash. Verified by hashing the response.
    Header { hash: Hash },
    /// A block body, proven against the header's transaction root.
    BlockBody {
        block_hash: Hash,
        number: BlockNumber,
        tx_root: Hash,
    },
    /// A block's receipts, proven against the header's receipts root.
    Receipts {
        block_hash: Hash,
        number: BlockNumber,
        receipts_root: Hash,
    },
    /// A state entry proven against a state root.
    StateProof {
        state_root: Hash,
        number: BlockNumber,
        key: Vec<u8>,
    },
    /// A canonical block hash proven against a CHT root.
    ChtProof {
        section: u64,
        number: BlockNumber,
        cht_root: Hash,
    },
    /// A bloom bit vector proven against a bloom-trie root.
    BloomTrieProof {
        section: u64,
        bit: u32,
        bloom_trie_root: Hash,
    },
}

impl OdrQuery {
    pub fn kind(&self) -> RequestKind {
        match self {
            OdrQuery::Header { .. } => RequestKind::Headers,
            OdrQuery::BlockBody { .. } => RequestKind::Bodies,
            OdrQuery::Receipts { .. } => RequestKind::Receipts,
            OdrQuery::StateProof { .. } => RequestKind::StateProof,
            OdrQuery::ChtProof { .. } => RequestKind::ChtProof,
            OdrQuery::BloomTrieProof { .. } => RequestKind::BloomTrieProof,
        }
    }

    /// Trusted anchor the response is checked against.
    pub fn anchor(&self) -> Hash {
        match self {
            OdrQuery::Header { hash } => *hash,
            OdrQuery::BlockBody { tx_root, .. } => *tx_root,
            OdrQuery::Receipts { receipts_root, .. } => *receipts_root,
            OdrQuery::StateProof { state_root, .. } => *state_root,
            OdrQuery::ChtProof { cht_root, .. } => *cht_root,
            OdrQuery::BloomTrieProof {
                bloom_trie_root, ..
            } => *bloom_trie_root,
        }
    }

    /// Key proven under the anchor.
    pub fn proof_key(&self) -> Vec<u8> {
        match self {
            OdrQuery::Header { hash } => hash.as_bytes().to_vec(),
            OdrQuery::BlockBody { block_hash, .. } | OdrQuery::Receipts { block_hash, .. } => {
                block_hash.as_bytes().to_vec()
            }
            OdrQuery::StateProof { key, .. } => key.clone(),
            OdrQuery::ChtProof { number, .. } => number.0.to_be_bytes().to_vec(),
            OdrQuery::BloomTrieProof { section, bit, .. } => {
                let mut key = section.to_be_bytes().to_vec();
                key.extend_from_slice(&bit.to_be_bytes());
                key
            }
        }
    }

    /// Deduplication identity: kind plus hash of (anchor, key).
    pub fn id(&self) -> QueryId {
        let anchor = self.anchor();
        let key = self.proof_key();
        QueryId::new(
            self.kind(),
            Hash::from_parts(&[&anchor.as_bytes()[..], &key[..]]),
        )
    }

    /// Highest block a server must have to answer, if any.
    pub fn required_block(&self) -> Option<BlockNumber> {
        match self {
            OdrQuery::Header { .. } => None,
            OdrQuery::BlockBody { number, .. }
            | OdrQuery::Receipts { number, .. }
            | OdrQuery::StateProof { number, .. }
            | OdrQuery::ChtProof { number, .. } => Some(*number),
            OdrQuery::BloomTrieProof { section, .. } => Some(BlockNumber(
                section
                    .saturating_add(1)
                    .saturating_mul(BLOOM_TRIE_SECTION_SIZE)
                    .saturating_sub(1),
            )),
        }
    }

    pub fn payload(&self) -> RequestPayload {
        match self {
            OdrQuery::Header { hash } => RequestPayload::Header { hash: *hash },
            OdrQuery::BlockBody { block_hash, .. } => RequestPayload::Body {
                block_hash: *block_hash,
            },
            OdrQuery::Receipts { block_hash, .. } => RequestPayload::Receipts {
                block_hash: *block_hash,
            },
            OdrQuery::StateProof {
                state_root, key, ..
            } => RequestPayload::StateProof {
                state_root: *state_root,
                key: key.clone(),
            },
            OdrQuery::ChtProof {
                section, number, ..
            } => RequestPayload::ChtProof {
                section: *section,
                block_number: *number,
            },
            OdrQuery::BloomTrieProof { section, bit, .. } => RequestPayload::BloomTrieProof {
                section: *section,
                bit: *bit,
            },
        }
    }
}

/// Section a block belongs to in the canonical hash trie.
pub fn cht_section(number: BlockNumber) -> u64 {
    number.0 / CHT_SECTION_SIZE
}

/// An [`OdrQuery`] bound to the verification capability.
struct VerifiedQuery {
    query: OdrQuery,
    id: QueryId,
    verifier: Arc<dyn ProofVerifier>,
}

impl OdrRequest for VerifiedQuery {
    fn id(&self) -> QueryId {
        self.id
    }

    fn can_send(&self, peer: &PeerInfo) -> bool {
        match self.query.required_block() {
            Some(number) => peer.can_serve(self.id.kind, number),
            None => peer.serves(self.id.kind),
        }
    }

    fn cost(&self, peer: &PeerInfo) -> u64 {
        peer.costs.estimate(self.id.kind, 1)
    }

    fn payload(&self) -> RequestPayload {
        self.query.payload()
    }

    fn verify(&self, response: &[u8]) -> Result<Vec<u8>, ValidationError> {
        if response.is_empty() {
            return Err(ValidationError::Malformed("empty response".into()));
        }

        match &self.query {
            OdrQuery::Header { hash } => {
                let actual = Hash::from_bytes(response);
                if actual == *hash {
                    Ok(response.to_vec())
                } else {
                    Err(ValidationError::InvalidProof(format!(
                        "header hash {actual} does not match {hash}"
                    )))
                }
            }
            query => self
                .verifier
                .verify(response, &query.anchor(), &query.proof_key())
                .ok_or_else(|| {
                    ValidationError::InvalidProof(format!(
                        "{} proof does not verify against {}",
                        self.id.kind,
                        query.anchor()
                    ))
                }),
        }
    }
}

/// Entry point for on-demand retrieval.
#[derive(Clone)]
pub struct LightOdr {
    retriever: RetrieveManager,
    verifier: Arc<dyn ProofVerifier>,
    store: Arc<dyn KvStore>,
    cache_results: bool,
}

impl LightOdr {
    pub fn new(
        retriever: RetrieveManager,
        verifier: Arc<dyn ProofVerifier>,
        store: Arc<dyn KvStore>,
        cache_results: bool,
    ) -> Self {
        Self {
            retriever,
            verifier,
            store,
            cache_results,
        }
    }

    /// Retrieve the verified answer to `query`.
    ///
    /// With caching enabled, a previously verified answer is served from the
    /// byte-store without touching the network. A failure to write the cache
    /// is logged and otherwise ignored.
    pub async fn retrieve(
        &self,
        query: OdrQuery,
        deadline: Option<Instant>,
    ) -> Result<Vec<u8>, OdrError> {
        let id = query.id();
        let cache_key = keys::odr_result(&id);

        if self.cache_results {
            if let Some(value) = self.store.get(&cache_key)? {
                trace!(query = %id, "Served from local store");
                metrics::record_cache_hit(id.kind);
                return Ok(value);
            }
        }

        let request = Arc::new(VerifiedQuery {
            query,
            id,
            verifier: self.verifier.clone(),
        });
        let value = self.retriever.retrieve(request, deadline).await?;

        if self.cache_results {
            if let Err(e) = self.store.put(&cache_key, &value) {
                warn!(query = %id, error = %e, "Failed to cache retrieved value");
            }
        }
        Ok(value)
    }

    /// Header by hash.
    pub async fn header(&self, hash: Hash) -> Result<Vec<u8>, OdrError> {
        self.retrieve(OdrQuery::Header { hash }, None).await
    }

    /// Block body, proven against `tx_root`.
    pub async fn block_body(
        &self,
        block_hash: Hash,
        number: BlockNumber,
        tx_root: Hash,
    ) -> Result<Vec<u8>, OdrError> {
        self.retrieve(
            OdrQuery::BlockBody {
                block_hash,
                number,
                tx_root,
            },
            None,
        )
        .await
    }

    /// Receipt list, proven against `receipts_root`.
    pub async fn receipts(
        &self,
        block_hash: Hash,
        number: BlockNumber,
        receipts_root: Hash,
    ) -> Result<Vec<u8>, OdrError> {
        self.retrieve(
            OdrQuery::Receipts {
                block_hash,
                number,
                receipts_root,
            },
            None,
        )
        .await
    }

    /// State entry `key`, proven against `state_root` of block `number`.
    pub async fn state_proof(
        &self,
        state_root: Hash,
        number: BlockNumber,
        key: Vec<u8>,
    ) -> Result<Vec<u8>, OdrError> {
        self.retrieve(
            OdrQuery::StateProof {
                state_root,
                number,
                key,
            },
            None,
        )
        .await
    }

    /// Canonical hash of block `number`, proven against the CHT root of its
    /// section.
    pub async fn cht_proof(&self, number: BlockNumber, cht_root: Hash) -> Result<Vec<u8>, OdrError> {
        self.retrieve(
            OdrQuery::ChtProof {
                section: cht_section(number),
                number,
                cht_root,
            },
            None,
        )
        .await
    }

    /// Bloom bit vector for `bit` in `section`, proven against the bloom-trie
    /// root.
    pub async fn bloom_trie_proof(
        &self,
        section: u64,
        bit: u32,
        bloom_trie_root: Hash,
    ) -> Result<Vec<u8>, OdrError> {
        self.retrieve(
            OdrQuery::BloomTrieProof {
                section,
                bit,
                bloom_trie_root,
            },
            None,
        )
        .await
    }

    pub fn retriever(&self) -> &RetrieveManager {
        &self.retriever
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_peer, RecordingSender, TagVerifier};

    fn verified(query: OdrQuery) -> VerifiedQuery {
        VerifiedQuery {
            id: query.id(),
            query,
            verifier: Arc::new(TagVerifier),
        }
    }

    #[test]
    fn test_bloom_trie_required_block() {
        let query = |section| OdrQuery::BloomTrieProof {
            section,
            bit: 3,
            bloom_trie_root: Hash::from_bytes(b"bloom"),
        };
        assert_eq!(
            query(0).required_block(),
            Some(BlockNumber(BLOOM_TRIE_SECTION_SIZE - 1))
        );
        assert_eq!(
            query(2).required_block(),
            Some(BlockNumber(3 * BLOOM_TRIE_SECTION_SIZE - 1))
        );
        assert_eq!(
            query(u64::MAX).required_block(),
            Some(BlockNumber(u64::MAX - 1))
        );
    }

    #[test]
    fn test_query_identity() {
        let root = Hash::from_bytes(b"root");
        let a = OdrQuery::StateProof {
            state_root: root,
            number: BlockNumber(10),
            key: b"account".to_vec(),
        };
        let b = OdrQuery::StateProof {
            state_root: root,
            number: BlockNumber(10),
            key: b"other".to_vec(),
        };
        assert_eq!(a.id(), a.clone().id());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().kind, RequestKind::StateProof);
    }

    #[test]
    fn test_header_verified_by_hash() {
        let header = b"header-bytes".to_vec();
        let query = verified(OdrQuery::Header {
            hash: Hash::from_bytes(&header),
        });
        assert_eq!(query.verify(&header), Ok(header.clone()));
        assert!(matches!(
            query.verify(b"forged"),
            Err(ValidationError::InvalidProof(_))
        ));
        assert!(matches!(
            query.verify(&[]),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_proof_checked_against_anchor() {
        let root = Hash::from_bytes(b"receipts-root");
        let block_hash = Hash::from_bytes(b"block");
        let query = verified(OdrQuery::Receipts {
            block_hash,
            number: BlockNumber(5),
            receipts_root: root,
        });

        let proof = TagVerifier::prove(&root, block_hash.as_bytes(), b"receipts");
        assert_eq!(query.verify(&proof), Ok(b"receipts".to_vec()));

        let wrong_root = TagVerifier::prove(&Hash::from_bytes(b"x"), block_hash.as_bytes(), b"r");
        assert!(query.verify(&wrong_root).is_err());
    }

    #[test]
    fn test_can_send_requires_head() {
        let peer = test_peer(1, RecordingSender::new());
        let head = peer.info.head.number;
        let ahead = verified(OdrQuery::Receipts {
            block_hash: Hash::ZERO,
            number: BlockNumber(head.0 + 1),
            receipts_root: Hash::ZERO,
        });
        let behind = verified(OdrQuery::Receipts {
            block_hash: Hash::ZERO,
            number: head,
            receipts_root: Hash::ZERO,
        });
        assert!(!ahead.can_send(&peer.info));
        assert!(behind.can_send(&peer.info));
    }

    #[test]
    fn test_cht_section() {
        assert_eq!(cht_section(BlockNumber(0)), 0);
        assert_eq!(cht_section(BlockNumber(CHT_SECTION_SIZE - 1)), 0);
        assert_eq!(cht_section(BlockNumber(CHT_SECTION_SIZE)), 1);
    }
}
