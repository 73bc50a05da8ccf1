//! On-demand retrieval for light clients.
//!
//! A light node holds only headers. Everything else (state entries, receipts,
//! block bodies, CHT and bloom-trie proofs) is fetched from servers on demand
//! and verified against a locally trusted anchor before use.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  domain code                                                            │
//! │      │ LightOdr::retrieve(query)         cache hit ──► byte-store       │
//! │      ▼                                                                  │
//! │  RetrieveManager   one entry per QueryId, N waiters, one result         │
//! │      │ queue(DistRequest)                                               │
//! │      ▼                                                                  │
//! │  RequestDistributor (single task)                                       │
//! │    ├─ PeerSet        busy/idle per (peer, kind)                         │
//! │    ├─ ServerRanking  decayed success/failure/latency per address        │
//! │    └─ TimerManager   per-attempt timeout, per-request deadline          │
//! │      │ PeerSender::send(WireRequest)                                    │
//! │      ▼                                                                  │
//! │  transport ──► DistributorHandle::deliver_response / unregister_peer   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The distributor task is the only writer of peer and request state; all
//! other components reach it through [`DistributorHandle`].

pub mod config;
pub mod distributor;
pub mod error;
pub mod message;
pub mod metrics;
mod odr;
pub mod peer_set;
pub mod ranking;
pub mod retriever;
pub mod storage;
mod timers;

#[cfg(test)]
mod test_utils;

pub use config::{
    DistributorConfig, OdrConfig, RankingConfig, RetrieverConfig, SelectionCriterion,
    SelectionPolicy,
};
pub use distributor::{
    Delivered, DistRequest, DistResult, DistributorHandle, DistributorStatus, QueuedRequest,
    RequestDistributor, ShutdownHandle,
};
pub use error::{ControlError, DistError, OdrError, PeerSetError, TransportError, ValidationError};
pub use message::{RequestPayload, WireRequest};
pub use odr::{
    cht_section, LightOdr, OdrQuery, ProofVerifier, BLOOM_TRIE_SECTION_SIZE, CHT_SECTION_SIZE,
};
pub use peer_set::{CostTable, Peer, PeerInfo, PeerSender, PeerSet, RequestCost};
pub use ranking::{PeerScore, ServerRanking, NEUTRAL_SCORE};
pub use retriever::{OdrRequest, QueryId, RetrieveManager, RetrieverStatus};
pub use storage::{KvStore, MemoryStore, StorageError};
