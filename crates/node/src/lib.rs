//! Light node runtime.
//!
//! Wires the on-demand retrieval engine to the rest of a light node:
//!
//! - [`LightNode`]: lifecycle (start, stop, periodic ranking flush) and the
//!   transport hooks the networking layer calls
//! - [`RocksDbStore`]: persistent byte-store for rankings and cached results
//! - [`discovery`]: discovery topics and dial ordering
//! - [`telemetry`]: logging initialization and metrics rendering
//!
//! # Example
//!
//! ```no_run
//! use lightclient_node::{LightNode, RocksDbStore};
//! use lightclient_odr::{OdrConfig, ProofVerifier};
//! use lightclient_types::Hash;
//! use std::sync::Arc;
//!
//! struct TrieVerifier;
//!
//! impl ProofVerifier for TrieVerifier {
//!     fn verify(&self, _proof: &[u8], _root: &Hash, _key: &[u8]) -> Option<Vec<u8>> {
//!         None
//!     }
//! }
//!
//! # async fn run() -> Result<(), lightclient_node::NodeError> {
//! let store = Arc::new(RocksDbStore::open("/var/lib/lightclient")?);
//! let node = LightNode::start(OdrConfig::for_wan(), store, Arc::new(TrieVerifier))?;
//!
//! // Transport calls node.on_peer_connected / on_response / on_peer_disconnected.
//! let header = node.odr().header(Hash::from_bytes(b"header")).await;
//!
//! node.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod discovery;
mod error;
mod node;
mod storage;
pub mod telemetry;

pub use error::NodeError;
pub use node::{LightNode, NodeStatus};
pub use storage::{CompressionType, RocksDbConfig, RocksDbStore};
