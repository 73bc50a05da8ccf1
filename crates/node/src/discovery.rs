//! Discovery integration.
//!
//! Finding candidate addresses is the transport's job. This module names the
//! topic servers advertise under and orders candidates for dialing using the
//! server ranking.

use lightclient_odr::ServerRanking;
use lightclient_types::Hash;
use std::net::SocketAddr;

/// Light protocol version 1.
pub const LPV1: u32 = 1;
/// Light protocol version 2.
pub const LPV2: u32 = 2;

/// Protocol versions this node speaks, newest first.
pub const SUPPORTED_VERSIONS: [u32; 2] = [LPV2, LPV1];

/// Source of candidate server addresses.
pub trait Discovery: Send + Sync {
    /// Addresses currently advertising `topic`.
    fn candidates(&self, topic: &str) -> Vec<SocketAddr>;
}

/// Discovery topic servers of `version` on the chain with `genesis` advertise.
///
/// Returns `None` for unsupported versions.
pub fn discovery_topic(genesis: &Hash, version: u32) -> Option<String> {
    let name = match version {
        LPV1 => "LES",
        LPV2 => "LES2",
        _ => return None,
    };
    Some(format!("{}@{}", name, hex::encode(&genesis.as_bytes()[..8])))
}

/// Candidates for every supported version, best-ranked first, deduplicated.
pub fn dial_order(
    discovery: &dyn Discovery,
    genesis: &Hash,
    ranking: &ServerRanking,
) -> Vec<SocketAddr> {
    let mut seen = std::collections::HashSet::new();
    let candidates: Vec<SocketAddr> = SUPPORTED_VERSIONS
        .iter()
        .filter_map(|version| discovery_topic(genesis, *version))
        .flat_map(|topic| discovery.candidates(&topic))
        .filter(|addr| seen.insert(*addr))
        .collect();
    ranking.dial_order(candidates)
}
