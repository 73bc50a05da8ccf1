//! Registry of connected servers and their per-kind busy state.
//!
//! A server answers requests of one kind in order on a single stream, so each
//! peer may have at most one outstanding request per [`RequestKind`]. The
//! registry is the single place that enforces this: [`PeerSet::mark_busy`]
//! refuses a second assignment with [`PeerSetError::AlreadyBusy`].
//!
//! The registry is a plain synchronous structure. It is owned by the
//! distributor task, which is its only writer.

use crate::error::{PeerSetError, TransportError};
use crate::message::WireRequest;
use lightclient_types::{BlockNumber, ChainHead, PeerId, RequestId, RequestKind};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace};

/// Send handle for one connected peer.
///
/// `send` must not block: implementations hand the request to the peer's
/// writer task (e.g. via a channel) and return.
pub trait PeerSender: Send + Sync + 'static {
    fn send(&self, request: WireRequest) -> Result<(), TransportError>;
}

/// Advertised cost of one request kind: `base + per_item * items`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestCost {
    pub base: u64,
    pub per_item: u64,
}

/// Per-kind request costs a server announced in its handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CostTable {
    costs: HashMap<RequestKind, RequestCost>,
}

impl CostTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cost of one kind.
    pub fn with(mut self, kind: RequestKind, base: u64, per_item: u64) -> Self {
        self.costs.insert(kind, RequestCost { base, per_item });
        self
    }

    /// Estimated cost of a request for `items` items. Kinds the server did not
    /// price are free.
    pub fn estimate(&self, kind: RequestKind, items: u64) -> u64 {
        self.costs
            .get(&kind)
            .map(|c| c.base.saturating_add(c.per_item.saturating_mul(items)))
            .unwrap_or(0)
    }
}

/// What we know about a connected server.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Stable network identity.
    pub id: PeerId,
    /// Dial address; ranking statistics are keyed by it.
    pub addr: SocketAddr,
    /// Negotiated protocol version.
    pub protocol_version: u32,
    /// Advertised chain head.
    pub head: ChainHead,
    /// Request kinds this server is willing to serve.
    pub serves: BTreeSet<RequestKind>,
    /// Advertised request costs.
    pub costs: CostTable,
}

impl PeerInfo {
    /// A server that serves every request kind at no advertised cost.
    pub fn new(id: PeerId, addr: SocketAddr, protocol_version: u32, head: ChainHead) -> Self {
        Self {
            id,
            addr,
            protocol_version,
            head,
            serves: RequestKind::ALL.into_iter().collect(),
            costs: CostTable::default(),
        }
    }

    /// Restrict the kinds this server serves.
    pub fn with_serves(mut self, kinds: impl IntoIterator<Item = RequestKind>) -> Self {
        self.serves = kinds.into_iter().collect();
        self
    }

    /// Set the advertised cost table.
    pub fn with_costs(mut self, costs: CostTable) -> Self {
        self.costs = costs;
        self
    }

    /// Whether this server serves `kind`.
    pub fn serves(&self, kind: RequestKind) -> bool {
        self.serves.contains(&kind)
    }

    /// Whether this server serves `kind` and its head covers `number`.
    pub fn can_serve(&self, kind: RequestKind, number: BlockNumber) -> bool {
        self.serves(kind) && self.head.covers(number)
    }
}

/// A connected peer: its metadata plus its send handle.
#[derive(Clone)]
pub struct Peer {
    pub info: PeerInfo,
    pub sender: Arc<dyn PeerSender>,
}

impl Peer {
    pub fn new(info: PeerInfo, sender: Arc<dyn PeerSender>) -> Self {
        Self { info, sender }
    }

    pub fn id(&self) -> PeerId {
        self.info.id
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer").field("info", &self.info).finish()
    }
}

struct PeerEntry {
    peer: Peer,
    /// Outstanding request per kind.
    busy: HashMap<RequestKind, RequestId>,
    /// Registration sequence number, for deterministic ordering.
    seq: u64,
}

/// Connected peers and their busy/idle state per request kind.
#[derive(Default)]
pub struct PeerSet {
    peers: HashMap<PeerId, PeerEntry>,
    next_seq: u64,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer after its handshake completed. It starts idle for every
    /// kind.
    pub fn register(&mut self, peer: Peer) -> Result<(), PeerSetError> {
        let id = peer.id();
        if self.peers.contains_key(&id) {
            return Err(PeerSetError::AlreadyRegistered(id));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        debug!(peer = %id, addr = %peer.info.addr, seq, "Registered peer");
        self.peers.insert(
            id,
            PeerEntry {
                peer,
                busy: HashMap::new(),
                seq,
            },
        );
        Ok(())
    }

    /// Remove a peer.
    ///
    /// Returns the requests that were outstanding on it, so the caller can fail
    /// them over to other peers immediately instead of waiting for a timeout.
    pub fn unregister(
        &mut self,
        id: &PeerId,
    ) -> Result<Vec<(RequestKind, RequestId)>, PeerSetError> {
        let entry = self
            .peers
            .remove(id)
            .ok_or(PeerSetError::UnknownPeer(*id))?;

        let mut outstanding: Vec<(RequestKind, RequestId)> = entry.busy.into_iter().collect();
        outstanding.sort();
        debug!(
            peer = %id,
            outstanding = outstanding.len(),
            "Unregistered peer"
        );
        Ok(outstanding)
    }

    /// Idle peers that serve `kind`, in registration order.
    pub fn peers_serving(&self, kind: RequestKind) -> Vec<&PeerInfo> {
        let mut idle: Vec<&PeerEntry> = self
            .peers
            .values()
            .filter(|e| e.peer.info.serves(kind) && !e.busy.contains_key(&kind))
            .collect();
        idle.sort_by_key(|e| e.seq);
        idle.into_iter().map(|e| &e.peer.info).collect()
    }

    /// All connected peers, busy or not, in registration order.
    pub fn connected(&self) -> Vec<&PeerInfo> {
        let mut all: Vec<&PeerEntry> = self.peers.values().collect();
        all.sort_by_key(|e| e.seq);
        all.into_iter().map(|e| &e.peer.info).collect()
    }

    /// Mark `id` as serving `request` of `kind`.
    pub fn mark_busy(
        &mut self,
        id: &PeerId,
        kind: RequestKind,
        request: RequestId,
    ) -> Result<(), PeerSetError> {
        let entry = self
            .peers
            .get_mut(id)
            .ok_or(PeerSetError::UnknownPeer(*id))?;

        if entry.busy.contains_key(&kind) {
            return Err(PeerSetError::AlreadyBusy { peer: *id, kind });
        }

        entry.busy.insert(kind, request);
        trace!(peer = %id, kind = kind.as_str(), %request, "Peer busy");
        Ok(())
    }

    /// Mark `id` as idle for `kind`, returning the request it was serving.
    pub fn mark_idle(&mut self, id: &PeerId, kind: RequestKind) -> Result<RequestId, PeerSetError> {
        let entry = self
            .peers
            .get_mut(id)
            .ok_or(PeerSetError::UnknownPeer(*id))?;

        let request = entry
            .busy
            .remove(&kind)
            .ok_or(PeerSetError::NotBusy { peer: *id, kind })?;
        trace!(peer = %id, kind = kind.as_str(), %request, "Peer idle");
        Ok(request)
    }

    /// Whether `id` has an outstanding request of `kind`.
    pub fn is_busy(&self, id: &PeerId, kind: RequestKind) -> bool {
        self.assigned(id, kind).is_some()
    }

    /// The request `id` is currently serving for `kind`, if any.
    pub fn assigned(&self, id: &PeerId, kind: RequestKind) -> Option<RequestId> {
        self.peers.get(id).and_then(|e| e.busy.get(&kind).copied())
    }

    /// Update a peer's advertised head after an announcement.
    pub fn update_head(&mut self, id: &PeerId, head: ChainHead) -> Result<(), PeerSetError> {
        let entry = self
            .peers
            .get_mut(id)
            .ok_or(PeerSetError::UnknownPeer(*id))?;
        entry.peer.info.head = head;
        Ok(())
    }

    pub fn get(&self, id: &PeerId) -> Option<&Peer> {
        self.peers.get(id).map(|e| &e.peer)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// Total outstanding requests across all peers and kinds.
    pub fn in_flight(&self) -> usize {
        self.peers.values().map(|e| e.busy.len()).sum()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
