//! Test fixtures shared by the unit tests.

use crate::distributor::DistRequest;
use crate::error::{TransportError, ValidationError};
use crate::message::{RequestPayload, WireRequest};
use crate::odr::ProofVerifier;
use crate::peer_set::{Peer, PeerInfo, PeerSender};
use crate::retriever::{OdrRequest, QueryId};
use lightclient_types::{ChainHead, Hash, PeerId, RequestKind};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Records every request sent to any test peer.
#[derive(Default)]
pub struct RecordingSender {
    queues: Mutex<HashMap<PeerId, VecDeque<WireRequest>>>,
    total: Mutex<usize>,
    failing: Mutex<HashSet<PeerId>>,
    notify: Notify,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make sends to `peer` fail with [`TransportError::Closed`].
    pub fn fail_sends_to(&self, peer: PeerId) {
        self.failing.lock().insert(peer);
    }

    /// Total successful sends so far.
    pub fn sent_count(&self) -> usize {
        *self.total.lock()
    }

    /// Wait for the next request sent to `peer` and consume it.
    pub async fn next_for(&self, peer: PeerId) -> WireRequest {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let notified = self.notify.notified();
            if let Some(request) = self.queues.lock().get_mut(&peer).and_then(|q| q.pop_front()) {
                return request;
            }
            tokio::time::timeout_at(deadline, notified)
                .await
                .unwrap_or_else(|_| panic!("no request sent to {peer}"));
        }
    }

    fn record(&self, peer: PeerId, request: WireRequest) -> Result<(), TransportError> {
        if self.failing.lock().contains(&peer) {
            return Err(TransportError::Closed);
        }
        self.queues.lock().entry(peer).or_default().push_back(request);
        *self.total.lock() += 1;
        self.notify.notify_waiters();
        Ok(())
    }
}

struct TaggedSender {
    peer: PeerId,
    inner: Arc<RecordingSender>,
}

impl PeerSender for TaggedSender {
    fn send(&self, request: WireRequest) -> Result<(), TransportError> {
        self.inner.record(self.peer, request)
    }
}

/// A peer serving every kind with head at block 1000.
pub fn test_peer(index: u8, sender: Arc<RecordingSender>) -> Peer {
    let id = PeerId([index; 32]);
    let addr = SocketAddr::from(([10, 0, 0, index], 30303));
    let head = ChainHead::new(Hash::from_bytes(&[index]), 1000, 1000);
    Peer::new(
        PeerInfo::new(id, addr, 2, head),
        Arc::new(TaggedSender { peer: id, inner: sender }),
    )
}

/// Distributable receipts request whose only valid answer is
/// [`TestRequest::valid_response`].
pub struct TestRequest {
    key: u8,
}

impl TestRequest {
    pub fn new(key: u8) -> Self {
        Self { key }
    }

    pub fn valid_response(key: u8) -> Vec<u8> {
        vec![key; 4]
    }
}

impl DistRequest for TestRequest {
    fn kind(&self) -> RequestKind {
        RequestKind::Receipts
    }

    fn can_send(&self, peer: &PeerInfo) -> bool {
        peer.serves(RequestKind::Receipts)
    }

    fn cost(&self, peer: &PeerInfo) -> u64 {
        peer.costs.estimate(RequestKind::Receipts, 1)
    }

    fn payload(&self) -> RequestPayload {
        RequestPayload::Receipts {
            block_hash: Hash::from_bytes(&[self.key]),
        }
    }

    fn validate(&self, response: &[u8]) -> Result<Vec<u8>, ValidationError> {
        if response == Self::valid_response(self.key).as_slice() {
            Ok(response.to_vec())
        } else {
            Err(ValidationError::InvalidProof("unexpected bytes".into()))
        }
    }
}

/// Retriever-level counterpart of [`TestRequest`].
pub struct TestQuery {
    key: u8,
    kind: RequestKind,
    servable: bool,
}

impl TestQuery {
    pub fn new(key: u8) -> Self {
        Self {
            key,
            kind: RequestKind::Receipts,
            servable: true,
        }
    }

    /// A query no peer is able to serve.
    pub fn unservable(mut self) -> Self {
        self.servable = false;
        self
    }

    pub fn valid_response(key: u8) -> Vec<u8> {
        TestRequest::valid_response(key)
    }
}

impl OdrRequest for TestQuery {
    fn id(&self) -> QueryId {
        QueryId::new(self.kind, Hash::from_bytes(&[self.key]))
    }

    fn can_send(&self, peer: &PeerInfo) -> bool {
        self.servable && peer.serves(self.kind)
    }

    fn cost(&self, _peer: &PeerInfo) -> u64 {
        0
    }

    fn payload(&self) -> RequestPayload {
        RequestPayload::Receipts {
            block_hash: Hash::from_bytes(&[self.key]),
        }
    }

    fn verify(&self, response: &[u8]) -> Result<Vec<u8>, ValidationError> {
        TestRequest::new(self.key).validate(response)
    }
}

/// Proof format for tests: `value || H(root, key, value)`.
pub struct TagVerifier;

impl TagVerifier {
    pub fn prove(root: &Hash, key: &[u8], value: &[u8]) -> Vec<u8> {
        let tag = Hash::from_parts(&[&root.as_bytes()[..], key, value]);
        let mut proof = value.to_vec();
        proof.extend_from_slice(tag.as_bytes());
        proof
    }
}

impl ProofVerifier for TagVerifier {
    fn verify(&self, proof: &[u8], root: &Hash, key: &[u8]) -> Option<Vec<u8>> {
        let split = proof.len().checked_sub(32)?;
        let (value, tag) = proof.split_at(split);
        let expected = Hash::from_parts(&[&root.as_bytes()[..], key, value]);
        (expected.as_bytes()[..] == *tag).then(|| value.to_vec())
    }
}
