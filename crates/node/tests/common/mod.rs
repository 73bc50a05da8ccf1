//! Scripted mock servers and a node harness for integration tests.

#![allow(dead_code)]

use lightclient_node::discovery::LPV2;
use lightclient_node::LightNode;
use lightclient_odr::{
    DistributorHandle, MemoryStore, OdrConfig, OdrQuery, Peer, PeerInfo, PeerSender,
    ProofVerifier, RequestPayload, TransportError, WireRequest,
};
use lightclient_types::{ChainHead, Hash, PeerId, RequestId, RequestKind};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Head block every mock server starts at.
pub const SERVER_HEAD: u64 = 10_000;

/// Proof scheme used by the mocks: `value || H(root, key, value)`.
pub struct MockVerifier;

pub fn prove(root: &Hash, key: &[u8], value: &[u8]) -> Vec<u8> {
    let tag = Hash::from_parts(&[&root.as_bytes()[..], key, value]);
    let mut proof = value.to_vec();
    proof.extend_from_slice(tag.as_bytes());
    proof
}

impl ProofVerifier for MockVerifier {
    fn verify(&self, proof: &[u8], root: &Hash, key: &[u8]) -> Option<Vec<u8>> {
        let split = proof.len().checked_sub(32)?;
        let (value, tag) = proof.split_at(split);
        let expected = Hash::from_parts(&[&root.as_bytes()[..], key, value]);
        (expected.as_bytes()[..] == *tag).then(|| value.to_vec())
    }
}

/// Correct responses known to honest servers.
#[derive(Clone, Default)]
pub struct Answers(Arc<Mutex<Vec<(RequestPayload, Vec<u8>)>>>);

impl Answers {
    /// Teach honest servers the answer to `query`.
    pub fn add(&self, query: &OdrQuery, value: &[u8]) {
        let response = match query {
            OdrQuery::Header { .. } => value.to_vec(),
            q => prove(&q.anchor(), &q.proof_key(), value),
        };
        self.0.lock().unwrap().push((query.payload(), response));
    }

    fn lookup(&self, payload: &RequestPayload) -> Option<Vec<u8>> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .find(|(p, _)| p == payload)
            .map(|(_, r)| r.clone())
    }
}

/// How a mock server reacts to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Answers correctly.
    Valid,
    /// Answers with bytes that fail verification.
    Invalid,
    /// Never answers.
    Silent,
    /// Drops the connection instead of answering.
    Disconnect,
}

/// What a mock server observed.
#[derive(Default)]
pub struct ServerStats {
    pub received: AtomicUsize,
    /// Requests received for a kind while one of that kind was unanswered.
    pub overlaps: AtomicUsize,
    in_progress: Mutex<HashMap<RequestKind, RequestId>>,
}

impl ServerStats {
    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn start(&self, kind: RequestKind, id: RequestId) {
        self.received.fetch_add(1, Ordering::SeqCst);
        if self.in_progress.lock().unwrap().insert(kind, id).is_some() {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn finish(&self, kind: RequestKind) {
        self.in_progress.lock().unwrap().remove(&kind);
    }
}

struct MockServer {
    id: PeerId,
    behavior: Behavior,
    delay: Duration,
    answers: Answers,
    distributor: DistributorHandle,
    stats: Arc<ServerStats>,
}

impl PeerSender for MockServer {
    fn send(&self, request: WireRequest) -> Result<(), TransportError> {
        let kind = request.kind();
        self.stats.start(kind, request.id);

        let (id, behavior, delay) = (self.id, self.behavior, self.delay);
        let answers = self.answers.clone();
        let distributor = self.distributor.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match behavior {
                Behavior::Valid => {
                    let data = answers.lookup(&request.payload).unwrap_or_default();
                    stats.finish(kind);
                    let _ = distributor.deliver_response(id, request.id, data).await;
                }
                Behavior::Invalid => {
                    stats.finish(kind);
                    let _ = distributor
                        .deliver_response(id, request.id, b"forged proof".to_vec())
                        .await;
                }
                Behavior::Silent => {}
                Behavior::Disconnect => {
                    stats.finish(kind);
                    let _ = distributor.unregister_peer(id).await;
                }
            }
        });
        Ok(())
    }
}

/// Handle to a registered mock server.
pub struct ServerHandle {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub stats: Arc<ServerStats>,
}

/// A light node backed by an in-memory store.
pub struct TestNode {
    pub node: LightNode,
    pub answers: Answers,
    pub store: Arc<MemoryStore>,
}

impl TestNode {
    pub fn start(config: OdrConfig) -> Self {
        Self::start_with_store(config, Arc::new(MemoryStore::new()))
    }

    pub fn start_with_store(config: OdrConfig, store: Arc<MemoryStore>) -> Self {
        let node = LightNode::start(config, store.clone(), Arc::new(MockVerifier)).unwrap();
        Self {
            node,
            answers: Answers::default(),
            store,
        }
    }

    /// Register a mock server answering after `delay`.
    pub async fn add_server(&self, index: u8, behavior: Behavior, delay: Duration) -> ServerHandle {
        let id = PeerId::from_key(&[index]);
        let addr = SocketAddr::from(([127, 0, 0, 1], 30_000 + index as u16));
        let stats = Arc::new(ServerStats::default());
        let head = ChainHead::new(Hash::from_bytes(&[index]), SERVER_HEAD, SERVER_HEAD as u128);

        let server = MockServer {
            id,
            behavior,
            delay,
            answers: self.answers.clone(),
            distributor: self.node.distributor().clone(),
            stats: stats.clone(),
        };
        let peer = Peer::new(PeerInfo::new(id, addr, LPV2, head), Arc::new(server));
        self.node.on_peer_connected(peer).await.unwrap();

        ServerHandle { id, addr, stats }
    }

    /// Wait until no request is assigned to any peer.
    pub async fn wait_idle(&self) {
        for _ in 0..200 {
            if self.node.status().await.unwrap().distributor.in_flight == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("peers still busy");
    }
}

/// A receipts query for block `n` whose answer is `receipts-n`.
pub fn receipts_query(n: u64) -> (OdrQuery, Vec<u8>) {
    let query = OdrQuery::Receipts {
        block_hash: Hash::from_bytes(format!("block-{n}").as_bytes()),
        number: lightclient_types::BlockNumber(n),
        receipts_root: Hash::from_bytes(format!("receipts-root-{n}").as_bytes()),
    };
    (query, format!("receipts-{n}").into_bytes())
}

/// A state query for account `n` whose answer is `account-n`.
pub fn state_query(n: u64) -> (OdrQuery, Vec<u8>) {
    let query = OdrQuery::StateProof {
        state_root: Hash::from_bytes(b"state-root"),
        number: lightclient_types::BlockNumber(SERVER_HEAD),
        key: format!("account-key-{n}").into_bytes(),
    };
    (query, format!("account-{n}").into_bytes())
}
