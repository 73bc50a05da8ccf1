//! Retrieve manager.
//!
//! Wraps domain queries into distributable requests and deduplicates
//! concurrent identical queries. The first caller for a [`QueryId`] creates
//! the pending entry and a driver task that runs the request through the
//! distributor; later callers only join the entry's waiter list. Every waiter
//! receives a clone of the one result.
//!
//! The distributor request is kept alive until the latest deadline among the
//! waiters. A caller that gives up (deadline or dropped future) only removes
//! its own waiter. When the last waiter leaves, the entry is removed and the
//! distributor request is cancelled; an attempt already on the wire is allowed
//! to finish and its answer is discarded.

use crate::config::RetrieverConfig;
use crate::distributor::{DistRequest, DistributorHandle};
use crate::error::{OdrError, ValidationError};
use crate::message::RequestPayload;
use crate::metrics;
use crate::peer_set::PeerInfo;
use lightclient_types::{Hash, RequestId, RequestKind};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Identity of a query for deduplication: request kind plus a content key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId {
    pub kind: RequestKind,
    pub key: Hash,
}

impl QueryId {
    pub fn new(kind: RequestKind, key: Hash) -> Self {
        Self { kind, key }
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.key)
    }
}

/// A verifiable domain query.
pub trait OdrRequest: Send + Sync + 'static {
    /// Deduplication identity.
    fn id(&self) -> QueryId;

    /// Whether `peer` can answer this query.
    fn can_send(&self, peer: &PeerInfo) -> bool;

    /// Estimated cost of asking `peer`.
    fn cost(&self, peer: &PeerInfo) -> u64;

    /// Request to put on the wire.
    fn payload(&self) -> RequestPayload;

    /// Check a raw response against the locally trusted anchor and extract
    /// the value. Runs on the distributor loop; must not block.
    fn verify(&self, response: &[u8]) -> Result<Vec<u8>, ValidationError>;
}

/// Adapts an [`OdrRequest`] to the distributor.
struct OdrDistRequest {
    query: Arc<dyn OdrRequest>,
    kind: RequestKind,
}

impl DistRequest for OdrDistRequest {
    fn kind(&self) -> RequestKind {
        self.kind
    }

    fn can_send(&self, peer: &PeerInfo) -> bool {
        self.query.can_send(peer)
    }

    fn cost(&self, peer: &PeerInfo) -> u64 {
        self.query.cost(peer)
    }

    fn payload(&self) -> RequestPayload {
        self.query.payload()
    }

    fn validate(&self, response: &[u8]) -> Result<Vec<u8>, ValidationError> {
        self.query.verify(response)
    }
}

type Waiter = oneshot::Sender<Result<Vec<u8>, OdrError>>;

struct PendingEntry {
    /// Distinguishes this entry from a later one with the same identity.
    generation: u64,
    /// Distributor request, once queued.
    request_id: Option<RequestId>,
    /// Latest deadline among the waiters; bounds the network request.
    deadline: Instant,
    waiters: HashMap<u64, Waiter>,
}

/// Snapshot of retriever state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetrieverStatus {
    /// Distinct queries in flight.
    pub pending: usize,
    /// Callers waiting on them.
    pub waiters: usize,
}

struct Inner {
    distributor: DistributorHandle,
    config: RetrieverConfig,
    pending: Mutex<HashMap<QueryId, PendingEntry>>,
    next_waiter: AtomicU64,
    next_generation: AtomicU64,
}

/// Deduplicating front-end of the distributor.
#[derive(Clone)]
pub struct RetrieveManager {
    inner: Arc<Inner>,
}

impl RetrieveManager {
    pub fn new(distributor: DistributorHandle, config: RetrieverConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                distributor,
                config,
                pending: Mutex::new(HashMap::new()),
                next_waiter: AtomicU64::new(0),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Retrieve and verify the answer to `request`.
    ///
    /// Without an explicit deadline the configured default applies. The
    /// network request of a shared query lives until the latest deadline of
    /// its waiters, so an early deadline only ends that caller's wait.
    pub async fn retrieve(
        &self,
        request: Arc<dyn OdrRequest>,
        deadline: Option<Instant>,
    ) -> Result<Vec<u8>, OdrError> {
        let id = request.id();
        let deadline =
            deadline.unwrap_or_else(|| Instant::now() + self.inner.config.default_timeout);
        let waiter = self.inner.next_waiter.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let (generation, fresh, extend) = {
            let mut pending = self.inner.pending.lock();
            match pending.get_mut(&id) {
                Some(entry) => {
                    entry.waiters.insert(waiter, tx);
                    let extend = if deadline > entry.deadline {
                        entry.deadline = deadline;
                        entry.request_id
                    } else {
                        None
                    };
                    (entry.generation, false, extend)
                }
                None => {
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                    pending.insert(
                        id,
                        PendingEntry {
                            generation,
                            request_id: None,
                            deadline,
                            waiters: HashMap::from([(waiter, tx)]),
                        },
                    );
                    (generation, true, None)
                }
            }
        };

        if fresh {
            debug!(query = %id, "Starting retrieval");
            metrics::record_odr_started(id.kind);
            tokio::spawn(drive(
                self.inner.clone(),
                id,
                generation,
                request,
                deadline,
            ));
        } else {
            debug!(query = %id, "Joining in-flight retrieval");
            metrics::record_deduplicated(id.kind);
        }
        if let Some(request_id) = extend {
            self.inner.distributor.extend_deadline(request_id, deadline);
        }

        let _guard = WaiterGuard {
            inner: &self.inner,
            id,
            generation,
            waiter,
        };

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OdrError::Shutdown),
            Err(_) => {
                debug!(query = %id, "Caller deadline elapsed");
                Err(OdrError::Timeout)
            }
        }
    }

    /// Snapshot of in-flight queries.
    pub fn status(&self) -> RetrieverStatus {
        let pending = self.inner.pending.lock();
        RetrieverStatus {
            pending: pending.len(),
            waiters: pending.values().map(|e| e.waiters.len()).sum(),
        }
    }

    /// Whether a query with this identity is in flight.
    pub fn is_pending(&self, id: &QueryId) -> bool {
        self.inner.pending.lock().contains_key(id)
    }

    pub fn distributor(&self) -> &DistributorHandle {
        &self.inner.distributor
    }
}

/// Runs one query through the distributor and resolves its waiters.
async fn drive(
    inner: Arc<Inner>,
    id: QueryId,
    generation: u64,
    query: Arc<dyn OdrRequest>,
    deadline: Instant,
) {
    let started = Instant::now();
    let request = Box::new(OdrDistRequest {
        query,
        kind: id.kind,
    });

    let outcome = match inner.distributor.queue(request, deadline).await {
        Ok(queued) => {
            let wanted = {
                let mut pending = inner.pending.lock();
                match pending.get_mut(&id) {
                    Some(entry) if entry.generation == generation => {
                        entry.request_id = Some(queued.id);
                        Some(entry.deadline)
                    }
                    _ => None,
                }
            };
            match wanted {
                // A later caller joined before the request id was known.
                Some(latest) if latest > deadline => {
                    inner.distributor.extend_deadline(queued.id, latest)
                }
                Some(_) => {}
                // Every waiter left before the request id was known.
                None => inner.distributor.cancel(queued.id),
            }
            queued
                .wait()
                .await
                .map(|delivered| delivered.value)
                .map_err(OdrError::from)
        }
        Err(e) => Err(OdrError::from(e)),
    };

    match &outcome {
        Ok(_) => metrics::record_odr_completed(id.kind, started.elapsed().as_secs_f64()),
        Err(e) => metrics::record_odr_failed(id.kind, failure_reason(e)),
    }

    let waiters = {
        let mut pending = inner.pending.lock();
        match pending.get(&id) {
            Some(entry) if entry.generation == generation => {
                pending.remove(&id).map(|e| e.waiters).unwrap_or_default()
            }
            _ => HashMap::new(),
        }
    };

    trace!(query = %id, waiters = waiters.len(), ok = outcome.is_ok(), "Retrieval finished");
    for (_, waiter) in waiters {
        let _ = waiter.send(outcome.clone());
    }
}

fn failure_reason(err: &OdrError) -> &'static str {
    match err {
        OdrError::NoPeers { .. } => "no_peers",
        OdrError::Timeout => "timeout",
        OdrError::Cancelled => "cancelled",
        OdrError::Shutdown => "shutdown",
        OdrError::Storage(_) => "storage",
    }
}

/// Removes a caller's waiter when it stops waiting, for whatever reason.
struct WaiterGuard<'a> {
    inner: &'a Inner,
    id: QueryId,
    generation: u64,
    waiter: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let cancel = {
            let mut pending = self.inner.pending.lock();
            let Some(entry) = pending.get_mut(&self.id) else {
                return;
            };
            if entry.generation != self.generation || entry.waiters.remove(&self.waiter).is_none()
            {
                return;
            }
            if !entry.waiters.is_empty() {
                return;
            }
            pending.remove(&self.id).and_then(|e| e.request_id)
        };

        debug!(query = %self.id, "Last waiter left, cancelling retrieval");
        if let Some(request_id) = cancel {
            self.inner.distributor.cancel(request_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DistributorConfig, RankingConfig};
    use crate::distributor::{RequestDistributor, ShutdownHandle};
    use crate::ranking::ServerRanking;
    use crate::storage::MemoryStore;
    use crate::test_utils::{test_peer, RecordingSender, TestQuery};
    use std::time::Duration;

    async fn setup() -> (RetrieveManager, Arc<RecordingSender>, ShutdownHandle) {
        let ranking = Arc::new(ServerRanking::new(
            RankingConfig::default(),
            Arc::new(MemoryStore::new()),
        ));
        let (distributor, handle, shutdown) =
            RequestDistributor::new(DistributorConfig::default(), ranking);
        tokio::spawn(distributor.run());

        let sender = RecordingSender::new();
        handle
            .register_peer(test_peer(1, sender.clone()))
            .await
            .unwrap();
        (
            RetrieveManager::new(handle, RetrieverConfig::default()),
            sender,
            shutdown,
        )
    }

    #[tokio::test]
    async fn test_concurrent_queries_share_one_send() {
        let (retriever, sender, _shutdown) = setup().await;
        let peer = test_peer(1, sender.clone()).id();

        let mut callers = Vec::new();
        for _ in 0..10 {
            let retriever = retriever.clone();
            callers.push(tokio::spawn(async move {
                retriever.retrieve(Arc::new(TestQuery::new(42)), None).await
            }));
        }

        let sent = sender.next_for(peer).await;
        // Give the remaining callers a chance to attach.
        while retriever.status().waiters < 10 {
            tokio::task::yield_now().await;
        }
        retriever
            .distributor()
            .deliver_response(peer, sent.id, TestQuery::valid_response(42))
            .await
            .unwrap();

        for caller in callers {
            assert_eq!(caller.await.unwrap(), Ok(TestQuery::valid_response(42)));
        }
        assert_eq!(sender.sent_count(), 1);
        assert_eq!(retriever.status().pending, 0);
    }

    #[tokio::test]
    async fn test_caller_deadline_leaves_others_waiting() {
        let (retriever, sender, _shutdown) = setup().await;
        let peer = test_peer(1, sender.clone()).id();

        let patient = {
            let retriever = retriever.clone();
            tokio::spawn(async move {
                retriever
                    .retrieve(
                        Arc::new(TestQuery::new(5)),
                        Some(Instant::now() + Duration::from_secs(5)),
                    )
                    .await
            })
        };
        let sent = sender.next_for(peer).await;

        let impatient = retriever
            .retrieve(
                Arc::new(TestQuery::new(5)),
                Some(Instant::now() + Duration::from_millis(20)),
            )
            .await;
        assert_eq!(impatient, Err(OdrError::Timeout));
        assert!(retriever.is_pending(&TestQuery::new(5).id()));

        retriever
            .distributor()
            .deliver_response(peer, sent.id, TestQuery::valid_response(5))
            .await
            .unwrap();
        assert_eq!(patient.await.unwrap(), Ok(TestQuery::valid_response(5)));
        assert_eq!(sender.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_early_first_deadline_does_not_end_shared_request() {
        let (retriever, sender, _shutdown) = setup().await;
        let peer = test_peer(1, sender.clone()).id();

        let impatient = {
            let retriever = retriever.clone();
            tokio::spawn(async move {
                retriever
                    .retrieve(
                        Arc::new(TestQuery::new(5)),
                        Some(Instant::now() + Duration::from_millis(50)),
                    )
                    .await
            })
        };
        let sent = sender.next_for(peer).await;

        let patient = {
            let retriever = retriever.clone();
            tokio::spawn(async move {
                retriever
                    .retrieve(
                        Arc::new(TestQuery::new(5)),
                        Some(Instant::now() + Duration::from_secs(5)),
                    )
                    .await
            })
        };
        while retriever.status().waiters < 2 {
            tokio::task::yield_now().await;
        }

        assert_eq!(impatient.await.unwrap(), Err(OdrError::Timeout));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(retriever.is_pending(&TestQuery::new(5).id()));

        retriever
            .distributor()
            .deliver_response(peer, sent.id, TestQuery::valid_response(5))
            .await
            .unwrap();
        assert_eq!(patient.await.unwrap(), Ok(TestQuery::valid_response(5)));
        assert_eq!(sender.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_last_waiter_leaving_cancels() {
        let (retriever, sender, _shutdown) = setup().await;
        let peer = test_peer(1, sender.clone()).id();

        let caller = {
            let retriever = retriever.clone();
            tokio::spawn(async move { retriever.retrieve(Arc::new(TestQuery::new(8)), None).await })
        };
        let sent = sender.next_for(peer).await;
        caller.abort();
        let _ = caller.await;

        assert!(!retriever.is_pending(&TestQuery::new(8).id()));

        // The in-flight answer is discarded and the peer becomes idle.
        retriever
            .distributor()
            .deliver_response(peer, sent.id, TestQuery::valid_response(8))
            .await
            .unwrap();
        let status = retriever.distributor().status().await.unwrap();
        assert_eq!(status.in_flight, 0);
        assert_eq!(status.pending, 0);
    }

    #[tokio::test]
    async fn test_unavailable_when_no_peer_can_serve() {
        let (retriever, sender, _shutdown) = setup().await;
        let result = retriever
            .retrieve(Arc::new(TestQuery::new(1).unservable()), None)
            .await;
        assert_eq!(result, Err(OdrError::NoPeers { attempts: 0 }));
        assert!(result.unwrap_err().is_unavailable());
        assert_eq!(sender.sent_count(), 0);
        assert_eq!(retriever.status().pending, 0);
    }
}
