//! Request distributor.
//!
//! A single task owns the [`PeerSet`] and every pending request. Callers,
//! transport hooks and timers talk to it only through channels, so peer and
//! request state has exactly one writer.
//!
//! # Scheduling
//!
//! Pending requests are kept in arrival order. Whenever a request arrives, a
//! peer becomes idle, a peer connects or a head announcement widens a peer's
//! capability, the loop walks the queue front to back and offers each
//! unassigned request the best eligible idle peer (see [`SelectionPolicy`]).
//! Earlier requests therefore get first refusal at a newly idle peer.
//!
//! # Retry
//!
//! A request is assigned to at most one peer at a time. When an attempt fails
//! (send error, per-attempt timeout, disconnect or a response that fails
//! validation), the peer is marked idle, penalised in the [`ServerRanking`],
//! and excluded for that request. The request then competes for the remaining
//! peers. It terminates with:
//!
//! - the validated value,
//! - [`DistError::NoPeers`] once no connected, non-excluded peer can serve it
//!   (or the attempt ceiling is reached),
//! - [`DistError::Timeout`] when its overall deadline elapses,
//! - [`DistError::Cancelled`] or [`DistError::Shutdown`].

use crate::config::{DistributorConfig, SelectionCriterion, SelectionPolicy};
use crate::error::{ControlError, DistError, ValidationError};
use crate::message::{RequestPayload, WireRequest};
use crate::metrics;
use crate::peer_set::{Peer, PeerInfo, PeerSet};
use crate::ranking::ServerRanking;
use crate::timers::{TimerId, TimerManager};
use lightclient_types::{ChainHead, PeerId, RequestId, RequestKind};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Timer channel capacity. Timers get their own channel so they are never
/// starved by a flood of commands.
const TIMER_CHANNEL_CAPACITY: usize = 1024;

// ═══════════════════════════════════════════════════════════════════════════
// Distributable requests
// ═══════════════════════════════════════════════════════════════════════════

/// An abstract unit of work the distributor can place on a peer.
pub trait DistRequest: Send + 'static {
    /// Exclusivity class of the request.
    fn kind(&self) -> RequestKind;

    /// Whether `peer` is able to serve this request.
    fn can_send(&self, peer: &PeerInfo) -> bool;

    /// Estimated cost of sending this request to `peer`. Lower is preferred.
    fn cost(&self, peer: &PeerInfo) -> u64;

    /// What to put on the wire.
    fn payload(&self) -> RequestPayload;

    /// Check a raw response. Rejection counts against the peer, not the
    /// request.
    ///
    /// Runs inline on the scheduling loop; must not block.
    fn validate(&self, response: &[u8]) -> Result<Vec<u8>, ValidationError>;
}

/// A successfully served request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// Peer whose response was accepted.
    pub peer: PeerId,
    /// Validated value.
    pub value: Vec<u8>,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Time from queueing to delivery.
    pub elapsed: Duration,
}

/// Terminal outcome of a distributed request.
pub type DistResult = Result<Delivered, DistError>;

/// A request accepted by the distributor.
#[derive(Debug)]
pub struct QueuedRequest {
    pub id: RequestId,
    result: oneshot::Receiver<DistResult>,
}

impl QueuedRequest {
    /// Wait for the request to terminate.
    pub async fn wait(self) -> DistResult {
        self.result.await.unwrap_or(Err(DistError::Shutdown))
    }
}

/// Snapshot of distributor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DistributorStatus {
    /// Requests waiting for an idle peer.
    pub pending: usize,
    /// Requests currently assigned to a peer.
    pub in_flight: usize,
    /// Connected peers.
    pub peers: usize,
}

// ═══════════════════════════════════════════════════════════════════════════
// Handle
// ═══════════════════════════════════════════════════════════════════════════

enum Command {
    Queue {
        id: RequestId,
        request: Box<dyn DistRequest>,
        deadline: Instant,
        reply: oneshot::Sender<DistResult>,
    },
    Cancel(RequestId),
    ExtendDeadline {
        id: RequestId,
        deadline: Instant,
    },
    Response {
        peer: PeerId,
        id: RequestId,
        data: Vec<u8>,
    },
    PeerConnected {
        peer: Peer,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
    PeerDisconnected {
        peer: PeerId,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
    HeadAnnounced {
        peer: PeerId,
        head: ChainHead,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
    Status(oneshot::Sender<DistributorStatus>),
}

/// Cloneable handle for submitting work and transport events to the
/// distributor.
#[derive(Clone)]
pub struct DistributorHandle {
    tx: mpsc::Sender<Command>,
    next_id: Arc<AtomicU64>,
    peer_count: watch::Receiver<usize>,
}

impl DistributorHandle {
    /// Queue a request. It terminates no later than `deadline`.
    pub async fn queue(
        &self,
        request: Box<dyn DistRequest>,
        deadline: Instant,
    ) -> Result<QueuedRequest, DistError> {
        let id = RequestId(self.next_id.fetch_add(1, AtomicOrdering::Relaxed));
        let (reply, result) = oneshot::channel();
        self.tx
            .send(Command::Queue {
                id,
                request,
                deadline,
                reply,
            })
            .await
            .map_err(|_| DistError::Shutdown)?;
        Ok(QueuedRequest { id, result })
    }

    /// Cancel a request. An in-flight attempt is allowed to finish but its
    /// result is discarded.
    ///
    /// Never blocks, so it is safe to call from `Drop`.
    pub fn cancel(&self, id: RequestId) {
        self.send_nonblocking(id, Command::Cancel(id));
    }

    /// Push a request's deadline out to `deadline`. Earlier deadlines are
    /// ignored. Never blocks.
    pub fn extend_deadline(&self, id: RequestId, deadline: Instant) {
        self.send_nonblocking(id, Command::ExtendDeadline { id, deadline });
    }

    fn send_nonblocking(&self, id: RequestId, command: Command) {
        match self.tx.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                // Fall back to an async send rather than lose the command.
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let tx = self.tx.clone();
                    runtime.spawn(async move {
                        let _ = tx.send(command).await;
                    });
                } else {
                    warn!(request = %id, "Dropped request command outside runtime");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// A peer finished its handshake.
    pub async fn register_peer(&self, peer: Peer) -> Result<(), ControlError> {
        self.control(|reply| Command::PeerConnected { peer, reply })
            .await
    }

    /// A peer disconnected. Its outstanding requests are retried elsewhere.
    pub async fn unregister_peer(&self, peer: PeerId) -> Result<(), ControlError> {
        self.control(|reply| Command::PeerDisconnected { peer, reply })
            .await
    }

    /// A peer announced a new head.
    pub async fn announce_head(&self, peer: PeerId, head: ChainHead) -> Result<(), ControlError> {
        self.control(|reply| Command::HeadAnnounced { peer, head, reply })
            .await
    }

    /// A response arrived from `peer` for request `id`.
    pub async fn deliver_response(
        &self,
        peer: PeerId,
        id: RequestId,
        data: Vec<u8>,
    ) -> Result<(), ControlError> {
        self.tx
            .send(Command::Response { peer, id, data })
            .await
            .map_err(|_| ControlError::Shutdown)
    }

    /// Snapshot of the distributor's queues.
    pub async fn status(&self) -> Result<DistributorStatus, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Status(reply))
            .await
            .map_err(|_| ControlError::Shutdown)?;
        rx.await.map_err(|_| ControlError::Shutdown)
    }

    /// Number of connected peers, as last published by the distributor.
    pub fn peer_count(&self) -> usize {
        *self.peer_count.borrow()
    }

    /// Receiver that is notified whenever the peer count changes.
    pub fn subscribe_peer_count(&self) -> watch::Receiver<usize> {
        self.peer_count.clone()
    }

    async fn control(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<(), ControlError>>) -> Command,
    ) -> Result<(), ControlError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| ControlError::Shutdown)?;
        rx.await.map_err(|_| ControlError::Shutdown)?
    }
}

/// Handle for shutting down a [`RequestDistributor`].
///
/// Dropping the handle also triggers shutdown.
pub struct ShutdownHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl ShutdownHandle {
    /// Trigger shutdown (consumes the handle).
    pub fn shutdown(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Distributor loop
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct Assignment {
    peer: PeerId,
    addr: SocketAddr,
    attempt: u32,
    sent_at: Instant,
}

struct PendingRequest {
    /// Arrival sequence number (queue position).
    seq: u64,
    request: Box<dyn DistRequest>,
    reply: Option<oneshot::Sender<DistResult>>,
    queued_at: Instant,
    /// Current overall deadline. A deadline timer firing earlier is stale.
    deadline: Instant,
    /// Peers that already failed this request.
    excluded: HashSet<PeerId>,
    attempts: u32,
    assigned: Option<Assignment>,
    cancelled: bool,
}

struct Candidate {
    id: PeerId,
    cost: u64,
    score: f64,
    order: usize,
}

/// The scheduling loop. Spawn [`RequestDistributor::run`] on the runtime.
pub struct RequestDistributor {
    config: DistributorConfig,
    ranking: Arc<ServerRanking>,
    peers: PeerSet,
    requests: HashMap<RequestId, PendingRequest>,
    /// Arrival order of `requests`.
    queue: BTreeMap<u64, RequestId>,
    next_seq: u64,
    timers: TimerManager,
    timer_rx: mpsc::Receiver<TimerId>,
    command_rx: mpsc::Receiver<Command>,
    shutdown_rx: oneshot::Receiver<()>,
    peer_count_tx: watch::Sender<usize>,
}

impl RequestDistributor {
    /// Create the distributor, a handle to feed it and a shutdown handle.
    pub fn new(
        config: DistributorConfig,
        ranking: Arc<ServerRanking>,
    ) -> (Self, DistributorHandle, ShutdownHandle) {
        let (command_tx, command_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (timer_tx, timer_rx) = mpsc::channel(TIMER_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (peer_count_tx, peer_count_rx) = watch::channel(0);

        let distributor = Self {
            config,
            ranking,
            peers: PeerSet::new(),
            requests: HashMap::new(),
            queue: BTreeMap::new(),
            next_seq: 0,
            timers: TimerManager::new(timer_tx),
            timer_rx,
            command_rx,
            shutdown_rx,
            peer_count_tx,
        };
        let handle = DistributorHandle {
            tx: command_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            peer_count: peer_count_rx,
        };
        let shutdown = ShutdownHandle {
            tx: Some(shutdown_tx),
        };
        (distributor, handle, shutdown)
    }

    /// Run until shutdown is signalled or every handle is dropped.
    ///
    /// Requests still pending on exit fail with [`DistError::Shutdown`].
    pub async fn run(mut self) {
        info!("Request distributor started");

        loop {
            tokio::select! {
                biased;

                _ = &mut self.shutdown_rx => {
                    info!("Shutdown signal received");
                    break;
                }

                Some(timer) = self.timer_rx.recv() => {
                    self.on_timer(timer);
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.on_command(command),
                        None => {
                            debug!("All distributor handles dropped");
                            break;
                        }
                    }
                }
            }
        }

        let remaining: Vec<RequestId> = self.queue.values().copied().collect();
        if !remaining.is_empty() {
            info!(count = remaining.len(), "Failing pending requests on shutdown");
        }
        for id in remaining {
            self.finish(id, Err(DistError::Shutdown));
        }
        self.timers.cancel_all();
        metrics::set_distributor_load(0, 0);
        info!("Request distributor stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Queue {
                id,
                request,
                deadline,
                reply,
            } => self.on_queue(id, request, deadline, reply),
            Command::Cancel(id) => self.on_cancel(id),
            Command::ExtendDeadline { id, deadline } => self.on_extend_deadline(id, deadline),
            Command::Response { peer, id, data } => self.on_response(peer, id, data),
            Command::PeerConnected { peer, reply } => {
                let _ = reply.send(self.on_peer_connected(peer));
            }
            Command::PeerDisconnected { peer, reply } => {
                let _ = reply.send(self.on_peer_disconnected(peer));
            }
            Command::HeadAnnounced { peer, head, reply } => {
                let result = self.peers.update_head(&peer, head).map_err(ControlError::from);
                if result.is_ok() {
                    trace!(%peer, number = head.number.0, "Head announced");
                    self.schedule();
                }
                let _ = reply.send(result);
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn on_queue(
        &mut self,
        id: RequestId,
        request: Box<dyn DistRequest>,
        deadline: Instant,
        reply: oneshot::Sender<DistResult>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;

        debug!(request = %id, kind = request.kind().as_str(), "Request queued");
        self.requests.insert(
            id,
            PendingRequest {
                seq,
                request,
                reply: Some(reply),
                queued_at: Instant::now(),
                deadline,
                excluded: HashSet::new(),
                attempts: 0,
                assigned: None,
                cancelled: false,
            },
        );
        self.queue.insert(seq, id);
        self.timers.set_timer_at(TimerId::Deadline(id), deadline);
        self.schedule();
    }

    fn on_cancel(&mut self, id: RequestId) {
        let Some(req) = self.requests.get_mut(&id) else {
            return;
        };
        if req.assigned.is_some() {
            // Let the attempt finish so the peer's stream stays in sync.
            debug!(request = %id, "Request cancelled while in flight");
            req.cancelled = true;
        } else {
            debug!(request = %id, "Request cancelled");
            self.finish(id, Err(DistError::Cancelled));
            self.publish_load();
        }
    }

    fn on_extend_deadline(&mut self, id: RequestId, deadline: Instant) {
        let Some(req) = self.requests.get_mut(&id) else {
            return;
        };
        if deadline <= req.deadline {
            return;
        }
        req.deadline = deadline;
        self.timers.set_timer_at(TimerId::Deadline(id), deadline);
        trace!(request = %id, "Request deadline extended");
    }

    fn on_response(&mut self, peer: PeerId, id: RequestId, data: Vec<u8>) {
        let Some(req) = self.requests.get_mut(&id) else {
            trace!(%peer, request = %id, "Response for finished request");
            return;
        };
        let Some(assignment) = req.assigned.filter(|a| a.peer == peer) else {
            debug!(%peer, request = %id, "Response from peer not assigned to request");
            return;
        };
        req.assigned = None;
        let kind = req.request.kind();

        self.timers
            .cancel_timer(TimerId::Attempt(id, assignment.attempt));
        if let Err(e) = self.peers.mark_idle(&peer, kind) {
            error!(error = %e, request = %id, "Peer state out of sync on response");
        }

        match req.request.validate(&data) {
            Ok(value) => {
                let latency = assignment.sent_at.elapsed();
                self.ranking.record_success(assignment.addr, latency);
                trace!(
                    %peer,
                    request = %id,
                    latency_ms = latency.as_millis() as u64,
                    "Response accepted"
                );
                let delivered = Delivered {
                    peer,
                    value,
                    attempts: req.attempts,
                    elapsed: req.queued_at.elapsed(),
                };
                self.finish(id, Ok(delivered));
            }
            Err(e) => {
                warn!(
                    %peer,
                    request = %id,
                    kind = kind.as_str(),
                    error = %e,
                    "Response failed validation"
                );
                req.excluded.insert(peer);
                self.ranking.record_failure(assignment.addr);
                metrics::record_verification_failure(kind);
                metrics::record_peer_failure("invalid");
            }
        }

        // The peer is idle again, and the request may need another peer.
        self.schedule();
    }

    fn on_timer(&mut self, timer: TimerId) {
        self.timers.fired(timer);

        match timer {
            TimerId::Attempt(id, attempt) => {
                let Some(req) = self.requests.get_mut(&id) else {
                    return;
                };
                let Some(assignment) = req.assigned.filter(|a| a.attempt == attempt) else {
                    return;
                };
                req.assigned = None;
                req.excluded.insert(assignment.peer);
                let kind = req.request.kind();

                warn!(
                    peer = %assignment.peer,
                    request = %id,
                    kind = kind.as_str(),
                    attempt,
                    "Attempt timed out"
                );
                if let Err(e) = self.peers.mark_idle(&assignment.peer, kind) {
                    error!(error = %e, request = %id, "Peer state out of sync on timeout");
                }
                self.ranking.record_failure(assignment.addr);
                metrics::record_attempt_timeout(kind);
                metrics::record_peer_failure("timeout");
                self.schedule();
            }
            TimerId::Deadline(id) => {
                let Some(req) = self.requests.get(&id) else {
                    return;
                };
                if Instant::now() < req.deadline {
                    // Fired before an extension re-armed the timer.
                    return;
                }
                if let Some(assignment) = req.assigned {
                    self.ranking.record_failure(assignment.addr);
                    metrics::record_peer_failure("timeout");
                }
                let attempts = req.attempts;
                debug!(request = %id, attempts, "Request deadline elapsed");
                self.finish(id, Err(DistError::Timeout { attempts }));
                self.schedule();
            }
        }
    }

    fn on_peer_connected(&mut self, peer: Peer) -> Result<(), ControlError> {
        let id = peer.id();
        let addr = peer.info.addr;
        self.peers.register(peer)?;
        info!(peer = %id, %addr, peers = self.peers.len(), "Peer connected");
        self.publish_peer_count();
        self.schedule();
        Ok(())
    }

    fn on_peer_disconnected(&mut self, peer: PeerId) -> Result<(), ControlError> {
        let outstanding = self.peers.unregister(&peer)?;
        info!(
            %peer,
            outstanding = outstanding.len(),
            peers = self.peers.len(),
            "Peer disconnected"
        );

        for (_, id) in outstanding {
            let Some(req) = self.requests.get_mut(&id) else {
                continue;
            };
            let Some(assignment) = req.assigned.filter(|a| a.peer == peer) else {
                continue;
            };
            req.assigned = None;
            req.excluded.insert(peer);
            self.timers
                .cancel_timer(TimerId::Attempt(id, assignment.attempt));
            self.ranking.record_failure(assignment.addr);
            metrics::record_peer_failure("disconnect");
            debug!(%peer, request = %id, "Reassigning request from disconnected peer");
        }

        self.publish_peer_count();
        self.schedule();
        Ok(())
    }

    /// Offer every unassigned request, in arrival order, to the idle peers.
    fn schedule(&mut self) {
        let order: Vec<RequestId> = self.queue.values().copied().collect();
        for id in order {
            self.try_assign(id);
        }
        self.publish_load();
    }

    fn try_assign(&mut self, id: RequestId) {
        loop {
            let Some(req) = self.requests.get(&id) else {
                return;
            };
            if req.assigned.is_some() {
                return;
            }
            if req.cancelled {
                self.finish(id, Err(DistError::Cancelled));
                return;
            }

            let reachable = self
                .peers
                .connected()
                .into_iter()
                .any(|p| !req.excluded.contains(&p.id) && req.request.can_send(p));
            if !reachable || req.attempts >= self.config.max_attempts {
                let attempts = req.attempts;
                debug!(request = %id, attempts, "No eligible peers left");
                self.finish(id, Err(DistError::NoPeers { attempts }));
                return;
            }

            let Some(peer) = select_peer(&self.peers, &self.ranking, &self.config.selection, req)
            else {
                // Eligible peers exist but are busy; wait for one to free up.
                return;
            };

            if self.assign(id, peer) {
                return;
            }
        }
    }

    /// Place `id` on `peer`. Returns false if the send failed; the peer is
    /// then excluded for this request.
    fn assign(&mut self, id: RequestId, peer_id: PeerId) -> bool {
        let Some(peer) = self.peers.get(&peer_id).cloned() else {
            return false;
        };
        let Some(req) = self.requests.get_mut(&id) else {
            return true;
        };
        let kind = req.request.kind();

        if let Err(e) = self.peers.mark_busy(&peer_id, kind, id) {
            error!(error = %e, request = %id, "Selected a busy peer");
            req.excluded.insert(peer_id);
            return false;
        }

        req.attempts += 1;
        let attempt = req.attempts;
        let wire = WireRequest {
            id,
            payload: req.request.payload(),
        };

        match peer.sender.send(wire) {
            Ok(()) => {
                req.assigned = Some(Assignment {
                    peer: peer_id,
                    addr: peer.info.addr,
                    attempt,
                    sent_at: Instant::now(),
                });
                self.timers
                    .set_timer(TimerId::Attempt(id, attempt), self.config.attempt_timeout);
                metrics::record_attempt(kind);
                debug!(
                    peer = %peer_id,
                    request = %id,
                    kind = kind.as_str(),
                    attempt,
                    "Request assigned"
                );
                true
            }
            Err(e) => {
                warn!(peer = %peer_id, request = %id, error = %e, "Send failed");
                if let Err(e) = self.peers.mark_idle(&peer_id, kind) {
                    error!(error = %e, request = %id, "Peer state out of sync on send error");
                }
                req.excluded.insert(peer_id);
                self.ranking.record_failure(peer.info.addr);
                metrics::record_peer_failure("send");
                false
            }
        }
    }

    /// Remove a request and deliver its outcome.
    fn finish(&mut self, id: RequestId, result: DistResult) {
        let Some(mut req) = self.requests.remove(&id) else {
            return;
        };
        self.queue.remove(&req.seq);
        self.timers.cancel_request(id);

        if let Some(assignment) = req.assigned.take() {
            if let Err(e) = self.peers.mark_idle(&assignment.peer, req.request.kind()) {
                // The peer may have disconnected in the meantime.
                trace!(error = %e, request = %id, "Peer not busy on finish");
            }
        }

        let result = if req.cancelled {
            Err(DistError::Cancelled)
        } else {
            result
        };
        if let Some(reply) = req.reply.take() {
            let _ = reply.send(result);
        }
    }

    fn status(&self) -> DistributorStatus {
        let in_flight = self.peers.in_flight();
        DistributorStatus {
            pending: self.requests.len().saturating_sub(in_flight),
            in_flight,
            peers: self.peers.len(),
        }
    }

    fn publish_load(&self) {
        let status = self.status();
        metrics::set_distributor_load(status.pending, status.in_flight);
    }

    fn publish_peer_count(&self) {
        let count = self.peers.len();
        self.peer_count_tx.send_replace(count);
        metrics::set_peers_connected(count);
    }
}

/// Pick the best idle, non-excluded peer that can serve `req`.
fn select_peer(
    peers: &PeerSet,
    ranking: &ServerRanking,
    policy: &SelectionPolicy,
    req: &PendingRequest,
) -> Option<PeerId> {
    peers
        .peers_serving(req.request.kind())
        .into_iter()
        .enumerate()
        .filter(|(_, p)| !req.excluded.contains(&p.id) && req.request.can_send(p))
        .map(|(order, p)| Candidate {
            id: p.id,
            cost: req.request.cost(p),
            score: ranking.score(&p.addr),
            order,
        })
        .min_by(|a, b| compare_candidates(policy, a, b))
        .map(|c| c.id)
}

fn compare_candidates(policy: &SelectionPolicy, a: &Candidate, b: &Candidate) -> Ordering {
    for criterion in policy.criteria() {
        let ordering = match criterion {
            SelectionCriterion::Cost => a.cost.cmp(&b.cost),
            SelectionCriterion::Score => b.score.total_cmp(&a.score),
            SelectionCriterion::RegistrationOrder => a.order.cmp(&b.order),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.order.cmp(&b.order)
}
