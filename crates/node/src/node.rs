//! Light node service.
//!
//! Assembles the retrieval engine: loads the server ranking from the
//! byte-store, spawns the distributor loop and a periodic ranking flush, and
//! exposes the transport hooks the networking layer calls.

use crate::discovery::{self, Discovery};
use crate::error::NodeError;
use lightclient_odr::{
    DistributorHandle, DistributorStatus, KvStore, LightOdr, OdrConfig, Peer, ProofVerifier,
    RequestDistributor, RetrieveManager, RetrieverStatus, ServerRanking, ShutdownHandle,
};
use lightclient_types::{ChainHead, Hash, PeerId, RequestId};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Snapshot of the node's retrieval state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub distributor: DistributorStatus,
    pub retriever: RetrieverStatus,
    /// Server addresses with ranking history.
    pub ranked_servers: usize,
}

struct FlushTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// A running light node.
pub struct LightNode {
    odr: LightOdr,
    distributor: DistributorHandle,
    ranking: Arc<ServerRanking>,
    shutdown: Option<ShutdownHandle>,
    distributor_task: Option<JoinHandle<()>>,
    flush_task: Option<FlushTask>,
}

impl LightNode {
    /// Start the node. Must be called from within a tokio runtime.
    pub fn start(
        config: OdrConfig,
        store: Arc<dyn KvStore>,
        verifier: Arc<dyn ProofVerifier>,
    ) -> Result<Self, NodeError> {
        let ranking = Arc::new(ServerRanking::load(config.ranking.clone(), store.clone())?);

        let (distributor, handle, shutdown) =
            RequestDistributor::new(config.distributor.clone(), ranking.clone());
        let distributor_task = tokio::spawn(distributor.run());

        let retriever = RetrieveManager::new(handle.clone(), config.retriever.clone());
        let odr = LightOdr::new(retriever, verifier, store, config.cache_results);
        let flush_task = spawn_flush_task(ranking.clone(), config.ranking.flush_interval);

        info!(
            ranked_servers = ranking.len(),
            cache_results = config.cache_results,
            "Light node started"
        );

        Ok(Self {
            odr,
            distributor: handle,
            ranking,
            shutdown: Some(shutdown),
            distributor_task: Some(distributor_task),
            flush_task: Some(flush_task),
        })
    }

    /// Retrieval façade for domain code.
    pub fn odr(&self) -> &LightOdr {
        &self.odr
    }

    pub fn ranking(&self) -> &Arc<ServerRanking> {
        &self.ranking
    }

    pub fn distributor(&self) -> &DistributorHandle {
        &self.distributor
    }

    /// Transport hook: handshake with a server completed.
    pub async fn on_peer_connected(&self, peer: Peer) -> Result<(), NodeError> {
        Ok(self.distributor.register_peer(peer).await?)
    }

    /// Transport hook: a server disconnected.
    pub async fn on_peer_disconnected(&self, peer: PeerId) -> Result<(), NodeError> {
        Ok(self.distributor.unregister_peer(peer).await?)
    }

    /// Transport hook: a response arrived.
    pub async fn on_response(
        &self,
        peer: PeerId,
        request: RequestId,
        data: Vec<u8>,
    ) -> Result<(), NodeError> {
        Ok(self
            .distributor
            .deliver_response(peer, request, data)
            .await?)
    }

    /// Transport hook: a server announced a new head.
    pub async fn on_head_announced(&self, peer: PeerId, head: ChainHead) -> Result<(), NodeError> {
        Ok(self.distributor.announce_head(peer, head).await?)
    }

    /// Discovered server addresses, best-ranked first.
    pub fn dial_order(&self, discovery: &dyn Discovery, genesis: &Hash) -> Vec<SocketAddr> {
        discovery::dial_order(discovery, genesis, &self.ranking)
    }

    pub async fn status(&self) -> Result<NodeStatus, NodeError> {
        Ok(NodeStatus {
            distributor: self.distributor.status().await?,
            retriever: self.odr.retriever().status(),
            ranked_servers: self.ranking.len(),
        })
    }

    /// Stop the node.
    ///
    /// Pending retrievals fail with `Shutdown`. The ranking is flushed one
    /// last time.
    pub async fn stop(mut self) -> Result<(), NodeError> {
        info!("Stopping light node");

        if let Some(shutdown) = self.shutdown.take() {
            shutdown.shutdown();
        }
        if let Some(task) = self.distributor_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Distributor task ended abnormally");
            }
        }

        if let Some(flush) = self.flush_task.take() {
            let _ = flush.stop.send(());
            if let Err(e) = flush.handle.await {
                warn!(error = %e, "Ranking flush task ended abnormally");
            }
        }

        self.ranking.flush()?;
        info!("Light node stopped");
        Ok(())
    }
}

impl Drop for LightNode {
    fn drop(&mut self) {
        if let Some(flush) = self.flush_task.take() {
            flush.handle.abort();
        }
    }
}

fn spawn_flush_task(ranking: Arc<ServerRanking>, period: Duration) -> FlushTask {
    let (stop, mut stop_rx) = oneshot::channel();
    let period = period.max(Duration::from_millis(1));

    let handle = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = &mut stop_rx => break,

                _ = ticker.tick() => {
                    if let Err(e) = ranking.flush() {
                        warn!(error = %e, "Periodic ranking flush failed");
                    }
                }
            }
        }
    });

    FlushTask { stop, handle }
}
