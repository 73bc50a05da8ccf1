//! Server reputation across sessions.
//!
//! Each server address accumulates exponentially-decayed success and failure
//! counts plus a smoothed response latency. Recent behaviour dominates, but an
//! isolated failure never blacklists a server permanently: its weight halves
//! every `half_life`.
//!
//! Scores are read by the distributor (tie-break among equally cheap peers)
//! and by connection maintenance (which discovered addresses to dial first).
//! The table is loaded from the byte-store at startup and flushed
//! periodically and on shutdown.
//!
//! # Score
//!
//! ```text
//! rate    = (successes + 1) / (successes + failures + 2)
//! score   = rate * latency_ref / (latency_ref + latency)
//! ```
//!
//! An address with no record scores [`NEUTRAL_SCORE`].

use crate::config::RankingConfig;
use crate::metrics;
use crate::storage::{keys, KvStore, StorageError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Score of an address we have never talked to.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Current version of the persisted ranking format.
///
/// Increment this when making breaking changes to [`PeerScore`].
pub const RANKING_FORMAT_VERSION: u32 = 1;

/// Smoothing factor for the latency moving average.
const LATENCY_ALPHA: f64 = 0.2;

/// Decayed statistics for one server address.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeerScore {
    /// Decayed count of successful responses.
    pub successes: f64,
    /// Decayed count of failures (timeouts, disconnects, invalid proofs).
    pub failures: f64,
    /// Moving average of response latency in milliseconds.
    pub latency_ms: Option<f64>,
    /// Unix time (ms) the counts were last decayed to.
    pub updated_at_ms: u64,
}

impl PeerScore {
    fn new(now_ms: u64) -> Self {
        Self {
            successes: 0.0,
            failures: 0.0,
            latency_ms: None,
            updated_at_ms: now_ms,
        }
    }

    /// Decay counts from `updated_at_ms` to `now_ms`.
    pub fn decay(&mut self, now_ms: u64, half_life: Duration) {
        let elapsed_ms = now_ms.saturating_sub(self.updated_at_ms);
        let half_life_ms = half_life.as_millis().max(1) as f64;
        if elapsed_ms > 0 {
            let factor = 0.5f64.powf(elapsed_ms as f64 / half_life_ms);
            self.successes *= factor;
            self.failures *= factor;
        }
        self.updated_at_ms = self.updated_at_ms.max(now_ms);
    }

    /// Score in `(0, 1)`; higher is better.
    pub fn value(&self, latency_reference: Duration) -> f64 {
        let rate = (self.successes + 1.0) / (self.successes + self.failures + 2.0);
        match self.latency_ms {
            Some(latency) => {
                let reference = latency_reference.as_secs_f64() * 1000.0;
                rate * reference / (reference + latency.max(0.0))
            }
            None => rate,
        }
    }

    fn record_success(&mut self, latency: Duration) {
        self.successes += 1.0;
        let sample = latency.as_secs_f64() * 1000.0;
        self.latency_ms = Some(match self.latency_ms {
            Some(avg) => avg + LATENCY_ALPHA * (sample - avg),
            None => sample,
        });
    }

    fn record_failure(&mut self) {
        self.failures += 1.0;
    }
}

/// Persisted form of the ranking table.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRanking {
    version: u32,
    entries: Vec<(SocketAddr, PeerScore)>,
}

/// Reputation table keyed by server address.
pub struct ServerRanking {
    config: RankingConfig,
    store: Arc<dyn KvStore>,
    scores: Mutex<HashMap<SocketAddr, PeerScore>>,
    dirty: AtomicBool,
}

impl ServerRanking {
    /// Create an empty ranking backed by `store`. Nothing is loaded.
    pub fn new(config: RankingConfig, store: Arc<dyn KvStore>) -> Self {
        Self {
            config,
            store,
            scores: Mutex::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Load the ranking persisted in `store`.
    ///
    /// A missing record yields an empty table. A record written by an
    /// incompatible version, or one that fails to decode, is discarded with a
    /// warning; only database errors are returned.
    pub fn load(config: RankingConfig, store: Arc<dyn KvStore>) -> Result<Self, StorageError> {
        let ranking = Self::new(config, store);

        let Some(bytes) = ranking.store.get(keys::SERVER_RANKING)? else {
            debug!("No persisted server ranking, starting empty");
            return Ok(ranking);
        };

        match bincode::deserialize::<StoredRanking>(&bytes) {
            Ok(stored) if stored.version == RANKING_FORMAT_VERSION => {
                let count = stored.entries.len();
                ranking.scores.lock().extend(stored.entries);
                info!(servers = count, "Loaded server ranking");
            }
            Ok(stored) => {
                warn!(
                    version = stored.version,
                    expected = RANKING_FORMAT_VERSION,
                    "Discarding server ranking with incompatible version"
                );
            }
            Err(e) => {
                warn!(error = %e, "Discarding undecodable server ranking");
            }
        }

        Ok(ranking)
    }

    /// Current score of `addr`; [`NEUTRAL_SCORE`] if unknown.
    pub fn score(&self, addr: &SocketAddr) -> f64 {
        let now = now_ms();
        let mut scores = self.scores.lock();
        match scores.get_mut(addr) {
            Some(score) => {
                score.decay(now, self.config.half_life);
                score.value(self.config.latency_reference)
            }
            None => NEUTRAL_SCORE,
        }
    }

    /// Record a verified response from `addr`.
    pub fn record_success(&self, addr: SocketAddr, latency: Duration) {
        self.update(addr, |score| score.record_success(latency));
    }

    /// Record a timeout, disconnect, send error or invalid response.
    pub fn record_failure(&self, addr: SocketAddr) {
        self.update(addr, PeerScore::record_failure);
    }

    fn update(&self, addr: SocketAddr, f: impl FnOnce(&mut PeerScore)) {
        let now = now_ms();
        let mut scores = self.scores.lock();
        let score = scores.entry(addr).or_insert_with(|| PeerScore::new(now));
        score.decay(now, self.config.half_life);
        f(score);
        self.dirty.store(true, AtomicOrdering::Relaxed);
    }

    /// Raw statistics for `addr`.
    pub fn stats(&self, addr: &SocketAddr) -> Option<PeerScore> {
        self.scores.lock().get(addr).copied()
    }

    /// Sort discovered addresses best-first for dialing.
    ///
    /// Unknown addresses score neutral, so a fresh address outranks one with a
    /// poor history. Equal scores keep their input order.
    pub fn dial_order(&self, candidates: impl IntoIterator<Item = SocketAddr>) -> Vec<SocketAddr> {
        let mut scored: Vec<(SocketAddr, f64)> = candidates
            .into_iter()
            .map(|addr| (addr, self.score(&addr)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.into_iter().map(|(addr, _)| addr).collect()
    }

    /// Write the table to the byte-store if it changed since the last flush.
    pub fn flush(&self) -> Result<(), StorageError> {
        if !self.dirty.swap(false, AtomicOrdering::Relaxed) {
            return Ok(());
        }

        let stored = StoredRanking {
            version: RANKING_FORMAT_VERSION,
            entries: self
                .scores
                .lock()
                .iter()
                .map(|(addr, score)| (*addr, *score))
                .collect(),
        };
        let bytes = bincode::serialize(&stored).map_err(|e| {
            self.dirty.store(true, AtomicOrdering::Relaxed);
            StorageError::Codec(e.to_string())
        })?;

        if let Err(e) = self.store.put(keys::SERVER_RANKING, &bytes) {
            self.dirty.store(true, AtomicOrdering::Relaxed);
            return Err(e);
        }

        metrics::record_ranking_flush();
        debug!(servers = stored.entries.len(), "Flushed server ranking");
        Ok(())
    }

    /// Number of addresses with a record.
    pub fn len(&self) -> usize {
        self.scores.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.lock().is_empty()
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
