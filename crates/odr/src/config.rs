//! Configuration for the retrieval engine.
//!
//! # Example
//!
//! ```
//! use lightclient_odr::{DistributorConfig, OdrConfig, SelectionCriterion, SelectionPolicy};
//! use std::time::Duration;
//!
//! let config = OdrConfig::default().with_distributor(
//!     DistributorConfig::default()
//!         .with_attempt_timeout(Duration::from_secs(3))
//!         .with_selection(SelectionPolicy::new(vec![
//!             SelectionCriterion::Score,
//!             SelectionCriterion::Cost,
//!         ])),
//! );
//! assert_eq!(config.distributor.attempt_timeout, Duration::from_secs(3));
//! ```

use std::time::Duration;

/// One step of the tie-break chain used to rank eligible idle peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionCriterion {
    /// Lower request cost first.
    Cost,
    /// Higher server ranking score first.
    Score,
    /// Earlier-registered peer first.
    RegistrationOrder,
}

/// Ordered chain of criteria for choosing among eligible idle peers.
///
/// Criteria are applied in order; the next one only breaks ties of the
/// previous. Registration order is always the final tie-break, so selection is
/// deterministic even if the chain omits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPolicy {
    criteria: Vec<SelectionCriterion>,
}

impl SelectionPolicy {
    pub fn new(criteria: Vec<SelectionCriterion>) -> Self {
        Self { criteria }
    }

    pub fn criteria(&self) -> &[SelectionCriterion] {
        &self.criteria
    }
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::new(vec![
            SelectionCriterion::Cost,
            SelectionCriterion::Score,
            SelectionCriterion::RegistrationOrder,
        ])
    }
}

/// Configuration for the request distributor.
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    /// How long a single peer gets to answer before the attempt is failed and
    /// the request moves on to another peer.
    pub attempt_timeout: Duration,

    /// Maximum attempts per request, across all peers.
    pub max_attempts: u32,

    /// Capacity of the distributor's command channel.
    pub channel_capacity: usize,

    /// Tie-break chain for peer selection.
    pub selection: SelectionPolicy,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_millis(1500),
            max_attempts: 16,
            channel_capacity: 1024,
            selection: SelectionPolicy::default(),
        }
    }
}

impl DistributorConfig {
    /// Set the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Set the attempt ceiling.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the command channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the peer selection policy.
    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }
}

/// Configuration for the retrieve manager.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Deadline applied to queries that do not carry one.
    pub default_timeout: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for the server ranking.
#[derive(Debug, Clone)]
pub struct RankingConfig {
    /// Half-life of success/failure statistics.
    pub half_life: Duration,

    /// Latency at which a server's score is halved relative to an
    /// instantaneous one.
    pub latency_reference: Duration,

    /// How often the ranking is flushed to the byte-store.
    pub flush_interval: Duration,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            half_life: Duration::from_secs(3600),
            latency_reference: Duration::from_secs(1),
            flush_interval: Duration::from_secs(60),
        }
    }
}

/// Aggregate configuration for the retrieval engine.
#[derive(Debug, Clone)]
pub struct OdrConfig {
    pub distributor: DistributorConfig,
    pub retriever: RetrieverConfig,
    pub ranking: RankingConfig,
    /// Store verified immutable results in the byte-store and serve repeats
    /// locally.
    pub cache_results: bool,
}

impl Default for OdrConfig {
    fn default() -> Self {
        Self {
            distributor: DistributorConfig::default(),
            retriever: RetrieverConfig::default(),
            ranking: RankingConfig::default(),
            cache_results: true,
        }
    }
}

impl OdrConfig {
    /// Create config optimized for low-latency local networks.
    pub fn for_local() -> Self {
        Self {
            distributor: DistributorConfig::default()
                .with_attempt_timeout(Duration::from_millis(250)),
            retriever: RetrieverConfig {
                default_timeout: Duration::from_secs(2),
            },
            ranking: RankingConfig {
                latency_reference: Duration::from_millis(50),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create config for high-latency WANs.
    pub fn for_wan() -> Self {
        Self {
            distributor: DistributorConfig::default()
                .with_attempt_timeout(Duration::from_secs(5)),
            retriever: RetrieverConfig {
                default_timeout: Duration::from_secs(30),
            },
            ranking: RankingConfig {
                latency_reference: Duration::from_secs(2),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Set the distributor configuration.
    pub fn with_distributor(mut self, distributor: DistributorConfig) -> Self {
        self.distributor = distributor;
        self
    }

    /// Set the default query timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.retriever.default_timeout = timeout;
        self
    }

    /// Set the ranking configuration.
    pub fn with_ranking(mut self, ranking: RankingConfig) -> Self {
        self.ranking = ranking;
        self
    }

    /// Enable or disable local result caching.
    pub fn with_cache_results(mut self, cache: bool) -> Self {
        self.cache_results = cache;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OdrConfig::default();
        assert_eq!(config.distributor.attempt_timeout, Duration::from_millis(1500));
        assert_eq!(config.distributor.max_attempts, 16);
        assert_eq!(config.retriever.default_timeout, Duration::from_secs(10));
        assert_eq!(config.ranking.half_life, Duration::from_secs(3600));
        assert!(config.cache_results);
        assert_eq!(
            config.distributor.selection.criteria(),
            &[
                SelectionCriterion::Cost,
                SelectionCriterion::Score,
                SelectionCriterion::RegistrationOrder
            ]
        );
    }

    #[test]
    fn test_presets() {
        let local = OdrConfig::for_local();
        let wan = OdrConfig::for_wan();
        assert!(local.distributor.attempt_timeout < wan.distributor.attempt_timeout);
        assert!(local.retriever.default_timeout < wan.retriever.default_timeout);
    }

    #[test]
    fn test_builder_methods() {
        let config = OdrConfig::default()
            .with_default_timeout(Duration::from_secs(1))
            .with_cache_results(false)
            .with_distributor(DistributorConfig::default().with_max_attempts(3));

        assert_eq!(config.retriever.default_timeout, Duration::from_secs(1));
        assert!(!config.cache_results);
        assert_eq!(config.distributor.max_attempts, 3);
    }
}
