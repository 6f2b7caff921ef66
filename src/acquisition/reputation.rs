//! Per-peer failure tracking for the P2P network.
//!
//! Counters live in the shared cache under `p2p:peer:{peer}` and expire after
//! the configured TTL, so a peer that stops failing is forgiven eventually.

use crate::config::ReputationSettings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::cache::SharedCache;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerReputation {
    pub failures: u32,
    /// Unix time of the last recorded failure
    pub last_failure_at: Option<i64>,
}

/// How a peer's record affects ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReputationVerdict {
    /// Score penalty to subtract (zero for healthy peers)
    Penalty(i32),
    /// Drop the peer's candidates entirely
    Skip,
}

pub struct ReputationTracker {
    cache: Arc<dyn SharedCache>,
    settings: ReputationSettings,
}

impl ReputationTracker {
    pub fn new(cache: Arc<dyn SharedCache>, settings: ReputationSettings) -> Self {
        Self { cache, settings }
    }

    fn key(peer: &str) -> String {
        format!("p2p:peer:{}", peer)
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.settings.ttl_secs)
    }

    /// Current record for a peer. Cache failures read as a clean record.
    pub async fn get(&self, peer: &str) -> PeerReputation {
        match self.cache.get(&Self::key(peer)).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => PeerReputation::default(),
            Err(e) => {
                warn!("Failed to read reputation for peer {}: {}", peer, e);
                PeerReputation::default()
            }
        }
    }

    async fn store(&self, peer: &str, reputation: &PeerReputation) {
        let raw = match serde_json::to_string(reputation) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to encode reputation for peer {}: {}", peer, e);
                return;
            }
        };
        if let Err(e) = self
            .cache
            .set(&Self::key(peer), &raw, Some(self.ttl()))
            .await
        {
            warn!("Failed to store reputation for peer {}: {}", peer, e);
        }
    }

    /// Count a failed download attempt against a peer.
    pub async fn record_failure(&self, peer: &str) {
        let mut reputation = self.get(peer).await;
        reputation.failures += 1;
        reputation.last_failure_at = Some(chrono::Utc::now().timestamp());
        debug!("Peer {} now has {} failures", peer, reputation.failures);
        self.store(peer, &reputation).await;
    }

    /// A successful download forgives one failure.
    pub async fn record_success(&self, peer: &str) {
        let mut reputation = self.get(peer).await;
        if reputation.failures == 0 {
            return;
        }
        reputation.failures -= 1;
        self.store(peer, &reputation).await;
    }

    pub fn verdict(&self, reputation: &PeerReputation) -> ReputationVerdict {
        let failures = reputation.failures;
        if failures >= self.settings.skip_threshold {
            ReputationVerdict::Skip
        } else if failures >= self.settings.severe_threshold {
            ReputationVerdict::Penalty(self.settings.severe_penalty)
        } else if failures >= self.settings.mild_threshold {
            ReputationVerdict::Penalty(self.settings.mild_penalty)
        } else {
            ReputationVerdict::Penalty(0)
        }
    }

    pub async fn verdict_for(&self, peer: &str) -> ReputationVerdict {
        let reputation = self.get(peer).await;
        self.verdict(&reputation)
    }
}
