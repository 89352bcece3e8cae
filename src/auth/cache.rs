//! Validation cache keyed by token fingerprint
//!
//! A token that verified successfully is trusted again without touching any
//! trust source until the freshness window (default 5 minutes) elapses. Keys
//! are the SHA-1 hex fingerprint of the raw compact token, see
//! [`DecodedToken::fingerprint`](super::DecodedToken::fingerprint).
//!
//! The periodic sweep only bounds memory: [`ValidationCache::is_fresh`]
//! checks age on every lookup, so a stalled sweeper never extends trust.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default freshness window (5 minutes)
pub const DEFAULT_FRESHNESS: Duration = Duration::from_millis(300_000);

/// Default sweep period (30 seconds)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(30_000);

/// Thread-safe cache of recently validated token fingerprints
pub struct ValidationCache {
    /// Last successful validation per fingerprint
    entries: DashMap<String, Instant>,
    freshness: Duration,
    sweep_interval: Duration,
    stats: CacheStats,
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ValidationCache {
    /// Create a cache with explicit freshness window and sweep period
    #[must_use]
    pub fn new(freshness: Duration, sweep_interval: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            freshness,
            sweep_interval,
            stats: CacheStats::default(),
        }
    }

    /// Freshness window in use
    #[must_use]
    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// `true` if `fingerprint` validated successfully within the freshness window
    pub fn is_fresh(&self, fingerprint: &str) -> bool {
        let fresh = self
            .entries
            .get(fingerprint)
            .is_some_and(|validated_at| validated_at.elapsed() < self.freshness);
        let counter = if fresh { &self.stats.hits } else { &self.stats.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        fresh
    }

    /// Record a successful validation now, replacing any earlier entry
    pub fn mark_valid(&self, fingerprint: &str) {
        self.entries.insert(fingerprint.to_string(), Instant::now());
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove entries older than the freshness window; returns how many were removed
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, validated_at| validated_at.elapsed() < self.freshness);
        let count = before.saturating_sub(self.entries.len());
        if count > 0 {
            self.stats
                .evictions
                .fetch_add(count as u64, Ordering::Relaxed);
        }
        count
    }

    /// Number of entries currently held (fresh or not yet swept)
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of hit/miss/eviction counters
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            size: self.entries.len(),
        }
    }

    /// Spawn the periodic sweeper; it exits when `shutdown` fires.
    pub fn start(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = cache.evict_expired();
                        if evicted > 0 {
                            debug!(count = evicted, "Evicted expired validation cache entries");
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("Validation cache sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }
}

impl Default for ValidationCache {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS, DEFAULT_SWEEP_INTERVAL)
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Lookups answered from a fresh entry
    pub hits: u64,
    /// Lookups with no entry or a stale one
    pub misses: u64,
    /// Entries removed by sweeps
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
}
