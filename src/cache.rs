//! Pass-scoped memoization of parsed accounting data.
//!
//! The cache amortizes filesystem reads across metric families sharing one
//! scrape and across closely spaced scrapes. It is an accelerator, never a
//! source of truth: with a TTL of zero every lookup misses and collection
//! behaves identically, just slower.
//!
//! Entries are keyed by `(group path, subsystem)` over a [`DashMap`], so
//! independent subsystems and groups never serialize on a shared lock.
//! Staleness is evaluated against the pass-start instant handed in by the
//! caller rather than wall-clock-at-call-time, so every metric family within
//! one scrape observes the same cache horizon. Entries are inserted whole; a
//! cancelled pass can at worst fail to insert, never leave a torn value.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::cgroup::CgroupNode;
use crate::cgroup::stats::{Subsystem, SubsystemStats};

#[derive(Debug)]
struct CacheEntry {
    stats: SubsystemStats,
    produced_at: Instant,
}

#[derive(Debug, Clone)]
struct WalkEntry {
    nodes: Arc<[CgroupNode]>,
    produced_at: Instant,
}

/// Time-bounded cache of per-group parsed records plus the latest hierarchy
/// walk, shared across collectors and across concurrent scrapes.
#[derive(Debug)]
pub struct MetricCache {
    ttl: Duration,
    entries: DashMap<(PathBuf, Subsystem), CacheEntry>,
    walk: RwLock<Option<WalkEntry>>,
}

impl MetricCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            walk: RwLock::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn fresh(&self, produced_at: Instant, pass_start: Instant) -> bool {
        pass_start.saturating_duration_since(produced_at) < self.ttl
    }

    /// Looks up the record for `(path, subsystem)`; stale entries are
    /// treated as absent, never served.
    pub fn get(
        &self,
        path: &Path,
        subsystem: Subsystem,
        pass_start: Instant,
    ) -> Option<SubsystemStats> {
        if self.ttl.is_zero() {
            return None;
        }
        let entry = self.entries.get(&(path.to_path_buf(), subsystem))?;
        self.fresh(entry.produced_at, pass_start)
            .then(|| entry.stats.clone())
    }

    /// Stores a freshly parsed record.
    pub fn put(&self, path: &Path, subsystem: Subsystem, stats: SubsystemStats) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.insert(
            (path.to_path_buf(), subsystem),
            CacheEntry {
                stats,
                produced_at: Instant::now(),
            },
        );
    }

    /// Returns the cached hierarchy walk if still within the TTL horizon of
    /// this pass.
    pub fn get_walk(&self, pass_start: Instant) -> Option<Arc<[CgroupNode]>> {
        if self.ttl.is_zero() {
            return None;
        }
        let walk = self.walk.read().ok()?;
        let entry = walk.as_ref()?;
        self.fresh(entry.produced_at, pass_start)
            .then(|| Arc::clone(&entry.nodes))
    }

    /// Stores a completed hierarchy walk for reuse by the other collectors
    /// of the same scrape.
    pub fn put_walk(&self, nodes: Arc<[CgroupNode]>) {
        if self.ttl.is_zero() {
            return;
        }
        if let Ok(mut walk) = self.walk.write() {
            *walk = Some(WalkEntry {
                nodes,
                produced_at: Instant::now(),
            });
        }
    }

    /// Drops all entries and the cached walk. Administrative control, used
    /// when the hierarchy root changes; not part of the steady collection
    /// path.
    pub fn invalidate(&self) {
        self.entries.clear();
        if let Ok(mut walk) = self.walk.write() {
            *walk = None;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
