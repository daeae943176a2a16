//! Land task bookkeeping (§3 "Land task") and the engine's failure
//! counters (§4.K "Failure semantics").

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

/// A queued unit of work. The operation is intentionally *not* fixed at
/// enqueue time: per the open-question resolution in spec §9 ("always
/// read live fields at flush time"), the worker re-derives the effective
/// operation from the entity's current state when the task is dequeued,
/// so a `submitInsert` followed by `submitDelete` with no intervening
/// flush collapses into a single skipped task rather than two competing
/// ones.
#[derive(Debug, Clone)]
pub struct LandTask {
    pub primary_key: String,
    pub enqueue_version: u64,
}

#[derive(Default)]
pub struct LandStats {
    pub lands: AtomicU64,
    pub failures: AtomicU64,
    pub retries: AtomicU64,
    pub lost_writes: AtomicU64,
    pub skipped_stale: AtomicU64,
}

impl LandStats {
    pub fn snapshot(&self) -> LandStatsSnapshot {
        LandStatsSnapshot {
            lands: self.lands.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            lost_writes: self.lost_writes.load(Ordering::Relaxed),
            skipped_stale: self.skipped_stale.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LandStatsSnapshot {
    pub lands: u64,
    pub failures: u64,
    pub retries: u64,
    pub lost_writes: u64,
    pub skipped_stale: u64,
}
