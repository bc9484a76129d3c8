use std::sync::atomic::{AtomicU64, Ordering};

/// A point-in-time snapshot of the counters of an [`ExpiringMemoCache`](crate::ExpiringMemoCache).
///
/// All counters are monotonic over the lifetime of the cache instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Accesses that were served from a fresh value.
    pub hits: u64,
    /// Accesses that started a new computation.
    pub misses: u64,
    /// Accesses that joined a computation started by another caller.
    pub joins: u64,
    /// Computations that resolved to an error.
    pub failures: u64,
    /// Computations whose result was thrown away because the key was invalidated meanwhile.
    pub discarded: u64,
    /// Callers that stopped waiting for a computation because their timeout elapsed.
    pub timeouts: u64,
}

impl CacheStats {
    /// The total number of accesses.
    pub fn accesses(&self) -> u64 {
        self.hits + self.misses + self.joins
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
    failures: AtomicU64,
    discarded: AtomicU64,
    timeouts: AtomicU64,
}

impl StatsRecorder {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn join(&self) {
        self.joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn discard(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}
