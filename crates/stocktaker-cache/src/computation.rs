use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::entry::{Entry, EntryState, InFlight, SharedComputation, StoredValue};
use crate::stats::{CacheStats, StatsRecorder};

/// An error returned by [`ExpiringMemoCache::get_or_fetch_timeout`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FetchError<E> {
    /// The computation resolved to an error, which is passed on unmodified.
    #[error("{0}")]
    Computation(E),
    /// The caller stopped waiting for the computation.
    ///
    /// The computation itself keeps running and will populate the cache once it completes.
    #[error("gave up waiting for the computation after {0:?}")]
    TimedOut(Duration),
}

type EntryTable<K, V, E> = HashMap<K, Entry<V, E>>;

struct Inner<K, V, E> {
    name: Arc<str>,
    ttl: Duration,
    max_keys: Option<usize>,
    entries: Mutex<EntryTable<K, V, E>>,
    /// Source of unique ids for miss episodes.
    next_episode: AtomicU64,
    /// Whether the entry count is currently above `max_keys`.
    over_capacity: AtomicBool,
    stats: StatsRecorder,
}

/// Clears the pending marker of a computation that is dropped or panics before it resolves.
struct PendingGuard<K, V, E>
where
    K: Eq + Hash,
    V: Clone,
{
    inner: Arc<Inner<K, V, E>>,
    key: K,
    episode: u64,
    resolved: bool,
}

impl<K, V, E> Drop for PendingGuard<K, V, E>
where
    K: Eq + Hash,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.resolved {
            self.inner.abandon(&self.key, self.episode);
        }
    }
}

/// The outcome of inspecting the entry table for a key.
enum Lookup<V, E> {
    Hit(V),
    Wait(SharedComputation<V, E>),
}

/// An in-memory Cache for expensive, fallible async computations.
///
/// The purpose of this Cache is to do request coalescing, and to hold successfully computed values
/// in memory until their time-to-live elapses:
///
/// - A fresh value is returned right away without running the computation.
/// - If a computation for the key is already in flight, the caller waits for it and receives its
///   outcome, be it a value or an error.
/// - Otherwise the caller becomes the owner of a new computation, which is spawned onto the tokio
///   runtime. The computation runs to completion even if all of its callers go away.
///
/// Errors are never cached. When a computation fails, a previously computed (stale) value is kept,
/// and the next access for the key runs the computation again.
///
/// Expiry is lazy: stale values stay in memory until they are accessed, deleted, or cleared.
///
/// The cache is cheap to clone, all clones share the same entries.
pub struct ExpiringMemoCache<K, V, E> {
    inner: Arc<Inner<K, V, E>>,
}

impl<K, V, E> Clone for ExpiringMemoCache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> fmt::Debug for ExpiringMemoCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .inner
            .entries
            .try_lock()
            .map(|entries| entries.len())
            .unwrap_or_default();
        f.debug_struct("ExpiringMemoCache")
            .field("name", &self.inner.name)
            .field("ttl", &self.inner.ttl)
            .field("max_keys", &self.inner.max_keys)
            .field("entries", &entries)
            .field("stats", &self.inner.stats.snapshot())
            .finish()
    }
}

#[cfg(test)]
impl<K, V, E> ExpiringMemoCache<K, V, E> {
    pub(crate) fn is_over_capacity(&self) -> bool {
        self.inner.over_capacity.load(Ordering::Relaxed)
    }
}

impl<K, V, E> ExpiringMemoCache<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a new cache with the given `name` and default time-to-live.
    ///
    /// The name is only used for logging and diagnostics.
    pub fn new(name: impl Into<Arc<str>>, ttl: Duration) -> Self {
        Self::build(name.into(), ttl, None)
    }

    /// Creates a new cache that warns when it holds more than `max_keys` entries.
    ///
    /// The bound is advisory only, entries are never evicted because of it.
    pub fn with_max_keys(name: impl Into<Arc<str>>, ttl: Duration, max_keys: usize) -> Self {
        Self::build(name.into(), ttl, Some(max_keys))
    }

    fn build(name: Arc<str>, ttl: Duration, max_keys: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                ttl,
                max_keys,
                entries: Mutex::new(HashMap::new()),
                next_episode: AtomicU64::new(0),
                over_capacity: AtomicBool::new(false),
                stats: StatsRecorder::default(),
            }),
        }
    }

    /// The name of this cache.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The default time-to-live of newly computed values.
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// The advisory upper bound of entries, if any.
    pub fn max_keys(&self) -> Option<usize> {
        self.inner.max_keys
    }

    /// Get the value for `key`, or compute it using `init`.
    ///
    /// `init` is only polled if there is neither a fresh value nor an in-flight computation for
    /// `key`. Otherwise it is dropped without ever being polled.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime, otherwise this panics without touching the
    /// cache. If the computation panics, the panic is resumed in the callers waiting for it; the
    /// key itself is left as it was before the computation.
    pub async fn get_or_fetch<F>(&self, key: K, init: F) -> Result<V, E>
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.get_or_fetch_with_ttl(key, self.inner.ttl, init).await
    }

    /// Same as [`get_or_fetch`](Self::get_or_fetch), but a newly computed value is kept fresh for
    /// `ttl` instead of the default time-to-live.
    ///
    /// The `ttl` only applies if this call ends up owning the computation.
    pub async fn get_or_fetch_with_ttl<F>(&self, key: K, ttl: Duration, init: F) -> Result<V, E>
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        match self.lookup_or_start(key, ttl, init) {
            Lookup::Hit(value) => Ok(value),
            Lookup::Wait(computation) => computation.await,
        }
    }

    /// Same as [`get_or_fetch`](Self::get_or_fetch), but gives up waiting after `timeout`.
    ///
    /// Timing out only fails this caller. The computation keeps running in the background and
    /// populates the cache for subsequent callers.
    pub async fn get_or_fetch_timeout<F>(
        &self,
        key: K,
        timeout: Duration,
        init: F,
    ) -> Result<V, FetchError<E>>
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        let computation = match self.lookup_or_start(key, self.inner.ttl, init) {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Wait(computation) => computation,
        };

        match tokio::time::timeout(timeout, computation).await {
            Ok(result) => result.map_err(FetchError::Computation),
            Err(_) => {
                self.inner.stats.timeout();
                tracing::debug!(
                    cache = %self.inner.name,
                    ?timeout,
                    "Timed out waiting for in-flight computation"
                );
                Err(FetchError::TimedOut(timeout))
            }
        }
    }

    /// Returns `true` if there is an entry for `key`, regardless of whether it is fresh, stale,
    /// or still being computed.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.entries().contains_key(key)
    }

    /// Returns the current state of the entry for `key`.
    pub fn state<Q>(&self, key: &Q) -> EntryState
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        self.inner
            .entries()
            .get(key)
            .map_or(EntryState::Empty, |entry| entry.state(now))
    }

    /// Removes the entry for `key`.
    ///
    /// A computation that is in flight for `key` still runs to completion and its callers receive
    /// its outcome, but the result is not stored. Deleting an absent key does nothing.
    pub fn delete<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (removed, size) = {
            let mut entries = self.inner.entries();
            let removed = entries.remove(key);
            (removed, entries.len())
        };

        if let Some(entry) = removed {
            tracing::trace!(
                cache = %self.inner.name,
                pending = entry.in_flight.is_some(),
                "Deleted cache entry"
            );
            self.inner.observe_size(size);
        }
    }

    /// Removes all entries, with the same semantics as [`delete`](Self::delete).
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.inner.entries());
        tracing::debug!(
            cache = %self.inner.name,
            entries = removed.len(),
            "Cleared cache"
        );
        self.inner.observe_size(0);
    }

    /// The number of entries, including stale ones and those still being computed.
    pub fn size(&self) -> usize {
        self.inner.entries().len()
    }

    /// Returns a snapshot of the statistics of this cache.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Looks up `key`, and either returns its fresh value, or the computation to wait on.
    ///
    /// If there is nothing to wait on, this claims the key and spawns `init`.
    fn lookup_or_start<F>(&self, key: K, ttl: Duration, init: F) -> Lookup<V, E>
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        // Outside of a runtime this panics before the entry table is touched.
        let runtime = Handle::current();

        let mut entries = self.inner.entries();
        let now = Instant::now();
        let size_before = entries.len();

        let entry = entries.entry(key.clone()).or_default();
        if let Some(value) = entry.fresh_value(now) {
            self.inner.stats.hit();
            return Lookup::Hit(value.clone());
        }
        if let Some(in_flight) = &entry.in_flight {
            self.inner.stats.join();
            return Lookup::Wait(in_flight.computation.clone());
        }

        self.inner.stats.miss();
        let episode = self.inner.next_episode.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            cache = %self.inner.name,
            episode,
            state = %entry.state(now),
            "Spawning deduplicated computation"
        );
        let (task_sender, task_receiver) = oneshot::channel();
        let computation = join_computation(task_receiver);
        entry.in_flight = Some(InFlight {
            episode,
            computation: computation.clone(),
        });

        let size = entries.len();
        drop(entries);
        if size > size_before {
            self.inner.observe_size(size);
        }

        // A task dropped by `spawn` abandons its entry, which needs the lock released.
        let task = runtime.spawn(self.computation_task(key, episode, ttl, init));
        // This only fails if the entry and all waiters are gone, the task then runs detached.
        let _ = task_sender.send(task);

        Lookup::Wait(computation)
    }

    /// Wraps `init` so that its outcome is installed for miss episode `episode`.
    fn computation_task<F>(
        &self,
        key: K,
        episode: u64,
        ttl: Duration,
        init: F,
    ) -> impl Future<Output = Result<V, E>> + Send + 'static + use<F, K, V, E>
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        let mut guard = PendingGuard {
            inner: Arc::clone(&self.inner),
            key,
            episode,
            resolved: false,
        };
        async move {
            let result = init.await;
            guard.inner.resolve(&guard.key, episode, ttl, &result);
            guard.resolved = true;
            result
        }
    }
}

/// Creates the computation shared by all waiters of a miss episode.
///
/// It resolves to the outcome of the task that is sent through `task` once spawned.
fn join_computation<V, E>(
    task: oneshot::Receiver<JoinHandle<Result<V, E>>>,
) -> SharedComputation<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    async move {
        let Ok(task) = task.await else {
            panic!("memoized computation was never spawned");
        };
        match task.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => panic!("memoized computation was cancelled: {err}"),
        }
    }
    .boxed()
    .shared()
}

impl<K, V, E> Inner<K, V, E>
where
    K: Eq + Hash,
    V: Clone,
{
    fn entries(&self) -> MutexGuard<'_, EntryTable<K, V, E>> {
        // The critical sections never panic while leaving the table inconsistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs the outcome of the computation for miss episode `episode`.
    fn resolve(&self, key: &K, episode: u64, ttl: Duration, result: &Result<V, E>) {
        if result.is_err() {
            self.stats.failure();
        }

        let mut entries = self.entries();
        let entry = entries.get_mut(key).filter(|entry| {
            entry
                .in_flight
                .as_ref()
                .is_some_and(|in_flight| in_flight.episode == episode)
        });
        let Some(entry) = entry else {
            // The key was deleted or cleared while computing.
            self.stats.discard();
            tracing::debug!(
                cache = %self.name,
                episode,
                "Discarding result of invalidated computation"
            );
            return;
        };

        entry.in_flight = None;
        let vacant = match result {
            Ok(value) => {
                let now = Instant::now();
                if let Some(previous) = &entry.stored {
                    tracing::trace!(
                        cache = %self.name,
                        age = ?now.saturating_duration_since(previous.created_at),
                        "Replacing stale value"
                    );
                }
                entry.stored = Some(StoredValue::new(value.clone(), now, ttl));
                false
            }
            Err(_) => entry.is_vacant(),
        };

        if vacant {
            entries.remove(key);
            let size = entries.len();
            drop(entries);
            self.observe_size(size);
        }
    }

    /// Clears the in-flight marker of a computation that did not complete.
    ///
    /// This is a no-op if the computation was already resolved.
    fn abandon(&self, key: &K, episode: u64) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if !entry
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.episode == episode)
        {
            return;
        }

        tracing::warn!(
            cache = %self.name,
            episode,
            "Memoized computation did not complete"
        );
        entry.in_flight = None;
        if entry.is_vacant() {
            entries.remove(key);
            let size = entries.len();
            drop(entries);
            self.observe_size(size);
        }
    }
}

impl<K, V, E> Inner<K, V, E> {
    /// Tracks whether the entry count crossed `max_keys`, warning once per crossing.
    fn observe_size(&self, size: usize) {
        let Some(max_keys) = self.max_keys else {
            return;
        };

        let over_capacity = size > max_keys;
        if self.over_capacity.swap(over_capacity, Ordering::Relaxed) != over_capacity
            && over_capacity
        {
            tracing::warn!(
                cache = %self.name,
                size,
                max_keys,
                "Cache holds more keys than configured"
            );
        }
    }
}
