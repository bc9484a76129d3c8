use std::fmt;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;

/// The observable state of a single key in an [`ExpiringMemoCache`](crate::ExpiringMemoCache).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    /// There is no entry for the key, either because it was never computed, or because it was
    /// invalidated.
    Empty,
    /// A computation is in flight and there is no fresh value yet.
    ///
    /// A stale value from a previous computation may still be held alongside it.
    Pending,
    /// A value is present and its time-to-live has not elapsed yet.
    Fresh,
    /// A value is present, but its time-to-live has elapsed.
    Stale,
}

impl EntryState {
    /// Returns the lowercase name of this state, as used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Pending => "pending",
            Self::Fresh => "fresh",
            Self::Stale => "stale",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A computation that can be awaited by any number of callers.
pub(crate) type SharedComputation<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

/// A successfully computed value together with its freshness window.
#[derive(Debug)]
pub(crate) struct StoredValue<V> {
    pub value: V,
    pub created_at: Instant,
    /// `None` means the value never expires, which happens when `created_at + ttl` overflows.
    pub expires_at: Option<Instant>,
}

impl<V> StoredValue<V> {
    pub fn new(value: V, created_at: Instant, ttl: Duration) -> Self {
        Self {
            value,
            created_at,
            expires_at: created_at.checked_add(ttl),
        }
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}

/// The in-flight computation of one miss episode.
pub(crate) struct InFlight<V, E> {
    /// Identifies the miss episode this computation belongs to.
    ///
    /// A result is only installed if the entry still refers to the same episode, otherwise the
    /// entry was invalidated in the meantime.
    pub episode: u64,
    pub computation: SharedComputation<V, E>,
}

/// A single slot in the entry table.
///
/// Entries with neither a stored value nor an in-flight computation are never kept in the table.
pub(crate) struct Entry<V, E> {
    pub stored: Option<StoredValue<V>>,
    pub in_flight: Option<InFlight<V, E>>,
}

impl<V, E> Default for Entry<V, E> {
    fn default() -> Self {
        Self {
            stored: None,
            in_flight: None,
        }
    }
}

impl<V, E> Entry<V, E> {
    /// Returns the cached value if it is still fresh at `now`.
    pub fn fresh_value(&self, now: Instant) -> Option<&V> {
        self.stored
            .as_ref()
            .filter(|stored| stored.is_fresh(now))
            .map(|stored| &stored.value)
    }

    pub fn is_vacant(&self) -> bool {
        self.stored.is_none() && self.in_flight.is_none()
    }

    pub fn state(&self, now: Instant) -> EntryState {
        match (&self.stored, &self.in_flight) {
            (Some(stored), _) if stored.is_fresh(now) => EntryState::Fresh,
            (_, Some(_)) => EntryState::Pending,
            (Some(_), None) => EntryState::Stale,
            (None, None) => EntryState::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let now = Instant::now();
        let mut entry = Entry::<u32, ()>::default();
        assert_eq!(entry.state(now), EntryState::Empty);
        assert!(entry.is_vacant());

        entry.stored = Some(StoredValue::new(1, now, Duration::from_millis(50)));
        assert_eq!(entry.state(now), EntryState::Fresh);
        assert_eq!(entry.fresh_value(now), Some(&1));

        let later = now + Duration::from_millis(50);
        assert_eq!(entry.state(later), EntryState::Stale);
        assert_eq!(entry.fresh_value(later), None);
    }

    #[test]
    fn test_overflowing_ttl_never_expires() {
        let now = Instant::now();
        let stored = StoredValue::new((), now, Duration::MAX);
        assert!(stored.expires_at.is_none());
        assert!(stored.is_fresh(now + Duration::from_secs(3600 * 24 * 365)));
    }

    #[test]
    fn test_zero_ttl_is_immediately_stale() {
        let now = Instant::now();
        let stored = StoredValue::new((), now, Duration::ZERO);
        assert!(!stored.is_fresh(now));
    }
}
