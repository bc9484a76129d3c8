//! In-memory caching primitives for Stocktaker.
//!
//! Currently there is an [`ExpiringMemoCache`] that provides request coalescing
//! ("single-flight") and keeps successfully computed values in memory until their
//! time-to-live elapses.
//!
//! Expiry is checked lazily whenever an entry is accessed, there is no background
//! eviction. Failed computations are never cached, the next access simply retries.

#![warn(missing_docs)]

mod computation;
mod entry;
mod stats;

pub use computation::*;
pub use entry::EntryState;
pub use stats::CacheStats;
