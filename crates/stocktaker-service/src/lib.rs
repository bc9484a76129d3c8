//! The inventory backend of Stocktaker.
//!
//! Expensive catalog and dashboard queries are memoized in named [`ExpiringMemoCache`] instances
//! and invalidated whenever a write changes the data they were computed from.
//!
//! [`ExpiringMemoCache`]: stocktaker_cache::ExpiringMemoCache

#[macro_use]
pub mod metrics;

pub mod caches;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod store;
pub mod types;
