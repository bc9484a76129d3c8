//! Helpers for testing the caches and the catalog service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Computations that should stay in flight for a while can wait on a [`Gate`]. Keep a clone of
//!    the gate in the test and [`open`](Gate::open) it once all callers have been issued.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `stocktaker` crates and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new(
            "stocktaker_cache=trace,stocktaker_service=trace",
        ))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A one-way barrier that holds back futures until it is opened.
///
/// Once opened, a gate stays open, and all current and future [`wait`](Gate::wait) calls resolve
/// immediately.
#[derive(Clone, Debug)]
pub struct Gate {
    sender: Arc<watch::Sender<bool>>,
}

impl Gate {
    /// Creates a new, closed gate.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Opens the gate, releasing all waiters.
    pub fn open(&self) {
        self.sender.send_replace(true);
    }

    /// Returns whether the gate has been opened.
    pub fn is_open(&self) -> bool {
        *self.sender.borrow()
    }

    /// Waits until the gate is opened.
    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender is kept alive by `self`, so this can not fail.
        let _ = receiver.wait_for(|open| *open).await;
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}
