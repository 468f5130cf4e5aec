// src/core/shutdown.rs

//! Tracks in-flight work so shutdown can interrupt it and wait for it.

use crate::core::errors::FeedgateError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::warn;

struct WaiterState {
    closed: bool,
    workers: HashMap<u64, CancellationToken>,
}

/// Registry of in-flight workers. After `shutdown` begins, new registrations
/// are refused; existing workers are cancelled and waited for.
pub struct ShutdownWaiter {
    state: Mutex<WaiterState>,
    emptied: Arc<Notify>,
}

impl Default for ShutdownWaiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownWaiter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WaiterState {
                closed: false,
                workers: HashMap::new(),
            }),
            emptied: Arc::new(Notify::new()),
        }
    }

    /// Registers a worker about to process an exchange. Fails once shutdown
    /// has started so no new work slips in.
    pub fn processing_starting(
        &self,
        worker_id: u64,
        token: &CancellationToken,
    ) -> Result<(), FeedgateError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(FeedgateError::ShutDown);
        }
        state.workers.insert(worker_id, token.clone());
        Ok(())
    }

    /// Deregisters a worker. Safe to call for a worker that never
    /// registered (e.g. when registration itself failed).
    pub fn processing_completed(&self, worker_id: u64) {
        let mut state = self.state.lock();
        state.workers.remove(&worker_id);
        if state.workers.is_empty() {
            self.emptied.notify_waiters();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().closed
    }

    /// Marks the waiter closed, cancels every registered worker, and waits
    /// up to `timeout` for them all to deregister. Returns whether the wait
    /// succeeded. Idempotent.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        {
            let mut state = self.state.lock();
            state.closed = true;
            for token in state.workers.values() {
                token.cancel();
            }
            if state.workers.is_empty() {
                return true;
            }
        }

        let emptied = self.emptied.clone();
        let wait = async {
            loop {
                let notified = emptied.notified();
                if self.state.lock().workers.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(timeout, wait).await.is_err() {
            let remaining = self.state.lock().workers.len();
            warn!(
                "Timed out waiting for {} in-flight worker(s) to finish during shutdown.",
                remaining
            );
            false
        } else {
            true
        }
    }
}
