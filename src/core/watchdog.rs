// src/core/watchdog.rs

//! Deadline-bound cancellation for adaptor calls.
//!
//! A worker arms the watchdog before handing control to user code and
//! disarms it on return. If the deadline passes first, the worker's
//! cancellation token is cancelled; the worker observes that as an
//! interrupted call and abandons the exchange.

use crate::core::errors::FeedgateError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct ActiveWatch {
    timer: JoinHandle<()>,
}

/// Schedules per-worker interrupts. One instance serves all HTTP exchanges.
#[derive(Default)]
pub struct Watchdog {
    active: Mutex<HashMap<u64, ActiveWatch>>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms an interrupt for `worker_id`: after `timeout`, `token` is
    /// cancelled. A worker may hold at most one active registration.
    pub fn start(
        &self,
        worker_id: u64,
        token: &CancellationToken,
        timeout: Duration,
    ) -> Result<(), FeedgateError> {
        let mut active = self.active.lock();
        if active.contains_key(&worker_id) {
            return Err(FeedgateError::InvalidState(format!(
                "watchdog already armed for worker {worker_id}"
            )));
        }
        let token = token.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            token.cancel();
        });
        active.insert(worker_id, ActiveWatch { timer });
        Ok(())
    }

    /// Disarms the worker's interrupt. Cancellation that already fired is
    /// not undone; the worker's token stays cancelled and the caller sees
    /// the interrupt.
    pub fn complete(&self, worker_id: u64) -> Result<(), FeedgateError> {
        let watch = self.active.lock().remove(&worker_id).ok_or_else(|| {
            FeedgateError::InvalidState(format!("watchdog not armed for worker {worker_id}"))
        })?;
        watch.timer.abort();
        Ok(())
    }

    /// Re-arms an already registered worker with a new deadline, e.g. when
    /// an exchange moves from the header phase to the content phase.
    pub fn restart(
        &self,
        worker_id: u64,
        token: &CancellationToken,
        timeout: Duration,
    ) -> Result<(), FeedgateError> {
        self.complete(worker_id)?;
        self.start(worker_id, token, timeout)
    }

    /// Number of currently armed workers. Exposed for the dashboard.
    pub fn armed_count(&self) -> usize {
        self.active.lock().len()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        for (_, watch) in self.active.lock().drain() {
            watch.timer.abort();
        }
    }
}
