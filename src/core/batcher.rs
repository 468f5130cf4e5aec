// src/core/batcher.rs

//! Bounded-wait queue draining for the async push worker.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Drains up to `max` items from `rx` into `out`.
///
/// The first item is awaited without a deadline (or until `cancel` fires);
/// once something arrived, further items are polled only for the remainder
/// of `total_timeout`. Returns how many items were appended; zero only when
/// cancelled before anything arrived or the channel closed empty.
pub async fn take<T>(
    rx: &mut mpsc::Receiver<T>,
    out: &mut Vec<T>,
    max: usize,
    total_timeout: Duration,
    cancel: &CancellationToken,
) -> usize {
    if max == 0 {
        return 0;
    }

    let first = tokio::select! {
        item = rx.recv() => item,
        _ = cancel.cancelled() => return 0,
    };
    let Some(first) = first else {
        return 0;
    };
    out.push(first);
    let mut count = 1;

    let deadline = Instant::now() + total_timeout;
    while count < max {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let next = tokio::select! {
            item = tokio::time::timeout(remaining, rx.recv()) => match item {
                Ok(Some(item)) => item,
                // Timeout or closed channel ends the batch with what we have.
                Ok(None) | Err(_) => break,
            },
            _ = cancel.cancelled() => break,
        };
        out.push(next);
        count += 1;
    }
    count
}

/// Moves everything immediately available out of `rx` into `out`, without
/// waiting. Used to flush the queue when the worker is interrupted.
pub fn drain_to<T>(rx: &mut mpsc::Receiver<T>, out: &mut Vec<T>) -> usize {
    let mut count = 0;
    while let Ok(item) = rx.try_recv() {
        out.push(item);
        count += 1;
    }
    count
}
