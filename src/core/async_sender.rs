// src/core/async_sender.rs

//! Fire-and-forget push submissions from request handlers.
//!
//! Handlers must never block on the indexer, so items are offered to a
//! bounded queue and dropped with a warning when it is full. A single
//! worker drains the queue in batches and forwards them to the push
//! pipeline; at shutdown the remainder of the queue is flushed before the
//! worker exits.

use crate::core::acl::Acl;
use crate::core::batcher;
use crate::core::docid::DocId;
use crate::core::errors::FeedgateError;
use crate::core::record::Record;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One queued push submission.
#[derive(Debug, Clone, PartialEq)]
pub enum PushItem {
    Record(Record),
    NamedResource(DocId, Acl),
}

/// The downstream that receives drained batches. Implemented by the push
/// pipeline.
#[async_trait]
pub trait ItemPusher: Send + Sync {
    async fn push_items(&self, items: Vec<PushItem>) -> Result<(), FeedgateError>;
}

/// Producer half: cheap to clone into request handlers.
#[derive(Clone)]
pub struct AsyncDocIdSender {
    tx: mpsc::Sender<PushItem>,
    dropped: Arc<AtomicU64>,
}

impl AsyncDocIdSender {
    /// Builds the sender and its worker. `capacity` bounds the queue;
    /// `max_batch` and `max_latency` shape the worker's batches.
    pub fn new(
        pusher: Arc<dyn ItemPusher>,
        capacity: usize,
        max_batch: usize,
        max_latency: Duration,
    ) -> (Self, AsyncPushWorker) {
        let (tx, rx) = mpsc::channel(capacity);
        let sender = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let worker = AsyncPushWorker {
            rx,
            pusher,
            max_batch,
            max_latency,
        };
        (sender, worker)
    }

    /// Offers an item without blocking. A full queue drops the item.
    pub fn async_push_item(&self, item: PushItem) {
        match self.tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Async push queue is full; dropping item ({total} dropped since startup)."
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Async push queue is closed; dropping item.");
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer half: owns the receiving end of the queue.
pub struct AsyncPushWorker {
    rx: mpsc::Receiver<PushItem>,
    pusher: Arc<dyn ItemPusher>,
    max_batch: usize,
    max_latency: Duration,
}

impl AsyncPushWorker {
    /// Drains the queue until cancelled, then flushes whatever accumulated
    /// at cancellation time.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Async push worker started.");
        loop {
            let mut batch = Vec::new();
            let drained = batcher::take(
                &mut self.rx,
                &mut batch,
                self.max_batch,
                self.max_latency,
                &cancel,
            )
            .await;

            if cancel.is_cancelled() {
                batcher::drain_to(&mut self.rx, &mut batch);
                if !batch.is_empty() {
                    info!(
                        "Flushing {} queued item(s) before the async push worker exits.",
                        batch.len()
                    );
                    if let Err(e) = self.pusher.push_items(batch).await {
                        warn!("Final flush of async push queue failed: {e}");
                    }
                }
                break;
            }

            if drained == 0 {
                // Channel closed with nothing buffered.
                break;
            }
            if let Err(e) = self.pusher.push_items(batch).await {
                warn!("Async push batch failed: {e}");
            }
        }
        info!("Async push worker stopped.");
    }
}
