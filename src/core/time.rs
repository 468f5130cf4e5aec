// src/core/time.rs

//! Time injection for components that bucket or expire by wall clock.
//!
//! Ring rotation in the journal and session expiry are driven through this
//! trait so tests can advance time without sleeping.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub trait TimeSource: Send + Sync + std::fmt::Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_millis() as i64).unwrap_or_else(Utc::now)
    }
}

/// The production clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> u64 {
        Utc::now().timestamp_millis() as u64
    }
}

/// A manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct MockTimeSource {
    millis: AtomicU64,
}

impl MockTimeSource {
    pub fn at(millis: u64) -> Arc<Self> {
        Arc::new(Self {
            millis: AtomicU64::new(millis),
        })
    }

    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for MockTimeSource {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
