// src/core/journal.rs

//! Time-bucketed statistics and push-job completion tracking.
//!
//! The journal keeps monotonic counters, a fixed ring of per-period stats at
//! three timescales feeding the dashboard charts, per-job completion state
//! machines, and a rolling retriever error rate.

use crate::core::docid::DocId;
use crate::core::errors::FeedgateError;
use crate::core::time::TimeSource;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Number of buckets kept per timescale ring.
const STATS_BUCKETS: usize = 60;

/// Window of the rolling retriever error rate.
pub const DEFAULT_ERROR_RATE_WINDOW: usize = 400;

/// One bucket of request statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub count: u64,
    pub duration_sum_millis: u64,
    pub max_duration_millis: u64,
    pub throughput_bytes: u64,
}

/// A ring of [`Stat`]s covering one timescale.
#[derive(Debug, Clone)]
pub struct Stats {
    pub snapshots: Vec<Stat>,
    pub snapshot_duration_millis: u64,
    pub current_index: usize,
    pub pending_stat_period_end: u64,
}

impl Stats {
    fn new(snapshot_duration_millis: u64, now_millis: u64) -> Self {
        Self {
            snapshots: vec![Stat::default(); STATS_BUCKETS],
            snapshot_duration_millis,
            current_index: 0,
            // Align the first bucket boundary to the period grid.
            pending_stat_period_end: now_millis - (now_millis % snapshot_duration_millis)
                + snapshot_duration_millis,
        }
    }

    /// Rotates the ring forward so the current bucket covers `now`. Buckets
    /// skipped over are zeroed.
    fn roll_forward(&mut self, now_millis: u64) {
        while now_millis >= self.pending_stat_period_end {
            self.current_index = (self.current_index + 1) % self.snapshots.len();
            self.snapshots[self.current_index] = Stat::default();
            self.pending_stat_period_end += self.snapshot_duration_millis;
        }
    }

    fn record(&mut self, now_millis: u64, duration: Duration, bytes: u64) {
        self.roll_forward(now_millis);
        let stat = &mut self.snapshots[self.current_index];
        let millis = duration.as_millis() as u64;
        stat.count += 1;
        stat.duration_sum_millis += millis;
        stat.max_duration_millis = stat.max_duration_millis.max(millis);
        stat.throughput_bytes += bytes;
    }
}

/// Completion outcome of one push job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    Failure,
    Interruption,
}

/// Per-job state machine: IDLE -> IN_PROGRESS -> outcome -> IDLE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum JobPhase {
    #[default]
    Idle,
    InProgress,
}

#[derive(Debug, Clone, Default)]
struct JobState {
    phase: JobPhase,
    last_outcome: Option<CompletionStatus>,
    last_start_millis: Option<u64>,
    last_finish_millis: Option<u64>,
}

impl JobState {
    fn start(&mut self, name: &str, now: u64) -> Result<(), FeedgateError> {
        if self.phase != JobPhase::Idle {
            return Err(FeedgateError::InvalidState(format!(
                "{name} push already in progress"
            )));
        }
        self.phase = JobPhase::InProgress;
        self.last_start_millis = Some(now);
        Ok(())
    }

    fn finish(
        &mut self,
        name: &str,
        outcome: CompletionStatus,
        now: u64,
    ) -> Result<(), FeedgateError> {
        if self.phase != JobPhase::InProgress {
            return Err(FeedgateError::InvalidState(format!(
                "{name} push is not in progress"
            )));
        }
        self.phase = JobPhase::Idle;
        self.last_outcome = Some(outcome);
        self.last_finish_millis = Some(now);
        Ok(())
    }
}

/// Immutable capture of the journal at one moment.
#[derive(Debug, Clone)]
pub struct JournalSnapshot {
    pub num_unique_doc_ids_pushed: u64,
    pub num_total_doc_ids_pushed: u64,
    pub num_total_groups_pushed: u64,
    pub num_gsa_retrieved_documents: u64,
    pub num_non_gsa_requests: u64,
    pub when_started_millis: u64,
    pub current_time_millis: u64,
    pub time_resolution_millis: u64,
    pub last_successful_full_push_start: Option<u64>,
    pub last_successful_full_push_end: Option<u64>,
    pub last_full_push_status: Option<CompletionStatus>,
    pub last_incremental_push_status: Option<CompletionStatus>,
    pub last_group_push_status: Option<CompletionStatus>,
    pub minute_stats: Stats,
    pub hour_stats: Stats,
    pub day_stats: Stats,
}

/// The journal proper. Increments are cheap and lock-free where possible;
/// ring rotation holds a short exclusive lock.
#[derive(Debug)]
pub struct Journal {
    time: Arc<dyn TimeSource>,
    when_started_millis: u64,

    num_total_doc_ids_pushed: AtomicU64,
    num_total_groups_pushed: AtomicU64,
    num_gsa_retrieved_documents: AtomicU64,
    num_non_gsa_requests: AtomicU64,
    last_gsa_request_millis: AtomicU64,

    /// Exact unique-id tracking; disabled in reduced-memory mode, where the
    /// unique count mirrors the total count.
    unique_doc_ids: Option<Mutex<HashSet<DocId>>>,
    num_unique_doc_ids_pushed: AtomicU64,

    stats: Mutex<TimescaleStats>,
    full_push: Mutex<JobState>,
    incremental_push: Mutex<JobState>,
    group_push: Mutex<JobState>,

    retriever_outcomes: Mutex<VecDeque<bool>>,
    error_rate_window: usize,
}

#[derive(Debug)]
struct TimescaleStats {
    minute: Stats,
    hour: Stats,
    day: Stats,
}

impl Journal {
    pub fn new(time: Arc<dyn TimeSource>, reduced_mem: bool) -> Self {
        let now = time.now_millis();
        Self {
            when_started_millis: now,
            num_total_doc_ids_pushed: AtomicU64::new(0),
            num_total_groups_pushed: AtomicU64::new(0),
            num_gsa_retrieved_documents: AtomicU64::new(0),
            num_non_gsa_requests: AtomicU64::new(0),
            last_gsa_request_millis: AtomicU64::new(0),
            unique_doc_ids: (!reduced_mem).then(|| Mutex::new(HashSet::new())),
            num_unique_doc_ids_pushed: AtomicU64::new(0),
            stats: Mutex::new(TimescaleStats {
                minute: Stats::new(1_000, now),
                hour: Stats::new(60_000, now),
                day: Stats::new(15 * 60_000, now),
            }),
            full_push: Mutex::new(JobState::default()),
            incremental_push: Mutex::new(JobState::default()),
            group_push: Mutex::new(JobState::default()),
            retriever_outcomes: Mutex::new(VecDeque::new()),
            error_rate_window: DEFAULT_ERROR_RATE_WINDOW,
            time,
        }
    }

    // --- push counters ---

    pub fn record_doc_ids_pushed(&self, doc_ids: &[DocId]) {
        self.num_total_doc_ids_pushed
            .fetch_add(doc_ids.len() as u64, Ordering::Relaxed);
        match &self.unique_doc_ids {
            Some(set) => {
                let mut set = set.lock();
                let mut fresh = 0;
                for id in doc_ids {
                    if set.insert(id.clone()) {
                        fresh += 1;
                    }
                }
                self.num_unique_doc_ids_pushed
                    .fetch_add(fresh, Ordering::Relaxed);
            }
            None => {
                self.num_unique_doc_ids_pushed
                    .fetch_add(doc_ids.len() as u64, Ordering::Relaxed);
            }
        }
    }

    pub fn record_groups_pushed(&self, count: u64) {
        self.num_total_groups_pushed
            .fetch_add(count, Ordering::Relaxed);
    }

    // --- retrieval bookkeeping ---

    /// Records one finished content request from the indexer's crawler.
    pub fn record_gsa_content_request(&self, duration: Duration, bytes: u64, success: bool) {
        let now = self.time.now_millis();
        self.num_gsa_retrieved_documents
            .fetch_add(1, Ordering::Relaxed);
        self.last_gsa_request_millis.store(now, Ordering::Relaxed);
        {
            let mut stats = self.stats.lock();
            stats.minute.record(now, duration, bytes);
            stats.hour.record(now, duration, bytes);
            stats.day.record(now, duration, bytes);
        }
        self.record_retriever_outcome(success);
    }

    /// Records one finished content request from any other client.
    pub fn record_non_gsa_request(&self) {
        self.num_non_gsa_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retriever_outcome(&self, success: bool) {
        let mut outcomes = self.retriever_outcomes.lock();
        if outcomes.len() == self.error_rate_window {
            outcomes.pop_front();
        }
        outcomes.push_back(success);
    }

    /// Failures over total within the most recent observation window; zero
    /// when nothing was observed yet.
    pub fn get_retriever_error_rate(&self, window: usize) -> f64 {
        let outcomes = self.retriever_outcomes.lock();
        let recent: Vec<bool> = outcomes.iter().rev().take(window).copied().collect();
        if recent.is_empty() {
            return 0.0;
        }
        let failures = recent.iter().filter(|ok| !**ok).count();
        failures as f64 / recent.len() as f64
    }

    pub fn has_gsa_crawled_within_last_day(&self) -> bool {
        let last = self.last_gsa_request_millis.load(Ordering::Relaxed);
        last != 0 && self.time.now_millis().saturating_sub(last) < 24 * 60 * 60 * 1_000
    }

    // --- completion state machines ---

    pub fn record_full_push_started(&self) -> Result<(), FeedgateError> {
        self.full_push.lock().start("full", self.time.now_millis())
    }

    pub fn record_full_push_successful(&self) -> Result<(), FeedgateError> {
        self.full_push
            .lock()
            .finish("full", CompletionStatus::Success, self.time.now_millis())
    }

    pub fn record_full_push_failed(&self) -> Result<(), FeedgateError> {
        self.full_push
            .lock()
            .finish("full", CompletionStatus::Failure, self.time.now_millis())
    }

    pub fn record_full_push_interrupted(&self) -> Result<(), FeedgateError> {
        self.full_push.lock().finish(
            "full",
            CompletionStatus::Interruption,
            self.time.now_millis(),
        )
    }

    pub fn record_incremental_push_started(&self) -> Result<(), FeedgateError> {
        self.incremental_push
            .lock()
            .start("incremental", self.time.now_millis())
    }

    pub fn record_incremental_push_successful(&self) -> Result<(), FeedgateError> {
        self.incremental_push.lock().finish(
            "incremental",
            CompletionStatus::Success,
            self.time.now_millis(),
        )
    }

    pub fn record_incremental_push_failed(&self) -> Result<(), FeedgateError> {
        self.incremental_push.lock().finish(
            "incremental",
            CompletionStatus::Failure,
            self.time.now_millis(),
        )
    }

    pub fn record_incremental_push_interrupted(&self) -> Result<(), FeedgateError> {
        self.incremental_push.lock().finish(
            "incremental",
            CompletionStatus::Interruption,
            self.time.now_millis(),
        )
    }

    pub fn record_group_push_started(&self) -> Result<(), FeedgateError> {
        self.group_push.lock().start("group", self.time.now_millis())
    }

    pub fn record_group_push_successful(&self) -> Result<(), FeedgateError> {
        self.group_push
            .lock()
            .finish("group", CompletionStatus::Success, self.time.now_millis())
    }

    pub fn record_group_push_failed(&self) -> Result<(), FeedgateError> {
        self.group_push
            .lock()
            .finish("group", CompletionStatus::Failure, self.time.now_millis())
    }

    pub fn record_group_push_interrupted(&self) -> Result<(), FeedgateError> {
        self.group_push.lock().finish(
            "group",
            CompletionStatus::Interruption,
            self.time.now_millis(),
        )
    }

    // --- snapshot ---

    /// A consistent capture: every increment made before the call is
    /// visible, and the ring contents come from a single lock acquisition.
    pub fn get_snapshot(&self) -> JournalSnapshot {
        let now = self.time.now_millis();
        let (minute, hour, day) = {
            let mut stats = self.stats.lock();
            stats.minute.roll_forward(now);
            stats.hour.roll_forward(now);
            stats.day.roll_forward(now);
            (stats.minute.clone(), stats.hour.clone(), stats.day.clone())
        };
        let full = self.full_push.lock().clone();
        let incremental = self.incremental_push.lock().clone();
        let group = self.group_push.lock().clone();

        JournalSnapshot {
            num_unique_doc_ids_pushed: self.num_unique_doc_ids_pushed.load(Ordering::Relaxed),
            num_total_doc_ids_pushed: self.num_total_doc_ids_pushed.load(Ordering::Relaxed),
            num_total_groups_pushed: self.num_total_groups_pushed.load(Ordering::Relaxed),
            num_gsa_retrieved_documents: self.num_gsa_retrieved_documents.load(Ordering::Relaxed),
            num_non_gsa_requests: self.num_non_gsa_requests.load(Ordering::Relaxed),
            when_started_millis: self.when_started_millis,
            current_time_millis: now,
            time_resolution_millis: 1,
            last_successful_full_push_start: full
                .last_start_millis
                .filter(|_| full.last_outcome == Some(CompletionStatus::Success)),
            last_successful_full_push_end: full
                .last_finish_millis
                .filter(|_| full.last_outcome == Some(CompletionStatus::Success)),
            last_full_push_status: full.last_outcome,
            last_incremental_push_status: incremental.last_outcome,
            last_group_push_status: group.last_outcome,
            minute_stats: minute,
            hour_stats: hour,
            day_stats: day,
        }
    }
}
