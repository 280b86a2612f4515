use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::ports::materializer::{SyncAction, TrackSyncOutcome};

/// Lifecycle of a run: `Idle -> Running -> {Done, Error, Canceled}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Running,
    Done,
    Error,
    Canceled,
}

impl SyncStatus {
    #[cfg(test)]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SyncStatus::Done | SyncStatus::Error | SyncStatus::Canceled
        )
    }
}

/// Snapshot of the current run.
///
/// `downloaded + streamed + skipped + unsupported + errors == processed` holds for
/// every published snapshot, since all counters move together in [`Progress::record`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub status: SyncStatus,
    pub total: u64,
    pub processed: u64,
    pub downloaded: u64,
    pub streamed: u64,
    pub skipped: u64,
    pub unsupported: u64,
    pub errors: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    /// Items per second.
    pub rate: f64,
    pub eta_ms: Option<u64>,
    pub error: Option<String>,
}

impl Progress {
    /// Fresh snapshot for a run that starts at `started_at`.
    pub fn running(started_at: DateTime<Utc>) -> Self {
        Self {
            status: SyncStatus::Running,
            started_at: Some(started_at),
            last_tick_at: Some(started_at),
            ..Self::default()
        }
    }

    /// Count one track outcome. Unknown actions land in `errors`.
    pub fn record(&mut self, outcome: &TrackSyncOutcome) {
        self.processed += 1;
        match outcome.action {
            SyncAction::Downloaded => self.downloaded += 1,
            SyncAction::Streamed => self.streamed += 1,
            SyncAction::Skipped => self.skipped += 1,
            SyncAction::Unsupported => self.unsupported += 1,
            SyncAction::Error | SyncAction::Unknown => self.errors += 1,
        }
        debug_assert!(self.counters_consistent());
    }

    /// Recompute elapsed time, rate and ETA against `now`.
    pub fn refresh_timing(&mut self, now: DateTime<Utc>) {
        let started_at = self.started_at.unwrap_or(now);
        self.elapsed_ms = elapsed_ms(started_at, now);
        self.rate = compute_rate(self.processed, self.elapsed_ms);
        self.eta_ms = compute_eta_ms(self.total, self.processed, self.rate);
        self.last_tick_at = Some(now);
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.processed)
    }

    pub fn counters_consistent(&self) -> bool {
        self.downloaded + self.streamed + self.skipped + self.unsupported + self.errors
            == self.processed
    }
}

pub fn elapsed_ms(started_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((now - started_at).num_milliseconds()).unwrap_or(0)
}

/// Items per second rounded to two decimals, `0.0` when no time has elapsed.
pub fn compute_rate(processed: u64, elapsed_ms: u64) -> f64 {
    if elapsed_ms == 0 {
        return 0.0;
    }
    let elapsed_secs = elapsed_ms as f64 / 1000.0;
    let rate = processed as f64 / elapsed_secs.max(f64::EPSILON);
    (rate * 100.0).round() / 100.0
}

pub fn compute_eta_ms(total: u64, processed: u64, rate: f64) -> Option<u64> {
    if rate <= 0.0 {
        return None;
    }
    let remaining = total.saturating_sub(processed) as f64;
    Some((remaining / rate * 1000.0).round() as u64)
}

/// Single observable owner of the [`Progress`] record.
///
/// Writers go through [`ProgressCell::update`] / [`ProgressCell::update_if`], which run
/// the merge under the channel's write lock, so every observer sees whole snapshots and
/// concurrent patches never interleave.
#[derive(Debug, Clone)]
pub struct ProgressCell {
    tx: Arc<watch::Sender<Progress>>,
}

impl Default for ProgressCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Progress::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Progress {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.tx.subscribe()
    }

    /// Continuous stream of snapshots, starting with the current one.
    pub fn stream(&self) -> WatchStream<Progress> {
        WatchStream::new(self.subscribe())
    }

    /// Merge a change into the current snapshot and publish the result.
    pub fn update(&self, patch: impl FnOnce(&mut Progress)) {
        self.tx.send_modify(patch);
    }

    /// Like [`ProgressCell::update`], but only publishes when `patch` returns `true`.
    pub fn update_if(&self, patch: impl FnOnce(&mut Progress) -> bool) -> bool {
        self.tx.send_if_modified(patch)
    }
}
