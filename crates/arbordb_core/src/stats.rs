//! Commit statistics.
//!
//! Counters are a side channel: the coordinator records into them but never
//! reads them back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Commit coordinator statistics.
///
/// All counters are atomic and can be read while commits are in progress.
#[derive(Debug, Default)]
pub struct CommitStats {
    /// Transactions handed to the coordinator.
    submitted: AtomicU64,
    /// Transactions which committed on every cohort.
    committed: AtomicU64,
    /// Transactions which were aborted.
    aborted: AtomicU64,
    /// Aborts where at least one cohort failed to abort.
    abort_failures: AtomicU64,
    /// Sum of commit durations in nanoseconds.
    total_nanos: AtomicU64,
    /// Longest commit duration in nanoseconds.
    max_nanos: AtomicU64,
}

impl CommitStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submit(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self, elapsed: Duration) {
        self.committed.fetch_add(1, Ordering::Relaxed);
        self.record_duration(elapsed);
    }

    pub(crate) fn record_abort(&self, elapsed: Duration, abort_failed: bool) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
        if abort_failed {
            self.abort_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.record_duration(elapsed);
    }

    fn record_duration(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    /// Returns the number of submitted transactions.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Returns the number of committed transactions.
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Returns the number of aborted transactions.
    pub fn aborted(&self) -> u64 {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Returns the number of aborts in which a cohort failed to abort.
    pub fn abort_failures(&self) -> u64 {
        self.abort_failures.load(Ordering::Relaxed)
    }

    /// Returns the total time spent in finished commits.
    pub fn total_duration(&self) -> Duration {
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed))
    }

    /// Returns the longest commit duration seen.
    pub fn max_duration(&self) -> Duration {
        Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed))
    }

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> CommitStatsSnapshot {
        CommitStatsSnapshot {
            submitted: self.submitted(),
            committed: self.committed(),
            aborted: self.aborted(),
            abort_failures: self.abort_failures(),
            total_duration: self.total_duration(),
            max_duration: self.max_duration(),
        }
    }
}

/// A point-in-time snapshot of [`CommitStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStatsSnapshot {
    /// Transactions handed to the coordinator.
    pub submitted: u64,
    /// Transactions which committed.
    pub committed: u64,
    /// Transactions which were aborted.
    pub aborted: u64,
    /// Aborts where a cohort failed to abort.
    pub abort_failures: u64,
    /// Total time spent in finished commits.
    pub total_duration: Duration,
    /// Longest commit duration.
    pub max_duration: Duration,
}

impl CommitStatsSnapshot {
    /// Returns the number of transactions still in progress.
    pub fn in_flight(&self) -> u64 {
        self.submitted.saturating_sub(self.committed + self.aborted)
    }
}
