//! Download statistics shared by every in-flight transfer.
//!
//! Counters are plain atomics. No invariant spans more than one counter, so a
//! snapshot may be slightly skewed under concurrent mutation but every single
//! read is atomic.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Concurrency-safe download counters plus process uptime.
#[derive(Debug)]
pub struct StatsTracker {
    /// When the tracker was created.
    started_at: Instant,
    succeeded: AtomicU64,
    failed: AtomicU64,
    pending: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub succeeded: u64,
    pub failed: u64,
    pub pending: u64,
}

impl StatsTracker {
    /// Create a tracker with all counters at zero.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            pending: AtomicU64::new(0),
        }
    }

    /// Claim a pending slot. Returns the new pending count.
    pub fn increment_pending(&self) -> u64 {
        self.pending.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Release a pending slot. Returns the new pending count.
    ///
    /// Saturates at zero, so an unmatched release can never wrap the counter.
    pub fn decrement_pending(&self) -> u64 {
        match self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => {
                tracing::warn!("Pending download counter released below zero");
                0
            }
        }
    }

    /// Record a successful download.
    pub fn increment_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a failed download.
    pub fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    /// Current pending count.
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Read all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.started_at.elapsed(),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            pending: self.pending.load(Ordering::SeqCst),
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSnapshot {
    /// Downloads that have settled, successfully or not.
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats:\nUptime: {}\nDownloads : {}/{} (pending: {})",
            format_duration(self.uptime.as_secs()),
            self.succeeded,
            self.total(),
            self.pending
        )
    }
}

/// Format a duration in seconds to a human-readable string.
pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_tracker_is_zeroed() {
        let stats = StatsTracker::new();
        let snap = stats.snapshot();
        assert_eq!(snap.succeeded, 0);
        assert_eq!(snap.failed, 0);
        assert_eq!(snap.pending, 0);
    }

    #[test]
    fn test_pending_increment_decrement() {
        let stats = StatsTracker::new();
        assert_eq!(stats.increment_pending(), 1);
        assert_eq!(stats.increment_pending(), 2);
        assert_eq!(stats.decrement_pending(), 1);
        assert_eq!(stats.decrement_pending(), 0);
    }

    #[test]
    fn test_decrement_saturates_at_zero() {
        let stats = StatsTracker::new();
        assert_eq!(stats.decrement_pending(), 0);
        assert_eq!(stats.pending(), 0);
        assert_eq!(stats.increment_pending(), 1);
    }

    #[test]
    fn test_concurrent_updates_are_conserved() {
        let stats = Arc::new(StatsTracker::new());
        let mut handles = Vec::new();

        for i in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    stats.increment_pending();
                    if i % 2 == 0 {
                        stats.increment_succeeded();
                    } else {
                        stats.increment_failed();
                    }
                    stats.decrement_pending();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.pending, 0);
        assert_eq!(snap.succeeded, 4000);
        assert_eq!(snap.failed, 4000);
        assert_eq!(snap.total(), 8000);
    }

    #[test]
    fn test_snapshot_display() {
        let snap = StatsSnapshot {
            uptime: Duration::from_secs(3725),
            succeeded: 3,
            failed: 1,
            pending: 2,
        };
        assert_eq!(
            snap.to_string(),
            "Stats:\nUptime: 1h 2m 5s\nDownloads : 3/4 (pending: 2)"
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(61), "1m 1s");
        assert_eq!(format_duration(7200), "2h 0m 0s");
    }
}
