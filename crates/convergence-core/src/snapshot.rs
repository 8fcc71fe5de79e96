//! Snapshot Policy (`spec.md` §4.6): decides when the live tree should be
//! materialized and written to the snapshot store.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration recognized by the coordinator (`spec.md` §6
/// "Configuration", §4.6). `#[serde(with = "humantime_serde")]`-style
/// duration parsing is avoided here in favor of plain millisecond fields,
/// matching how the rest of the coordinator config is loaded from
/// environment variables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SnapshotPolicy {
    pub trigger_by_version: Option<u64>,
    pub trigger_by_elapsed: Option<Duration>,
    pub min_version_delta: u64,
    pub min_elapsed: Duration,
    pub limit_by_version: Option<u64>,
    pub limit_by_elapsed: Option<Duration>,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            trigger_by_version: Some(100),
            trigger_by_elapsed: Some(Duration::from_secs(60)),
            min_version_delta: 1,
            min_elapsed: Duration::from_secs(1),
            limit_by_version: None,
            limit_by_elapsed: None,
        }
    }
}

/// Tracks the version/time of the last snapshot so the policy can be
/// evaluated incrementally, once per applied operation.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotTracker {
    last_snapshot_version: u64,
    last_snapshot_elapsed: Duration,
}

impl SnapshotTracker {
    pub fn new(last_snapshot_version: u64) -> Self {
        Self {
            last_snapshot_version,
            last_snapshot_elapsed: Duration::ZERO,
        }
    }

    pub fn record_snapshot(&mut self, version: u64) {
        self.last_snapshot_version = version;
        self.last_snapshot_elapsed = Duration::ZERO;
    }

    /// Advance the tracker's notion of elapsed time since the last
    /// snapshot. The coordinator calls this with the delta since the
    /// previous evaluation before checking [`should_snapshot`].
    pub fn advance(&mut self, delta: Duration) {
        self.last_snapshot_elapsed += delta;
    }

    /// Evaluate the policy at the current version: a snapshot is taken iff
    /// at least one trigger condition holds and neither limit is violated
    /// (`spec.md` §4.6).
    pub fn should_snapshot(&self, policy: &SnapshotPolicy, current_version: u64) -> bool {
        let version_delta = current_version.saturating_sub(self.last_snapshot_version);

        if version_delta < policy.min_version_delta {
            return false;
        }
        if self.last_snapshot_elapsed < policy.min_elapsed {
            return false;
        }

        let triggered_by_version = policy
            .trigger_by_version
            .map(|t| version_delta >= t)
            .unwrap_or(false);
        let triggered_by_elapsed = policy
            .trigger_by_elapsed
            .map(|t| self.last_snapshot_elapsed >= t)
            .unwrap_or(false);
        if !(triggered_by_version || triggered_by_elapsed) {
            return false;
        }

        if let Some(limit) = policy.limit_by_version {
            if version_delta > limit {
                return true; // overdue: limit forces a snapshot regardless
            }
        }
        if let Some(limit) = policy.limit_by_elapsed {
            if self.last_snapshot_elapsed > limit {
                return true;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_trigger_before_min_delta() {
        let policy = SnapshotPolicy {
            trigger_by_version: Some(10),
            trigger_by_elapsed: None,
            min_version_delta: 5,
            min_elapsed: Duration::ZERO,
            limit_by_version: None,
            limit_by_elapsed: None,
        };
        let tracker = SnapshotTracker::new(0);
        assert!(!tracker.should_snapshot(&policy, 3));
    }

    #[test]
    fn triggers_by_version() {
        let policy = SnapshotPolicy {
            trigger_by_version: Some(10),
            trigger_by_elapsed: None,
            min_version_delta: 1,
            min_elapsed: Duration::ZERO,
            limit_by_version: None,
            limit_by_elapsed: None,
        };
        let tracker = SnapshotTracker::new(0);
        assert!(tracker.should_snapshot(&policy, 10));
        assert!(!tracker.should_snapshot(&policy, 9));
    }

    #[test]
    fn triggers_by_elapsed() {
        let policy = SnapshotPolicy {
            trigger_by_version: None,
            trigger_by_elapsed: Some(Duration::from_secs(30)),
            min_version_delta: 0,
            min_elapsed: Duration::ZERO,
            limit_by_version: None,
            limit_by_elapsed: None,
        };
        let mut tracker = SnapshotTracker::new(0);
        tracker.advance(Duration::from_secs(31));
        assert!(tracker.should_snapshot(&policy, 1));
    }

    #[test]
    fn record_resets_tracker() {
        let policy = SnapshotPolicy {
            trigger_by_version: Some(5),
            trigger_by_elapsed: None,
            min_version_delta: 1,
            min_elapsed: Duration::ZERO,
            limit_by_version: None,
            limit_by_elapsed: None,
        };
        let mut tracker = SnapshotTracker::new(0);
        tracker.record_snapshot(5);
        assert!(!tracker.should_snapshot(&policy, 6));
        assert!(tracker.should_snapshot(&policy, 10));
    }
}
