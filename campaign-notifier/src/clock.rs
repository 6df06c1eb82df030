use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::metrics_consts::NOW_SNAPSHOT;

pub trait Clock: Send + Sync {
    /// Current time in whole seconds since the unix epoch.
    fn now(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to.
#[derive(Clone, Default)]
pub struct ManualClock(Arc<AtomicI64>);

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self(Arc::new(AtomicI64::new(now)))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// The "now" the filter and the join compare against.
///
/// The snapshot is taken once when the run starts. With a refresh interval
/// it is re-taken at a batch boundary once it is at least that many seconds
/// old; without one it stays fixed for the lifetime of the run.
pub struct SnapshotClock {
    clock: Arc<dyn Clock>,
    refresh_interval_secs: Option<i64>,
    snapshot: i64,
}

impl SnapshotClock {
    pub fn new(clock: Arc<dyn Clock>, refresh_interval_secs: u64) -> Self {
        let snapshot = clock.now();
        metrics::gauge!(NOW_SNAPSHOT).set(snapshot as f64);
        Self {
            clock,
            refresh_interval_secs: match refresh_interval_secs {
                0 => None,
                secs => Some(i64::try_from(secs).unwrap_or(i64::MAX)),
            },
            snapshot,
        }
    }

    /// Returns the snapshot to use for the next batch, refreshing it first
    /// if it is due.
    pub fn for_next_batch(&mut self) -> i64 {
        if let Some(interval) = self.refresh_interval_secs {
            let now = self.clock.now();
            if now.saturating_sub(self.snapshot) >= interval {
                info!(previous = self.snapshot, now, "refreshing now snapshot");
                self.snapshot = now;
                metrics::gauge!(NOW_SNAPSHOT).set(now as f64);
            }
        }
        self.snapshot
    }

    pub fn current(&self) -> i64 {
        self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_snapshot_never_moves() {
        let clock = ManualClock::new(1_000);
        let mut snapshot = SnapshotClock::new(Arc::new(clock.clone()), 0);

        clock.set(1_000_000);
        assert_eq!(snapshot.for_next_batch(), 1_000);
        assert_eq!(snapshot.current(), 1_000);
    }

    #[test]
    fn snapshot_refreshes_once_interval_elapsed() {
        let clock = ManualClock::new(1_000);
        let mut snapshot = SnapshotClock::new(Arc::new(clock.clone()), 60);

        clock.set(1_059);
        assert_eq!(snapshot.for_next_batch(), 1_000);

        clock.set(1_060);
        assert_eq!(snapshot.for_next_batch(), 1_060);

        clock.set(1_100);
        assert_eq!(snapshot.for_next_batch(), 1_060);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now() > 1_577_836_800);
    }
}
