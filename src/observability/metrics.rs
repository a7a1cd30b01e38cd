//! Metrics registry for aeroquery
//!
//! - Counters only
//! - Monotonic increase
//! - Thread-safe but lock-minimal

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Registry of cursor and planner counters.
///
/// All counters use Relaxed atomics; exact cross-counter consistency is not
/// required.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Cursors successfully opened
    cursors_opened: AtomicU64,
    /// Plan races decided by takeover
    takeovers: AtomicU64,
    /// Winning plans written to the cache
    plans_recorded: AtomicU64,
    /// Plan cache lookups that found a usable plan
    plan_cache_hits: AtomicU64,
    /// Plan cache lookups that found nothing usable
    plan_cache_misses: AtomicU64,
    /// Recorded plans abandoned for underperforming
    replans: AtomicU64,
    /// Successful yield preparations
    yields: AtomicU64,
    /// Plans dropped during yield recovery
    yield_plan_drops: AtomicU64,
    /// Cursors that entered the Failed state
    cursors_failed: AtomicU64,
    /// Cursors stopped by a kill request
    cursors_killed: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $get:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    counter!(increment_cursors_opened, cursors_opened, cursors_opened);
    counter!(increment_takeovers, takeovers, takeovers);
    counter!(increment_plans_recorded, plans_recorded, plans_recorded);
    counter!(increment_plan_cache_hits, plan_cache_hits, plan_cache_hits);
    counter!(increment_plan_cache_misses, plan_cache_misses, plan_cache_misses);
    counter!(increment_replans, replans, replans);
    counter!(increment_yields, yields, yields);
    counter!(increment_yield_plan_drops, yield_plan_drops, yield_plan_drops);
    counter!(increment_cursors_failed, cursors_failed, cursors_failed);
    counter!(increment_cursors_killed, cursors_killed, cursors_killed);

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cursors_opened: self.cursors_opened(),
            takeovers: self.takeovers(),
            plans_recorded: self.plans_recorded(),
            plan_cache_hits: self.plan_cache_hits(),
            plan_cache_misses: self.plan_cache_misses(),
            replans: self.replans(),
            yields: self.yields(),
            yield_plan_drops: self.yield_plan_drops(),
            cursors_failed: self.cursors_failed(),
            cursors_killed: self.cursors_killed(),
        }
    }

    /// Current values as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cursors_opened: u64,
    pub takeovers: u64,
    pub plans_recorded: u64,
    pub plan_cache_hits: u64,
    pub plan_cache_misses: u64,
    pub replans: u64,
    pub yields: u64,
    pub yield_plan_drops: u64,
    pub cursors_failed: u64,
    pub cursors_killed: u64,
}
