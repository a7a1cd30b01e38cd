//! Cursor configuration
//!
//! All knobs have defaults; a JSON file may override any subset of them.
//! Unknown keys are rejected so typos do not silently fall back to defaults.
//!
//! ```text
//! { "takeover_threshold": 101, "replan_factor": 10,
//!   "plan_cache": { "enabled": true, "max_entries": 1000 } }
//! ```

use serde::{Deserialize, Serialize};

/// Matches a plan must reach before it takes over from its competitors
pub const DEFAULT_TAKEOVER_THRESHOLD: u64 = 101;

/// A recorded plan is abandoned once it examines this many times more
/// records than it did when it was recorded
pub const DEFAULT_REPLAN_FACTOR: u64 = 10;

pub const DEFAULT_PLAN_CACHE_ENTRIES: usize = 1000;

/// Plan cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PlanCacheConfig {
    /// Whether winning plans are recorded and reused
    pub enabled: bool,
    /// Bound on recorded shapes; the oldest entry is evicted first
    pub max_entries: usize,
}

impl Default for PlanCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_PLAN_CACHE_ENTRIES,
        }
    }
}

impl PlanCacheConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Configuration shared by every cursor opened through a factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CursorConfig {
    /// Matches needed for one plan to win an interleaved race
    pub takeover_threshold: u64,
    /// Underperformance factor for recorded plans
    pub replan_factor: u64,
    pub plan_cache: PlanCacheConfig,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            takeover_threshold: DEFAULT_TAKEOVER_THRESHOLD,
            replan_factor: DEFAULT_REPLAN_FACTOR,
            plan_cache: PlanCacheConfig::default(),
        }
    }
}

impl CursorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the takeover threshold (at least 1)
    pub fn with_takeover_threshold(mut self, threshold: u64) -> Self {
        self.takeover_threshold = threshold.max(1);
        self
    }

    /// Override the replan factor (at least 1)
    pub fn with_replan_factor(mut self, factor: u64) -> Self {
        self.replan_factor = factor.max(1);
        self
    }

    /// Disable plan recording and lookup
    pub fn without_plan_cache(mut self) -> Self {
        self.plan_cache = PlanCacheConfig::disabled();
        self
    }

    /// Parse a JSON configuration document.
    ///
    /// Missing keys take their defaults. Zero thresholds are raised to 1.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        let mut config: CursorConfig = serde_json::from_str(text)?;
        config.takeover_threshold = config.takeover_threshold.max(1);
        config.replan_factor = config.replan_factor.max(1);
        Ok(config)
    }
}
