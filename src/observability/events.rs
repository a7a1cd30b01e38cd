//! Observability events for aeroquery
//!
//! Every lifecycle transition of a cursor, a plan race, or a yield is an
//! explicit, typed event.

use std::fmt;

use super::logger::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Cursor lifecycle
    /// Cursor constructed and positioned
    CursorOpened,
    /// Cursor ran out of results
    CursorExhausted,
    /// Cursor entered the Failed state
    CursorFailed,
    /// Cursor observed a kill request
    CursorKilled,

    // Plan racing
    /// One plan reached the takeover threshold
    PlanTakeover,
    /// Winning plan written to the plan cache
    PlanRecorded,
    /// Recorded plan underperformed; competitors added
    PlanReplanned,
    /// Stale or invalidated plan cache entry removed
    PlanCacheEvicted,

    // $or sequencing
    /// A new `$or` clause began running
    OrClauseStarted,
    /// A clause was skipped because earlier clauses covered it
    OrClauseEliminated,
    /// Remaining clauses dropped after a full collection scan
    OrFullScanAbort,

    // Yield
    /// Cursor suspended its plans
    YieldPrepared,
    /// Cursor resumed after a suspension
    YieldRecovered,
    /// A plan could not survive the suspension
    YieldPlanDropped,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::CursorOpened => "CURSOR_OPENED",
            Event::CursorExhausted => "CURSOR_EXHAUSTED",
            Event::CursorFailed => "CURSOR_FAILED",
            Event::CursorKilled => "CURSOR_KILLED",

            Event::PlanTakeover => "PLAN_TAKEOVER",
            Event::PlanRecorded => "PLAN_RECORDED",
            Event::PlanReplanned => "PLAN_REPLANNED",
            Event::PlanCacheEvicted => "PLAN_CACHE_EVICTED",

            Event::OrClauseStarted => "OR_CLAUSE_STARTED",
            Event::OrClauseEliminated => "OR_CLAUSE_ELIMINATED",
            Event::OrFullScanAbort => "OR_FULL_SCAN_ABORT",

            Event::YieldPrepared => "YIELD_PREPARED",
            Event::YieldRecovered => "YIELD_RECOVERED",
            Event::YieldPlanDropped => "YIELD_PLAN_DROPPED",
        }
    }

    /// Returns true if this event indicates a fatal condition for a cursor
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::CursorFailed)
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::CursorFailed => Severity::Fatal,
            Event::CursorKilled | Event::YieldPlanDropped | Event::PlanReplanned => Severity::Warn,
            Event::YieldPrepared | Event::YieldRecovered | Event::OrClauseStarted => Severity::Trace,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::CursorOpened,
            Event::CursorExhausted,
            Event::CursorFailed,
            Event::CursorKilled,
            Event::PlanTakeover,
            Event::PlanRecorded,
            Event::PlanReplanned,
            Event::PlanCacheEvicted,
            Event::OrClauseStarted,
            Event::OrClauseEliminated,
            Event::OrFullScanAbort,
            Event::YieldPrepared,
            Event::YieldRecovered,
            Event::YieldPlanDropped,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_fatal_events() {
        assert!(Event::CursorFailed.is_fatal());
        assert!(!Event::CursorKilled.is_fatal());
        assert_eq!(Event::CursorFailed.severity(), Severity::Fatal);
        assert_eq!(Event::YieldPrepared.severity(), Severity::Trace);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::PlanTakeover), "PLAN_TAKEOVER");
        assert_eq!(format!("{}", Event::OrFullScanAbort), "OR_FULL_SCAN_ABORT");
    }
}
