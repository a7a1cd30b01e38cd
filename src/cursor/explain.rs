//! Explain output for a running cursor
//!
//! One entry per `$or` clause the cursor reached, in visiting order, plus
//! cursor-wide totals. Rendered as text for humans and as JSON for the CLI.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::planner::ExplainPlan;

/// What happened to one clause
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClauseExplain {
    /// Position of the clause in the query
    pub clause: usize,
    /// Skipped because earlier clauses covered it
    pub eliminated: bool,
    /// Plan selection, absent for eliminated clauses
    pub plan: Option<ExplainPlan>,
    /// Plan that won the race, once decided
    pub winner: Option<String>,
    pub takeover: bool,
    /// Whether the clause ran to the end
    pub completed: bool,
    pub nscanned: u64,
}

impl ClauseExplain {
    pub(crate) fn eliminated(clause: usize) -> Self {
        Self {
            clause,
            eliminated: true,
            plan: None,
            winner: None,
            takeover: false,
            completed: true,
            nscanned: 0,
        }
    }
}

/// Explain record for a whole cursor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CursorExplain {
    pub namespace: String,
    /// Whether the query was split into `$or` clauses
    pub disjunctive: bool,
    pub clauses: Vec<ClauseExplain>,
    /// Remaining clauses were dropped after a full collection scan
    pub full_scan_abort: bool,
    /// Entries examined by every plan, including discarded ones
    pub nscanned: u64,
    /// Records the cursor surfaced
    pub returned: u64,
}

impl CursorExplain {
    /// True when any clause was decided by takeover
    pub fn takeover(&self) -> bool {
        self.clauses.iter().any(|c| c.takeover)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for CursorExplain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== CURSOR EXPLAIN ===")?;
        writeln!(f, "Namespace: {}", self.namespace)?;
        writeln!(f, "Clauses: {}", self.clauses.len())?;
        for clause in &self.clauses {
            if clause.eliminated {
                writeln!(f, "-- clause {}: ELIMINATED", clause.clause)?;
                continue;
            }
            write!(f, "-- clause {}:", clause.clause)?;
            match &clause.winner {
                Some(winner) => write!(f, " winner {}", winner)?,
                None => write!(f, " racing")?,
            }
            if clause.takeover {
                write!(f, " (takeover)")?;
            }
            writeln!(f, " nscanned {}", clause.nscanned)?;
            if let Some(plan) = &clause.plan {
                for candidate in &plan.candidates {
                    writeln!(f, "     - {}", candidate)?;
                }
            }
        }
        if self.full_scan_abort {
            writeln!(f, "Full scan abort: yes")?;
        }
        writeln!(f, "nscanned: {}", self.nscanned)?;
        writeln!(f, "returned: {}", self.returned)
    }
}
