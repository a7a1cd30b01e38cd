//! Explain output for plan selection
//!
//! Produces deterministic, human-readable output and a JSON form used by the
//! cursor explain and the CLI.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::errors::PlannerError;
use super::planner::{CacheOutcome, PlanSelection};

/// Explain record for one planned conjunction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainPlan {
    /// Whether planning produced plans
    pub accepted: bool,
    /// Plan-cache key
    pub shape: Option<String>,
    /// Candidate descriptions in racing order
    pub candidates: Vec<String>,
    /// Candidates held back behind a recorded plan
    pub held_back: Vec<String>,
    /// Recorded plan in use
    pub recorded: Option<String>,
    /// Plan-cache outcome
    pub cache: Option<String>,
    /// Rejection reason (if rejected)
    pub rejection_reason: Option<String>,
    /// Rejection error code (if rejected)
    pub rejection_code: Option<String>,
}

fn cache_label(outcome: CacheOutcome) -> &'static str {
    match outcome {
        CacheOutcome::Hit => "hit",
        CacheOutcome::Miss => "miss",
        CacheOutcome::Stale => "stale",
        CacheOutcome::Bypassed => "bypassed",
    }
}

impl ExplainPlan {
    /// Creates an explain plan from a selection
    pub fn from_selection(selection: &PlanSelection) -> Self {
        Self {
            accepted: true,
            shape: Some(selection.shape.to_string()),
            candidates: selection.plans.iter().map(ToString::to_string).collect(),
            held_back: selection.alternatives.iter().map(ToString::to_string).collect(),
            recorded: selection.recorded.as_ref().map(|r| r.plan_name.clone()),
            cache: Some(cache_label(selection.cache).to_string()),
            rejection_reason: None,
            rejection_code: None,
        }
    }

    /// Creates an explain plan from a planning error
    pub fn from_error(err: &PlannerError) -> Self {
        Self {
            accepted: false,
            shape: None,
            candidates: Vec::new(),
            held_back: Vec::new(),
            recorded: None,
            cache: None,
            rejection_reason: Some(err.message().to_string()),
            rejection_code: Some(err.code().code().to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for ExplainPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== EXPLAIN PLAN ===")?;

        if self.accepted {
            writeln!(f, "Status: ACCEPTED")?;
            if let Some(shape) = &self.shape {
                writeln!(f, "Shape: {}", shape)?;
            }
            if let Some(cache) = &self.cache {
                writeln!(f, "Plan Cache: {}", cache)?;
            }
            if let Some(recorded) = &self.recorded {
                writeln!(f, "Recorded: {}", recorded)?;
            }
            writeln!(f, "Candidates:")?;
            for plan in &self.candidates {
                writeln!(f, "  - {}", plan)?;
            }
            if !self.held_back.is_empty() {
                writeln!(f, "Held Back:")?;
                for plan in &self.held_back {
                    writeln!(f, "  - {}", plan)?;
                }
            }
        } else {
            writeln!(f, "Status: REJECTED")?;
            if let Some(code) = &self.rejection_code {
                writeln!(f, "Error Code: {}", code)?;
            }
            if let Some(reason) = &self.rejection_reason {
                writeln!(f, "Reason: {}", reason)?;
            }
        }

        Ok(())
    }
}
