//! Cursor error types
//!
//! Error codes:
//! - AERO_CURSOR_INVALID_STATE (ERROR)
//! - AERO_CURSOR_INTERRUPTED (FATAL)
//! - AERO_CURSOR_YIELD_INVALIDATED (FATAL)
//! - AERO_CURSOR_NAMESPACE_DROPPED (FATAL)
//! - AERO_CURSOR_PLANNING_FAILED (REJECT)
//! - AERO_CURSOR_STORAGE (ERROR)

use std::fmt;

use crate::planner::PlannerError;
use crate::storage::StorageError;

/// Severity levels for cursor errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Request rejected before any iteration
    Reject,
    /// Operation failed; the cursor is still usable
    Error,
    /// The cursor cannot continue
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Reject => write!(f, "REJECT"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Cursor-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorErrorCode {
    /// Accessor used while `!ok()`, or a call out of yield order
    AeroCursorInvalidState,
    /// Kill request observed
    AeroCursorInterrupted,
    /// Suspension could not be recovered from
    AeroCursorYieldInvalidated,
    /// Namespace vanished outside a yield window
    AeroCursorNamespaceDropped,
    /// Planner rejected the query
    AeroCursorPlanningFailed,
    /// Storage layer failure
    AeroCursorStorage,
}

impl CursorErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            CursorErrorCode::AeroCursorInvalidState => "AERO_CURSOR_INVALID_STATE",
            CursorErrorCode::AeroCursorInterrupted => "AERO_CURSOR_INTERRUPTED",
            CursorErrorCode::AeroCursorYieldInvalidated => "AERO_CURSOR_YIELD_INVALIDATED",
            CursorErrorCode::AeroCursorNamespaceDropped => "AERO_CURSOR_NAMESPACE_DROPPED",
            CursorErrorCode::AeroCursorPlanningFailed => "AERO_CURSOR_PLANNING_FAILED",
            CursorErrorCode::AeroCursorStorage => "AERO_CURSOR_STORAGE",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            CursorErrorCode::AeroCursorInterrupted
            | CursorErrorCode::AeroCursorYieldInvalidated
            | CursorErrorCode::AeroCursorNamespaceDropped => Severity::Fatal,
            CursorErrorCode::AeroCursorPlanningFailed => Severity::Reject,
            CursorErrorCode::AeroCursorInvalidState | CursorErrorCode::AeroCursorStorage => {
                Severity::Error
            }
        }
    }
}

impl fmt::Display for CursorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Cursor error type with full context
#[derive(Debug, Clone)]
pub struct CursorError {
    code: CursorErrorCode,
    message: String,
}

impl CursorError {
    fn new(code: CursorErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Accessor or operation not valid in the current state
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::new(CursorErrorCode::AeroCursorInvalidState, reason)
    }

    /// Kill request observed (FATAL)
    pub fn interrupted() -> Self {
        Self::new(CursorErrorCode::AeroCursorInterrupted, "operation was interrupted")
    }

    /// Yield recovery failed (FATAL)
    pub fn yield_invalidated(reason: impl Into<String>) -> Self {
        Self::new(CursorErrorCode::AeroCursorYieldInvalidated, reason)
    }

    /// Namespace missing while the cursor was active (FATAL)
    pub fn namespace_dropped(namespace: &str) -> Self {
        Self::new(
            CursorErrorCode::AeroCursorNamespaceDropped,
            format!("namespace '{}' was dropped", namespace),
        )
    }

    /// Returns the error code
    pub fn code(&self) -> CursorErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if the cursor cannot continue
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl From<PlannerError> for CursorError {
    fn from(err: PlannerError) -> Self {
        Self::new(
            CursorErrorCode::AeroCursorPlanningFailed,
            format!("{}: {}", err.code().code(), err.message()),
        )
    }
}

impl From<StorageError> for CursorError {
    fn from(err: StorageError) -> Self {
        Self::new(
            CursorErrorCode::AeroCursorStorage,
            format!("{}: {}", err.code(), err),
        )
    }
}

impl fmt::Display for CursorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for CursorError {}

/// Result type for cursor operations
pub type CursorResult<T> = Result<T, CursorError>;
