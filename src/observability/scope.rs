//! ObservationScope for bracketed operations
//!
//! - Logs `{name}_BEGIN` on creation
//! - Logs `{name}_COMPLETE` with the elapsed time on `complete`
//! - Logs `{name}_FAILED` on `fail`
//! - Warns with `{name}_INCOMPLETE` when dropped unresolved

use std::time::Instant;

use super::logger::{Logger, Severity};

/// A scope that logs the start and the outcome of an operation
///
/// ```ignore
/// let scope = ObservationScope::with_fields("CURSOR_OPEN", &[("ns", "test.c")]);
/// match open() {
///     Ok(cursor) => scope.complete_with_fields(&[("plans", "2")]),
///     Err(e) => scope.fail(&e.to_string()),
/// }
/// ```
pub struct ObservationScope {
    name: String,
    fields: Vec<(String, String)>,
    timer: Timer,
    resolved: bool,
}

impl ObservationScope {
    /// Create a scope and log `{name}_BEGIN`
    pub fn new(name: &str) -> Self {
        Self::with_fields(name, &[])
    }

    /// Create a scope whose fields are repeated on every outcome line
    pub fn with_fields(name: &str, fields: &[(&str, &str)]) -> Self {
        Logger::trace(&format!("{}_BEGIN", name), fields);
        Self {
            name: name.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timer: Timer::new(),
            resolved: false,
        }
    }

    fn emit(&mut self, severity: Severity, suffix: &str, extra: &[(&str, &str)]) {
        self.resolved = true;
        let elapsed = self.timer.elapsed_ms();
        let mut all: Vec<(&str, &str)> = self
            .fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        all.extend(extra.iter().copied());
        all.push(("elapsed_ms", elapsed.as_str()));
        Logger::log(severity, &format!("{}_{}", self.name, suffix), &all);
    }

    /// Mark the scope as successfully completed
    pub fn complete(mut self) {
        self.emit(Severity::Info, "COMPLETE", &[]);
    }

    /// Mark the scope as completed with additional fields
    pub fn complete_with_fields(mut self, extra_fields: &[(&str, &str)]) {
        self.emit(Severity::Info, "COMPLETE", extra_fields);
    }

    /// Mark the scope as failed with a reason
    pub fn fail(mut self, reason: &str) {
        self.emit(Severity::Error, "FAILED", &[("reason", reason)]);
    }

    /// Mark the scope as failed with FATAL severity
    pub fn fail_fatal(mut self, reason: &str) {
        self.emit(Severity::Fatal, "FAILED", &[("reason", reason)]);
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if !self.resolved {
            Logger::warn(
                &format!("{}_INCOMPLETE", self.name),
                &[("reason", "scope dropped without outcome")],
            );
        }
    }
}

/// A simple duration timer for logging elapsed time
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed milliseconds as a string
    pub fn elapsed_ms(&self) -> String {
        self.start.elapsed().as_millis().to_string()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_starts_unresolved() {
        let scope = ObservationScope::new("TEST");
        assert!(!scope.is_resolved());
        scope.complete();
    }

    #[test]
    fn test_scope_outcomes() {
        ObservationScope::with_fields("TEST", &[("ns", "test.c")]).complete_with_fields(&[("plans", "2")]);
        ObservationScope::new("TEST").fail("bad query");
        ObservationScope::new("TEST").fail_fatal("unrecoverable");
    }

    #[test]
    fn test_scope_drop_without_outcome() {
        let scope = ObservationScope::new("TEST");
        drop(scope);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let ms: u64 = timer.elapsed_ms().parse().unwrap();
        assert!(ms >= 10);
    }
}
