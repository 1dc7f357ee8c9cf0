use std::collections::HashMap;

use dualstate_core::config::GateConfig;

use crate::types::Diagnostic;

/// Subject of a file-level diagnostic that names no interface.
const UNATTRIBUTED: &str = "<unattributed>";

/// Tracks consecutive gate failures per (diagnostic code, interface key).
/// With the default of 3 attempts:
///   failure 1 = retry with the diagnostics as feedback
///   failure 2 = retry with widened retrieval context
///   failure 3 = give up and report
#[derive(Debug)]
pub struct CircuitBreaker {
    state: HashMap<(String, String), u32>,
    max_attempts: u32,
}

/// What the planning loop should do after a failed gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BreakerAction {
    Retry,
    WiderContext,
    GiveUp,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_max_attempts(3)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            state: HashMap::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::with_max_attempts(config.max_attempts)
    }

    /// Record one failure and return the recommended action.
    pub fn record_failure(&mut self, code: &str, subject: &str) -> BreakerAction {
        let count = self
            .state
            .entry((code.to_string(), subject.to_string()))
            .or_insert(0);
        *count += 1;

        if *count >= self.max_attempts {
            BreakerAction::GiveUp
        } else if *count == self.max_attempts - 1 {
            BreakerAction::WiderContext
        } else {
            BreakerAction::Retry
        }
    }

    /// Record every error-level diagnostic of a failed gate; the most
    /// escalated action wins.
    pub fn record_diagnostics(&mut self, diagnostics: &[Diagnostic]) -> BreakerAction {
        let mut action = BreakerAction::Retry;
        for d in diagnostics.iter().filter(|d| d.is_error()) {
            let subject = d
                .key
                .as_ref()
                .map(|k| k.canonical())
                .unwrap_or_else(|| UNATTRIBUTED.to_string());
            action = action.max(self.record_failure(&d.code, &subject));
        }
        action
    }

    /// Resets the counter for this (code, subject).
    pub fn record_success(&mut self, code: &str, subject: &str) {
        self.state.remove(&(code.to_string(), subject.to_string()));
    }

    /// Forget everything, e.g. after the gate passed.
    pub fn reset(&mut self) {
        self.state.clear();
    }

    pub fn failure_count(&self, code: &str, subject: &str) -> u32 {
        self.state
            .get(&(code.to_string(), subject.to_string()))
            .copied()
            .unwrap_or(0)
    }
}
