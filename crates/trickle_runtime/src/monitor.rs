//! Incremental delivery metrics.

use serde::{Deserialize, Serialize};

/// Counters for one incremental execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalMetrics {
    /// Calls registered
    pub calls_enqueued: u64,
    /// Calls whose invocation started
    pub calls_invoked: u64,
    /// Calls that produced a payload
    pub calls_completed: u64,
    /// Payloads delivered to the sink
    pub payloads_emitted: u64,
    /// Field errors embedded in payloads
    pub field_errors: u64,
    /// Stream-terminating failures
    pub fatal_errors: u64,
    /// Most calls running at once
    pub peak_in_flight: u64,
}

impl IncrementalMetrics {
    /// Create new metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an invocation start with the number of calls now running
    pub fn record_invocation(&mut self, in_flight: usize) {
        self.calls_invoked += 1;
        self.peak_in_flight = self.peak_in_flight.max(in_flight as u64);
    }

    /// Record a completed call and its field errors
    pub fn record_completion(&mut self, field_errors: usize) {
        self.calls_completed += 1;
        self.field_errors += field_errors as u64;
    }

    /// Record a payload delivery
    pub fn record_emission(&mut self) {
        self.payloads_emitted += 1;
    }

    /// Record a fatal failure
    pub fn record_fatal(&mut self) {
        self.fatal_errors += 1;
    }

    /// Share of invoked calls that completed (0.0 - 1.0)
    #[must_use]
    pub fn completion_rate(&self) -> f64 {
        if self.calls_invoked == 0 {
            return 1.0;
        }
        self.calls_completed as f64 / self.calls_invoked as f64
    }

    /// Field errors per completed call
    #[must_use]
    pub fn errors_per_call(&self) -> f64 {
        if self.calls_completed == 0 {
            return 0.0;
        }
        self.field_errors as f64 / self.calls_completed as f64
    }

    /// Calls registered but not yet delivered
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.calls_enqueued.saturating_sub(self.payloads_emitted)
    }

    /// Reset metrics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
