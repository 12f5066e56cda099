//! Circuit breaker tuning parameters.

use std::time::Duration;

/// Tuning for one stage's circuit breaker.
///
/// Every field is explicit; the [`Default`] values are the ones the pipeline
/// has been operated with (threshold 5, 30s cooldown, 2 probe successes,
/// 5s monitor tick) rather than silent assumptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive failures while closed before the circuit opens
    pub failure_threshold: u32,

    /// How long the circuit stays open before recovery probing may begin
    pub reset_timeout: Duration,

    /// Consecutive half-open successes required to close the circuit
    pub half_open_success_threshold: u32,

    /// Tick interval of the background monitor that moves an expired open
    /// circuit to half-open
    pub monitor_interval: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_success_threshold: 2,
            monitor_interval: Duration::from_secs(5),
        }
    }
}
