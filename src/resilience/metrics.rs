//! Circuit breaker observability snapshot.

use super::circuit_breaker::CircuitState;
use serde::Serialize;

/// Point-in-time view of one breaker, for logging and health endpoints.
///
/// Snapshots are observational only; no routing decision reads them.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    /// Stage the breaker guards
    pub stage: String,
    /// Current state at snapshot time
    pub state: CircuitState,
    /// Total calls delegated (rejected fast-fail calls are not delegated)
    pub total_calls: u64,
    /// Delegated calls that succeeded
    pub success_count: u64,
    /// Delegated calls that failed
    pub failure_count: u64,
    /// Consecutive failures in the current closed window
    pub consecutive_failures: u32,
    /// Probe successes in the current half-open window
    pub half_open_successes: u32,
}
