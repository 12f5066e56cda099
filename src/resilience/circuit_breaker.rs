//! # Circuit Breaker
//!
//! Fail-fast guard around each stage's external operation. The breaker is the
//! only mutable state shared between sibling consumers of a stage, so all
//! transitions go through a single lock; delegation itself runs outside the
//! lock and stays concurrent while the circuit is closed or half-open.
//!
//! State machine:
//! - **Closed**: delegate every call; `failure_threshold` consecutive
//!   failures open the circuit and record the failure time.
//! - **Open**: reject every call immediately, no delegation, no count
//!   changes. A background monitor ticking every `monitor_interval` moves the
//!   circuit to half-open once `reset_timeout` has elapsed since the last
//!   failure.
//! - **HalfOpen**: delegate calls as live probes. `half_open_success_threshold`
//!   consecutive successes close the circuit; a single failure reopens it and
//!   resets the failure timestamp.

use super::config::BreakerSettings;
use super::metrics::BreakerSnapshot;
use crate::stages::StageKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, all calls delegated
    Closed = 0,
    /// Failing fast, no calls delegated
    Open = 1,
    /// Probing recovery with live calls
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

/// Error wrapper distinguishing a rejected call from a real operation failure
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// Circuit is open; the operation was never invoked
    #[error("circuit open for {stage} stage")]
    CircuitOpen { stage: StageKind },

    /// The operation ran and failed
    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, BreakerError::CircuitOpen { .. })
    }
}

/// Counters behind the transition lock
#[derive(Debug, Default)]
struct BreakerCounters {
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure_at: Option<Instant>,
    total_calls: u64,
    success_count: u64,
    failure_count: u64,
}

/// Per-stage circuit breaker; one instance per stage, process lifetime.
#[derive(Debug)]
pub struct CircuitBreaker {
    stage: StageKind,
    settings: BreakerSettings,
    /// Current state, readable without the lock
    state: AtomicU8,
    counters: Mutex<BreakerCounters>,
}

impl CircuitBreaker {
    pub fn new(stage: StageKind, settings: BreakerSettings) -> Self {
        info!(
            stage = %stage,
            failure_threshold = settings.failure_threshold,
            reset_timeout_secs = settings.reset_timeout.as_secs(),
            half_open_success_threshold = settings.half_open_success_threshold,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            stage,
            settings,
            state: AtomicU8::new(CircuitState::Closed as u8),
            counters: Mutex::new(BreakerCounters::default()),
        }
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Stage this breaker guards
    pub fn stage(&self) -> StageKind {
        self.stage
    }

    /// Execute an operation under breaker protection.
    ///
    /// Open circuits reject immediately without invoking the operation.
    /// Closed and half-open circuits delegate; the outcome feeds the state
    /// machine.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.state() == CircuitState::Open {
            debug!(stage = %self.stage, "⚡ Rejecting call, circuit open");
            return Err(BreakerError::CircuitOpen { stage: self.stage });
        }

        let result = operation().await;

        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }

        result.map_err(BreakerError::Operation)
    }

    fn record_success(&self) {
        let mut counters = self.counters.lock();
        counters.total_calls += 1;
        counters.success_count += 1;

        match self.state() {
            CircuitState::Closed => {
                counters.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                counters.half_open_successes += 1;
                if counters.half_open_successes >= self.settings.half_open_success_threshold {
                    self.state
                        .store(CircuitState::Closed as u8, Ordering::Release);
                    counters.consecutive_failures = 0;
                    counters.half_open_successes = 0;
                    counters.last_failure_at = None;
                    info!(stage = %self.stage, "🟢 Circuit breaker closed (recovered)");
                }
            }
            CircuitState::Open => {
                // An in-flight call that started before the circuit opened
                warn!(stage = %self.stage, "Success recorded while circuit open");
            }
        }
    }

    fn record_failure(&self) {
        let mut counters = self.counters.lock();
        counters.total_calls += 1;
        counters.failure_count += 1;

        match self.state() {
            CircuitState::Closed => {
                counters.consecutive_failures += 1;
                if counters.consecutive_failures >= self.settings.failure_threshold {
                    counters.last_failure_at = Some(Instant::now());
                    self.state.store(CircuitState::Open as u8, Ordering::Release);
                    error!(
                        stage = %self.stage,
                        consecutive_failures = counters.consecutive_failures,
                        "🔴 Circuit breaker opened (failing fast)"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // A single failed probe reopens the circuit
                counters.last_failure_at = Some(Instant::now());
                counters.half_open_successes = 0;
                self.state.store(CircuitState::Open as u8, Ordering::Release);
                error!(stage = %self.stage, "🔴 Circuit breaker reopened by failed probe");
            }
            CircuitState::Open => {
                // In-flight call from before the transition; state unchanged
            }
        }
    }

    /// One monitor pass: an open circuit whose cooldown has elapsed moves to
    /// half-open. Public so tests can drive the transition deterministically.
    pub fn monitor_tick(&self) {
        if self.state() != CircuitState::Open {
            return;
        }

        let mut counters = self.counters.lock();
        let cooled_down = counters
            .last_failure_at
            .map(|at| at.elapsed() >= self.settings.reset_timeout)
            .unwrap_or(true);

        if cooled_down {
            counters.half_open_successes = 0;
            self.state
                .store(CircuitState::HalfOpen as u8, Ordering::Release);
            info!(stage = %self.stage, "🟡 Circuit breaker half-open (probing recovery)");
        }
    }

    /// Spawn the background monitor that drives open → half-open transitions.
    pub fn spawn_monitor(
        self: Arc<Self>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let breaker = self;
        let mut ticker = tokio::time::interval(breaker.settings.monitor_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => breaker.monitor_tick(),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!(stage = %breaker.stage, "Breaker monitor stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Observability snapshot
    pub fn snapshot(&self) -> BreakerSnapshot {
        let counters = self.counters.lock();
        BreakerSnapshot {
            stage: self.stage.to_string(),
            state: self.state(),
            total_calls: counters.total_calls,
            success_count: counters.success_count,
            failure_count: counters.failure_count,
            consecutive_failures: counters.consecutive_failures,
            half_open_successes: counters.half_open_successes,
        }
    }
}
