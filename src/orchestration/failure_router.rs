//! # Failure Router
//!
//! Sideways and terminal failure handling. The error-queue consumer drains
//! circuit-open casualties back into the main input queue once the stage's
//! breaker closes; the DLQ observer is purely observational - the DLQ is the
//! terminal state for a message and nothing auto-replays it.

use crate::messaging::{MessagingResult, QueueClient, StageMessage};
use crate::orchestration::topology::{StageQueues, ERROR_QUEUE_SOURCE};
use crate::resilience::{CircuitBreaker, CircuitState};
use crate::stages::StageKind;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What to do with an error-queue message while the circuit is still
/// open/half-open at drain time.
///
/// The source system silently dropped these; `Hold` keeps them queued for a
/// later drain pass instead. Either way the choice is explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorRetention {
    /// Ack and discard; recovery relies on alerting/human intervention
    Drop,
    /// Leave the message on the error queue until the circuit closes
    Hold,
}

/// Router tuning shared by all stages
#[derive(Debug, Clone)]
pub struct FailureRouterConfig {
    pub retention: ErrorRetention,
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
}

impl Default for FailureRouterConfig {
    fn default() -> Self {
        Self {
            retention: ErrorRetention::Drop,
            poll_interval: Duration::from_millis(500),
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

/// How one error-queue message was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterOutcome {
    /// Breaker closed: content re-published to the stage input queue
    Reinjected,
    /// Breaker still open/half-open: message acked and discarded
    Dropped,
    /// Breaker still open/half-open: message left queued
    Held,
}

/// Error-queue consumer for one stage.
pub struct FailureRouter<Q: QueueClient> {
    stage: StageKind,
    queues: StageQueues,
    breaker: Arc<CircuitBreaker>,
    broker: Arc<Q>,
    config: FailureRouterConfig,
}

impl<Q: QueueClient> FailureRouter<Q> {
    pub fn new(
        stage: StageKind,
        queues: StageQueues,
        breaker: Arc<CircuitBreaker>,
        broker: Arc<Q>,
        config: FailureRouterConfig,
    ) -> Self {
        Self {
            stage,
            queues,
            breaker,
            broker,
            config,
        }
    }

    /// Settle at most one error-queue message. `None` means the queue was
    /// empty.
    pub async fn drain_once(&self) -> MessagingResult<Option<RouterOutcome>> {
        let Some(delivery) = self
            .broker
            .read_one(self.queues.error, self.config.visibility_timeout)
            .await?
        else {
            return Ok(None);
        };

        let message = match StageMessage::from_json(delivery.payload.clone()) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    stage = %self.stage,
                    msg_id = delivery.msg_id,
                    error = %e,
                    "Malformed error-queue message, discarding"
                );
                self.broker.ack(self.queues.error, delivery.msg_id).await?;
                return Ok(Some(RouterOutcome::Dropped));
            }
        };

        // The decision reads the breaker state at drain time, not the state
        // that caused the failure.
        if self.breaker.state() == CircuitState::Closed {
            let mut reinjected = message.tagged_retried_from(ERROR_QUEUE_SOURCE);
            reinjected.headers.error = None;

            let payload = reinjected.to_json().map_err(|e| {
                crate::messaging::MessagingError::message_serialization(e.to_string())
            })?;
            self.broker.publish_json(self.queues.input, &payload).await?;
            self.broker.ack(self.queues.error, delivery.msg_id).await?;

            info!(
                stage = %self.stage,
                job_id = %reinjected.envelope.job_id,
                input_queue = %self.queues.input,
                "🔄 Circuit closed, re-injecting error-queue message"
            );
            return Ok(Some(RouterOutcome::Reinjected));
        }

        match self.config.retention {
            ErrorRetention::Drop => {
                warn!(
                    stage = %self.stage,
                    job_id = %message.envelope.job_id,
                    breaker_state = ?self.breaker.state(),
                    "Circuit not closed at drain time, dropping error-queue message"
                );
                self.broker.ack(self.queues.error, delivery.msg_id).await?;
                Ok(Some(RouterOutcome::Dropped))
            }
            ErrorRetention::Hold => {
                debug!(
                    stage = %self.stage,
                    job_id = %message.envelope.job_id,
                    "Circuit not closed, holding error-queue message"
                );
                self.broker
                    .reject(self.queues.error, delivery.msg_id, true)
                    .await?;
                Ok(Some(RouterOutcome::Held))
            }
        }
    }

    /// Drain until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(stage = %self.stage, queue = %self.queues.error, "🚑 Failure router started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.drain_once().await {
                // Held messages sit at the front of the queue; draining again
                // immediately would spin on them until the circuit closes.
                Ok(Some(RouterOutcome::Reinjected)) | Ok(Some(RouterOutcome::Dropped)) => {}
                Ok(Some(RouterOutcome::Held)) | Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        changed = shutdown.changed() => { if changed.is_err() { break; } }
                    }
                }
                Err(e) => {
                    error!(stage = %self.stage, error = %e, "Broker error in failure router");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        changed = shutdown.changed() => { if changed.is_err() { break; } }
                    }
                }
            }
        }

        info!(stage = %self.stage, "Failure router stopped");
    }
}

/// Observational DLQ consumer: surfaces terminally failed messages and their
/// failure metadata in the logs, performs no routing.
pub struct DlqObserver<Q: QueueClient> {
    stage: StageKind,
    queues: StageQueues,
    broker: Arc<Q>,
    config: FailureRouterConfig,
}

impl<Q: QueueClient> DlqObserver<Q> {
    pub fn new(
        stage: StageKind,
        queues: StageQueues,
        broker: Arc<Q>,
        config: FailureRouterConfig,
    ) -> Self {
        Self {
            stage,
            queues,
            broker,
            config,
        }
    }

    /// Log at most one DLQ message. `None` means the queue was empty.
    pub async fn observe_once(&self) -> MessagingResult<Option<()>> {
        let Some(delivery) = self
            .broker
            .read_one(self.queues.dlq, self.config.visibility_timeout)
            .await?
        else {
            return Ok(None);
        };

        match StageMessage::from_json(delivery.payload.clone()) {
            Ok(message) => {
                error!(
                    stage = %self.stage,
                    job_id = %message.envelope.job_id,
                    error = message.headers.error.as_deref().unwrap_or("unknown"),
                    processing_time_ms = message.headers.processing_time_ms,
                    timestamp = %message.headers.timestamp,
                    "💀 Permanently failed message"
                );
            }
            Err(_) => {
                error!(
                    stage = %self.stage,
                    payload = %delivery.payload,
                    "💀 Permanently failed message (unparseable)"
                );
            }
        }

        self.broker.ack(self.queues.dlq, delivery.msg_id).await?;
        Ok(Some(()))
    }

    /// Observe until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(stage = %self.stage, queue = %self.queues.dlq, "👀 DLQ observer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.observe_once().await {
                Ok(Some(())) => {}
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        changed = shutdown.changed() => { if changed.is_err() { break; } }
                    }
                }
                Err(e) => {
                    error!(stage = %self.stage, error = %e, "Broker error in DLQ observer");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        changed = shutdown.changed() => { if changed.is_err() { break; } }
                    }
                }
            }
        }

        info!(stage = %self.stage, "DLQ observer stopped");
    }
}
