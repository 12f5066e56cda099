//! # Stage Consumer
//!
//! Competing consumer bound to one stage's input queue. Each consumer pulls
//! one message at a time (strict one-in-flight: nothing else is read until
//! the current message reaches a terminal branch) and settles every message
//! with exactly one ack or reject.
//!
//! Terminal branches, in order of evaluation:
//! 1. Malformed or incomplete message → dead-letter queue.
//! 2. Cache hit → forward with `cached = true`, no invocation.
//! 3. Successful invocation (through retry wrapping the breaker) → cache the
//!    output, forward with fresh headers.
//! 4. Breaker open → original message to the stage error queue with
//!    `error = "circuit open"`.
//! 5. Non-retryable invocation failure → dead-letter queue.
//! 6. Transient failure: first delivery → reject-and-requeue (one broker
//!    redelivery budget); already redelivered → dead-letter queue.

use crate::cache::{stage_cache_key, CacheService};
use crate::messaging::{Delivery, MessagingResult, QueueClient, StageMessage};
use crate::orchestration::topology::StageQueues;
use crate::resilience::{retry_with_backoff, BreakerError, CircuitBreaker, RetryPolicy};
use crate::stages::{StageKind, StageService, StageServiceError};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Per-stage consumer tuning
#[derive(Debug, Clone)]
pub struct StageConsumerConfig {
    /// Size of the competing-consumer pool
    pub consumers: usize,
    /// How long a read message stays invisible before the broker returns it
    pub visibility_timeout: Duration,
    /// Idle sleep between polls of an empty queue
    pub poll_interval: Duration,
    /// Memoization TTL for this stage's outputs; `None` bypasses the cache
    pub cache_ttl: Option<Duration>,
}

impl Default for StageConsumerConfig {
    fn default() -> Self {
        Self {
            consumers: 3,
            visibility_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            cache_ttl: None,
        }
    }
}

/// How one delivery was settled; returned by [`StageConsumer::poll_once`]
/// so tests and logs can observe routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Output published to the successor queue
    Forwarded { cached: bool },
    /// Circuit open: original message moved to the stage error queue
    RoutedToErrorQueue,
    /// First transient failure: returned to the input queue for redelivery
    Requeued,
    /// Terminal failure: moved to the dead-letter queue
    DeadLettered,
}

/// One competing consumer for one stage.
pub struct StageConsumer<Q: QueueClient> {
    consumer_id: String,
    stage: StageKind,
    queues: StageQueues,
    service: Arc<dyn StageService>,
    breaker: Arc<CircuitBreaker>,
    cache: CacheService,
    broker: Arc<Q>,
    retry_policy: RetryPolicy,
    config: StageConsumerConfig,
}

impl<Q: QueueClient> StageConsumer<Q> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        stage: StageKind,
        queues: StageQueues,
        service: Arc<dyn StageService>,
        breaker: Arc<CircuitBreaker>,
        cache: CacheService,
        broker: Arc<Q>,
        retry_policy: RetryPolicy,
        config: StageConsumerConfig,
    ) -> Self {
        Self {
            consumer_id: format!("{stage}-consumer-{index}"),
            stage,
            queues,
            service,
            breaker,
            cache,
            broker,
            retry_policy,
            config,
        }
    }

    /// Pull and settle at most one message. `None` means the queue was empty.
    pub async fn poll_once(&self) -> MessagingResult<Option<MessageOutcome>> {
        let delivery = self
            .broker
            .read_one(self.queues.input, self.config.visibility_timeout)
            .await?;

        match delivery {
            Some(delivery) => Ok(Some(self.process_delivery(delivery).await?)),
            None => Ok(None),
        }
    }

    /// Consume until shutdown. Idle polls sleep `poll_interval`; a busy queue
    /// is drained without sleeping.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            consumer = %self.consumer_id,
            queue = %self.queues.input,
            "🚀 Stage consumer started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once().await {
                Ok(Some(outcome)) => {
                    debug!(consumer = %self.consumer_id, ?outcome, "Message settled");
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        changed = shutdown.changed() => { if changed.is_err() { break; } }
                    }
                }
                Err(e) => {
                    error!(consumer = %self.consumer_id, error = %e, "Broker error in consumer loop");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        changed = shutdown.changed() => { if changed.is_err() { break; } }
                    }
                }
            }
        }

        info!(consumer = %self.consumer_id, "Stage consumer stopped");
    }

    async fn process_delivery(&self, delivery: Delivery) -> MessagingResult<MessageOutcome> {
        let started = Instant::now();

        let message = match StageMessage::from_json(delivery.payload.clone()) {
            Ok(message) => message,
            Err(e) => {
                // Unparseable payloads can never be retried; keep the raw
                // payload alongside the cause so operators can inspect it.
                warn!(
                    consumer = %self.consumer_id,
                    msg_id = delivery.msg_id,
                    error = %e,
                    "Malformed stage message, dead-lettering"
                );
                let tombstone = json!({
                    "payload": delivery.payload,
                    "error": format!("malformed stage message: {e}"),
                });
                self.broker.publish_json(self.queues.dlq, &tombstone).await?;
                self.broker.ack(self.queues.input, delivery.msg_id).await?;
                return Ok(MessageOutcome::DeadLettered);
            }
        };

        let Some(input) = message.envelope.stage_input(self.stage).map(str::to_string) else {
            return self
                .dead_letter(&message, delivery.msg_id, "missing stage input field", started)
                .await;
        };

        if let Err(e) = self.service.validate(&input) {
            return self
                .dead_letter(&message, delivery.msg_id, e.to_string(), started)
                .await;
        }

        let cache_key = self
            .config
            .cache_ttl
            .map(|_| stage_cache_key(self.stage, &input));

        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache.get(key).await {
                debug!(
                    consumer = %self.consumer_id,
                    job_id = %message.envelope.job_id,
                    "💾 Cache hit, skipping invocation"
                );
                return self
                    .forward(&message, hit, true, started, delivery.msg_id)
                    .await;
            }
        }

        let result = retry_with_backoff(self.retry_policy, || {
            let service = Arc::clone(&self.service);
            let input = input.clone();
            let stage = self.stage;
            self.breaker.execute(move || async move {
                let output = service.invoke(&input).await?;
                if output.trim().is_empty() {
                    return Err(StageServiceError::transient(
                        stage,
                        "stage produced empty output",
                    ));
                }
                Ok(output)
            })
        })
        .await;

        match result {
            Ok(output) => {
                // Only confirmed successes are memoized
                if let (Some(key), Some(ttl)) = (&cache_key, self.config.cache_ttl) {
                    self.cache.set(key, &output, ttl).await;
                }
                self.forward(&message, output, false, started, delivery.msg_id)
                    .await
            }
            Err(BreakerError::CircuitOpen { .. }) => {
                // The breaker-open path is not a retry candidate on the main
                // queue; the failure router owns recovery from here.
                warn!(
                    consumer = %self.consumer_id,
                    job_id = %message.envelope.job_id,
                    error_queue = %self.queues.error,
                    "⚡ Circuit open, routing to error queue"
                );
                let errored = message.with_error("circuit open", elapsed_ms(started));
                self.broker
                    .publish_json(self.queues.error, &to_payload(&errored)?)
                    .await?;
                self.broker.ack(self.queues.input, delivery.msg_id).await?;
                Ok(MessageOutcome::RoutedToErrorQueue)
            }
            Err(BreakerError::Operation(err)) if !err.is_retryable() => {
                self.dead_letter(&message, delivery.msg_id, err.to_string(), started)
                    .await
            }
            Err(BreakerError::Operation(err)) => {
                if delivery.redelivered() {
                    self.dead_letter(&message, delivery.msg_id, err.to_string(), started)
                        .await
                } else {
                    warn!(
                        consumer = %self.consumer_id,
                        job_id = %message.envelope.job_id,
                        error = %err,
                        "First failure, rejecting for redelivery"
                    );
                    self.broker
                        .reject(self.queues.input, delivery.msg_id, true)
                        .await?;
                    Ok(MessageOutcome::Requeued)
                }
            }
        }
    }

    async fn forward(
        &self,
        message: &StageMessage,
        output: String,
        cached: bool,
        started: Instant,
        msg_id: i64,
    ) -> MessagingResult<MessageOutcome> {
        let advanced = message.envelope.with_stage_output(self.stage, output);
        let next = StageMessage::forward(advanced, elapsed_ms(started), cached);

        self.broker
            .publish_json(self.queues.output, &to_payload(&next)?)
            .await?;
        self.broker.ack(self.queues.input, msg_id).await?;

        info!(
            consumer = %self.consumer_id,
            job_id = %next.envelope.job_id,
            next_queue = %self.queues.output,
            cached,
            processing_time_ms = next.headers.processing_time_ms,
            "➡️ Stage complete, forwarded"
        );
        Ok(MessageOutcome::Forwarded { cached })
    }

    async fn dead_letter(
        &self,
        message: &StageMessage,
        msg_id: i64,
        cause: impl Into<String>,
        started: Instant,
    ) -> MessagingResult<MessageOutcome> {
        let cause = cause.into();
        error!(
            consumer = %self.consumer_id,
            job_id = %message.envelope.job_id,
            dlq = %self.queues.dlq,
            error = %cause,
            "💀 Dead-lettering message"
        );

        let terminal = message.with_error(cause, elapsed_ms(started));
        self.broker
            .publish_json(self.queues.dlq, &to_payload(&terminal)?)
            .await?;
        self.broker.ack(self.queues.input, msg_id).await?;
        Ok(MessageOutcome::DeadLettered)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn to_payload(message: &StageMessage) -> MessagingResult<serde_json::Value> {
    message
        .to_json()
        .map_err(|e| crate::messaging::MessagingError::message_serialization(e.to_string()))
}
