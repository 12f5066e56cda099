//! # Messaging Module
//!
//! Queue broker protocol and message formats for the pipeline. Queues are
//! ordered, at-least-once, durable mailboxes identified by name only;
//! producers and consumers never know about each other. The production
//! backend is PostgreSQL message queues (pgmq); an in-memory backend backs
//! the test suites and single-process development.

pub mod errors;
pub mod memory;
pub mod message;
pub mod pgmq_client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use errors::{MessagingError, MessagingResult};
pub use memory::InMemoryQueueClient;
pub use message::{JobEnvelope, MessageHeaders, StageMessage};
pub use pgmq_client::PgmqClient;

/// A message handed to a consumer, with the broker-side delivery state
/// needed for the redelivery decision.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned message id, used for ack/reject
    pub msg_id: i64,
    /// How many times the broker has delivered this message (1 = first)
    pub read_ct: i32,
    /// The serialized message payload
    pub payload: serde_json::Value,
}

impl Delivery {
    /// Whether the broker has already returned this message to its queue
    /// once. A redelivered message gets no further requeue budget.
    pub fn redelivered(&self) -> bool {
        self.read_ct > 1
    }
}

/// Queue depth snapshot for operator tooling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub queue_name: String,
    pub message_count: i64,
    pub oldest_message_age_seconds: Option<i64>,
}

/// Broker protocol used by every consumer and router.
///
/// Implementations must give at-least-once semantics: a message read with a
/// visibility timeout reappears (with an incremented read count) unless it is
/// acked before the timeout lapses.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Declare a queue, create-if-absent. Safe to call from any component
    /// before first use.
    async fn create_queue(&self, queue_name: &str) -> MessagingResult<()>;

    /// Publish a persistent message
    async fn publish_json(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
    ) -> MessagingResult<i64>;

    /// Pull at most one message, invisible to siblings for
    /// `visibility_timeout`. One-in-flight discipline is the caller's:
    /// consumers do not read again until the previous delivery is settled.
    async fn read_one(
        &self,
        queue_name: &str,
        visibility_timeout: Duration,
    ) -> MessagingResult<Option<Delivery>>;

    /// Acknowledge (permanently remove) a delivered message
    async fn ack(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()>;

    /// Reject a delivered message. With `requeue` the broker returns it to
    /// the front of its queue for redelivery; without, the message is
    /// dropped.
    async fn reject(&self, queue_name: &str, msg_id: i64, requeue: bool) -> MessagingResult<()>;

    /// Depth snapshot for health reporting
    async fn queue_metrics(&self, queue_name: &str) -> MessagingResult<QueueMetrics>;
}
