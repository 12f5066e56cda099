//! # PostgreSQL Message Queue Client (pgmq-rs)
//!
//! Production broker backend. pgmq gives the durability contract the
//! pipeline needs out of the box: queues survive broker restart, messages
//! persist until deleted, and the per-message `read_ct` is exactly the
//! redelivery signal the routing logic keys on.

use super::{Delivery, MessagingError, MessagingResult, QueueClient, QueueMetrics};
use async_trait::async_trait;
use pgmq::PGMQueue;
use std::time::Duration;
use tracing::{debug, info};

/// pgmq-backed queue client
#[derive(Debug, Clone)]
pub struct PgmqClient {
    pgmq: PGMQueue,
}

impl PgmqClient {
    /// Connect using a PostgreSQL connection string
    pub async fn new(database_url: &str) -> MessagingResult<Self> {
        info!("🚀 Connecting to pgmq");

        let pgmq = PGMQueue::new(database_url.to_string())
            .await
            .map_err(|e| MessagingError::connection(e.to_string()))?;

        info!("✅ Connected to pgmq");
        Ok(Self { pgmq })
    }
}

#[async_trait]
impl QueueClient for PgmqClient {
    async fn create_queue(&self, queue_name: &str) -> MessagingResult<()> {
        debug!(queue = %queue_name, "📋 Declaring queue");

        self.pgmq.create(queue_name).await.map_err(|e| {
            MessagingError::queue_operation(queue_name, "create", e.to_string())
        })?;

        Ok(())
    }

    async fn publish_json(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
    ) -> MessagingResult<i64> {
        let msg_id = self.pgmq.send(queue_name, payload).await.map_err(|e| {
            MessagingError::queue_operation(queue_name, "send", e.to_string())
        })?;

        debug!(queue = %queue_name, msg_id, "📤 Message published");
        Ok(msg_id)
    }

    async fn read_one(
        &self,
        queue_name: &str,
        visibility_timeout: Duration,
    ) -> MessagingResult<Option<Delivery>> {
        let vt = visibility_timeout.as_secs().min(i32::MAX as u64) as i32;

        let message = self
            .pgmq
            .read::<serde_json::Value>(queue_name, Some(vt))
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "read", e.to_string()))?;

        Ok(message.map(|m| Delivery {
            msg_id: m.msg_id,
            read_ct: m.read_ct,
            payload: m.message,
        }))
    }

    async fn ack(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()> {
        self.pgmq.delete(queue_name, msg_id).await.map_err(|e| {
            MessagingError::queue_operation(queue_name, "delete", e.to_string())
        })?;

        debug!(queue = %queue_name, msg_id, "✅ Message acked");
        Ok(())
    }

    async fn reject(&self, queue_name: &str, msg_id: i64, requeue: bool) -> MessagingResult<()> {
        if requeue {
            // Zeroing the visibility timeout returns the message to the
            // queue immediately; pgmq bumps read_ct on the next delivery.
            self.pgmq
                .set_vt::<serde_json::Value>(queue_name, msg_id, chrono::Utc::now())
                .await
                .map_err(|e| {
                    MessagingError::queue_operation(queue_name, "set_vt", e.to_string())
                })?;
            debug!(queue = %queue_name, msg_id, "↩️ Message rejected, requeued");
        } else {
            self.pgmq.delete(queue_name, msg_id).await.map_err(|e| {
                MessagingError::queue_operation(queue_name, "delete", e.to_string())
            })?;
            debug!(queue = %queue_name, msg_id, "🗑️ Message rejected, dropped");
        }
        Ok(())
    }

    async fn queue_metrics(&self, queue_name: &str) -> MessagingResult<QueueMetrics> {
        // pgmq exposes depth through its SQL metrics function; the crate
        // surface does not wrap it, so depth reporting comes from the
        // in-memory backend and operator SQL for now.
        Ok(QueueMetrics {
            queue_name: queue_name.to_string(),
            message_count: 0,
            oldest_message_age_seconds: None,
        })
    }
}
