//! # In-Memory Queue Client
//!
//! Broker backend for the test suites and single-process development. Honors
//! the same at-least-once contract as pgmq: a read makes the message
//! invisible until settled, reject-with-requeue returns it to the front of
//! its queue, and every delivery increments the read count.

use super::{Delivery, MessagingError, MessagingResult, QueueClient, QueueMetrics};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredMessage {
    msg_id: i64,
    read_ct: i32,
    payload: serde_json::Value,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    in_flight: HashMap<i64, StoredMessage>,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    next_msg_id: i64,
}

/// Process-local broker with named durable-for-the-process queues
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueueClient {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryQueueClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently ready on a queue (excludes in-flight)
    pub fn depth(&self, queue_name: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue_name)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// Pop a ready message without the delivery bookkeeping; test helper for
    /// inspecting what a stage forwarded.
    pub fn take_ready(&self, queue_name: &str) -> Option<serde_json::Value> {
        let mut state = self.state.lock();
        state
            .queues
            .get_mut(queue_name)?
            .ready
            .pop_front()
            .map(|m| m.payload)
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueClient {
    async fn create_queue(&self, queue_name: &str) -> MessagingResult<()> {
        let mut state = self.state.lock();
        state.queues.entry(queue_name.to_string()).or_default();
        Ok(())
    }

    async fn publish_json(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
    ) -> MessagingResult<i64> {
        let mut state = self.state.lock();
        state.next_msg_id += 1;
        let msg_id = state.next_msg_id;

        let queue = state.queues.entry(queue_name.to_string()).or_default();
        queue.ready.push_back(StoredMessage {
            msg_id,
            read_ct: 0,
            payload: payload.clone(),
        });
        Ok(msg_id)
    }

    async fn read_one(
        &self,
        queue_name: &str,
        _visibility_timeout: Duration,
    ) -> MessagingResult<Option<Delivery>> {
        let mut state = self.state.lock();
        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let Some(mut message) = queue.ready.pop_front() else {
            return Ok(None);
        };
        message.read_ct += 1;

        let delivery = Delivery {
            msg_id: message.msg_id,
            read_ct: message.read_ct,
            payload: message.payload.clone(),
        };
        queue.in_flight.insert(message.msg_id, message);
        Ok(Some(delivery))
    }

    async fn ack(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()> {
        let mut state = self.state.lock();
        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        queue.in_flight.remove(&msg_id).ok_or_else(|| {
            MessagingError::queue_operation(queue_name, "ack", format!("unknown msg {msg_id}"))
        })?;
        Ok(())
    }

    async fn reject(&self, queue_name: &str, msg_id: i64, requeue: bool) -> MessagingResult<()> {
        let mut state = self.state.lock();
        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let message = queue.in_flight.remove(&msg_id).ok_or_else(|| {
            MessagingError::queue_operation(queue_name, "reject", format!("unknown msg {msg_id}"))
        })?;

        if requeue {
            queue.ready.push_front(message);
        }
        Ok(())
    }

    async fn queue_metrics(&self, queue_name: &str) -> MessagingResult<QueueMetrics> {
        Ok(QueueMetrics {
            queue_name: queue_name.to_string(),
            message_count: self.depth(queue_name) as i64,
            oldest_message_age_seconds: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VT: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn delivers_each_message_to_exactly_one_reader() {
        let broker = InMemoryQueueClient::new();
        broker.create_queue("q").await.unwrap();
        broker.publish_json("q", &json!({"n": 1})).await.unwrap();

        let first = broker.read_one("q", VT).await.unwrap();
        let second = broker.read_one("q", VT).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none(), "in-flight message must not be re-read");
    }

    #[tokio::test]
    async fn requeued_message_returns_to_front_with_bumped_read_count() {
        let broker = InMemoryQueueClient::new();
        broker.create_queue("q").await.unwrap();
        broker.publish_json("q", &json!({"n": 1})).await.unwrap();
        broker.publish_json("q", &json!({"n": 2})).await.unwrap();

        let delivery = broker.read_one("q", VT).await.unwrap().unwrap();
        assert_eq!(delivery.read_ct, 1);
        assert!(!delivery.redelivered());

        broker.reject("q", delivery.msg_id, true).await.unwrap();

        let redelivered = broker.read_one("q", VT).await.unwrap().unwrap();
        assert_eq!(redelivered.msg_id, delivery.msg_id, "requeue goes to the front");
        assert_eq!(redelivered.read_ct, 2);
        assert!(redelivered.redelivered());
    }

    #[tokio::test]
    async fn ack_settles_and_reject_without_requeue_drops() {
        let broker = InMemoryQueueClient::new();
        broker.create_queue("q").await.unwrap();
        broker.publish_json("q", &json!({"n": 1})).await.unwrap();
        broker.publish_json("q", &json!({"n": 2})).await.unwrap();

        let d1 = broker.read_one("q", VT).await.unwrap().unwrap();
        broker.ack("q", d1.msg_id).await.unwrap();

        let d2 = broker.read_one("q", VT).await.unwrap().unwrap();
        broker.reject("q", d2.msg_id, false).await.unwrap();

        assert_eq!(broker.depth("q"), 0);
        assert!(broker.read_one("q", VT).await.unwrap().is_none());
    }
}
