//! In-memory work queue backend

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::error::{PrismError, Result};
use crate::slots::{Backend, Capability, PubSubMessage, Queue};

const CAPABILITIES: &[Capability] = &[Capability::Queue];

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<PubSubMessage>,
    in_flight: HashMap<String, PubSubMessage>,
}

#[derive(Debug, Default)]
struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// In-memory queue with in-flight tracking and requeue-on-reject
#[derive(Debug, Default)]
pub struct MemoryQueue {
    queues: DashMap<String, Arc<QueueInner>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &str) -> Arc<QueueInner> {
        self.queues
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

impl Backend for MemoryQueue {
    fn name(&self) -> &str {
        "memory_queue"
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn enqueue(&self, queue: &str, message: PubSubMessage) -> Result<()> {
        let inner = self.queue(queue);
        inner.state.lock().await.pending.push_back(message);
        inner.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<BoxStream<'static, PubSubMessage>> {
        let inner = self.queue(queue);
        let stream = futures::stream::unfold(inner, |inner| async move {
            loop {
                {
                    let mut state = inner.state.lock().await;
                    if let Some(message) = state.pending.pop_front() {
                        state
                            .in_flight
                            .insert(message.message_id.clone(), message.clone());
                        drop(state);
                        return Some((message, inner));
                    }
                }
                inner.notify.notified().await;
            }
        })
        .boxed();
        Ok(stream)
    }

    async fn acknowledge(&self, queue: &str, message_id: &str) -> Result<()> {
        let inner = self.queue(queue);
        let mut state = inner.state.lock().await;
        state
            .in_flight
            .remove(message_id)
            .map(|_| ())
            .ok_or_else(|| PrismError::not_found("in-flight message", message_id).into())
    }

    async fn reject(&self, queue: &str, message_id: &str, requeue: bool) -> Result<()> {
        let inner = self.queue(queue);
        let mut state = inner.state.lock().await;
        let message = state
            .in_flight
            .remove(message_id)
            .ok_or_else(|| crate::error::Error::from(PrismError::not_found("in-flight message", message_id)))?;
        if requeue {
            state.pending.push_front(message);
            inner.notify.notify_one();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_receive_acknowledge() {
        let q = MemoryQueue::new();
        let msg = PubSubMessage::new("work", b"job-1".to_vec());
        let id = msg.message_id.clone();
        q.enqueue("w", msg).await.unwrap();

        let mut stream = q.receive("w").await.unwrap();
        let received = stream.next().await.unwrap();
        assert_eq!(received.message_id, id);

        q.acknowledge("w", &id).await.unwrap();
        // double-ack is an error
        assert!(q.acknowledge("w", &id).await.is_err());
    }

    #[tokio::test]
    async fn test_reject_requeues_at_front() {
        let q = MemoryQueue::new();
        let first = PubSubMessage::new("work", b"first".to_vec());
        let second = PubSubMessage::new("work", b"second".to_vec());
        let first_id = first.message_id.clone();
        q.enqueue("w", first).await.unwrap();
        q.enqueue("w", second).await.unwrap();

        let mut stream = q.receive("w").await.unwrap();
        let got = stream.next().await.unwrap();
        assert_eq!(got.message_id, first_id);

        q.reject("w", &first_id, true).await.unwrap();
        let again = stream.next().await.unwrap();
        assert_eq!(again.message_id, first_id, "rejected message is redelivered first");
    }

    #[tokio::test]
    async fn test_reject_without_requeue_drops() {
        let q = MemoryQueue::new();
        let msg = PubSubMessage::new("work", b"x".to_vec());
        let id = msg.message_id.clone();
        q.enqueue("w", msg).await.unwrap();

        let mut stream = q.receive("w").await.unwrap();
        let _ = stream.next().await.unwrap();
        q.reject("w", &id, false).await.unwrap();

        let inner = q.queue("w");
        let state = inner.state.lock().await;
        assert!(state.pending.is_empty());
        assert!(state.in_flight.is_empty());
    }
}
