//! Pub/sub and queue slot contracts

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

use super::Backend;

/// A message flowing through a pub/sub or queue backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubSubMessage {
    /// Topic the message was published to
    pub topic: String,
    /// Opaque payload
    pub payload: Vec<u8>,
    /// Transport metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Backend-assigned message id
    pub message_id: String,
    /// Publish time
    pub timestamp: DateTime<Utc>,
}

impl PubSubMessage {
    /// Create a message with a fresh id and the current timestamp
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            metadata: HashMap::new(),
            message_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Publish/subscribe messaging
#[async_trait]
pub trait PubSub: Backend {
    /// Publish a payload; returns the backend-assigned message id
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<String>;

    /// Subscribe to a topic; the stream yields messages published after the
    /// subscription was established and ends on [`PubSub::unsubscribe`]
    async fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
    ) -> Result<BoxStream<'static, PubSubMessage>>;

    /// End the subscription identified by `subscriber_id`
    async fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> Result<()>;
}

/// Work-queue messaging with acknowledgement
#[async_trait]
pub trait Queue: Backend {
    /// Append a message to the queue
    async fn enqueue(&self, queue: &str, message: PubSubMessage) -> Result<()>;

    /// Receive messages; each yielded message is in-flight until acknowledged
    /// or rejected
    async fn receive(&self, queue: &str) -> Result<BoxStream<'static, PubSubMessage>>;

    /// Acknowledge an in-flight message
    async fn acknowledge(&self, queue: &str, message_id: &str) -> Result<()>;

    /// Reject an in-flight message, optionally requeueing it at the front
    async fn reject(&self, queue: &str, message_id: &str, requeue: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_round_trip() {
        let msg = PubSubMessage::new("evt.orders", b"payload".to_vec())
            .with_metadata("content-type", "application/json");
        let json = serde_json::to_string(&msg).unwrap();
        let back: PubSubMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
