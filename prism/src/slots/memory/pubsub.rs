//! In-memory pub/sub backend
//!
//! Fan-out uses a broadcast channel per topic; subscriptions end through a
//! cancellation token so `unsubscribe` terminates the subscriber's stream.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::slots::{Backend, Capability, PubSub, PubSubMessage};

const CAPABILITIES: &[Capability] = &[Capability::PubSub];

const TOPIC_BUFFER: usize = 256;

/// In-memory pub/sub over per-topic broadcast channels
#[derive(Debug, Default)]
pub struct MemoryPubSub {
    topics: DashMap<String, broadcast::Sender<PubSubMessage>>,
    subscriptions: DashMap<(String, String), CancellationToken>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic_sender(&self, topic: &str) -> broadcast::Sender<PubSubMessage> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_BUFFER).0)
            .clone()
    }
}

impl Backend for MemoryPubSub {
    fn name(&self) -> &str {
        "memory_pubsub"
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        let mut message = PubSubMessage::new(topic, payload);
        message.metadata = metadata;
        let message_id = message.message_id.clone();
        // A send error only means no subscriber is currently attached.
        let _ = self.topic_sender(topic).send(message);
        Ok(message_id)
    }

    async fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
    ) -> Result<BoxStream<'static, PubSubMessage>> {
        let receiver = self.topic_sender(topic).subscribe();
        let token = CancellationToken::new();
        self.subscriptions
            .insert((topic.to_string(), subscriber_id.to_string()), token.clone());

        let stream = BroadcastStream::new(receiver)
            .filter_map(|item| async move { item.ok() })
            .take_until(token.cancelled_owned())
            .boxed();
        Ok(stream)
    }

    async fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> Result<()> {
        if let Some((_, token)) = self
            .subscriptions
            .remove(&(topic.to_string(), subscriber_id.to_string()))
        {
            token.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = MemoryPubSub::new();
        let mut sub = bus.subscribe("evt.orders", "s1").await.unwrap();

        let id = bus
            .publish("evt.orders", b"hello".to_vec(), HashMap::new())
            .await
            .unwrap();

        let msg = sub.next().await.expect("message delivered");
        assert_eq!(msg.message_id, id);
        assert_eq!(msg.topic, "evt.orders");
        assert_eq!(msg.payload, b"hello");
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_stream() {
        let bus = MemoryPubSub::new();
        let mut sub = bus.subscribe("evt.orders", "s1").await.unwrap();
        bus.unsubscribe("evt.orders", "s1").await.unwrap();
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = MemoryPubSub::new();
        let mut sub = bus.subscribe("a", "s1").await.unwrap();
        bus.publish("b", b"other".to_vec(), HashMap::new()).await.unwrap();
        bus.publish("a", b"mine".to_vec(), HashMap::new()).await.unwrap();
        let msg = sub.next().await.unwrap();
        assert_eq!(msg.payload, b"mine");
    }
}
