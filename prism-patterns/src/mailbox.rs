//! The mailbox pattern
//!
//! Composes a `message_source` slot (pub/sub) with a `table_writer` and an
//! optional `table_reader`: every message published to the configured topic
//! becomes a durable mailbox event.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use prism::error::{PrismError, Result};
use prism::pattern::{bind, PatternConfig, PatternHandler};
use prism::protocol::frame::{
    ConsumerProtocol, GovernanceMetadata, HealthReport, TopicExpectation,
};
use prism::slots::{
    Capability, MailboxEvent, PubSub, SlotRequirement, TableReader, TableWriter,
};

const DEFAULT_TOPIC: &str = "evt.>";

/// Durable mailbox over a message source and an event table
pub struct MailboxPattern {
    topic: String,
    subscriber_id: String,
    source: Option<Arc<dyn PubSub>>,
    writer: Option<Arc<dyn TableWriter>>,
    reader: Option<Arc<dyn TableReader>>,
    namespace: String,
    retention_days: Option<u32>,
    consume_task: Option<JoinHandle<()>>,
    events_written: Arc<AtomicU64>,
}

impl MailboxPattern {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            subscriber_id: format!("mailbox-{}", namespace),
            source: None,
            writer: None,
            reader: None,
            namespace,
            retention_days: None,
            consume_task: None,
            events_written: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Events persisted since start
    pub fn events_written(&self) -> u64 {
        self.events_written.load(Ordering::Relaxed)
    }

    /// The bound reader, when the optional slot was configured
    pub fn reader(&self) -> Option<Arc<dyn TableReader>> {
        self.reader.clone()
    }

    fn requirement(&self, slot: &str) -> SlotRequirement {
        match slot {
            "message_source" => SlotRequirement::required(slot, vec![Capability::PubSub]),
            "table_writer" => SlotRequirement::required(slot, vec![Capability::TableWrite]),
            _ => SlotRequirement::optional(slot, vec![Capability::TableRead]),
        }
    }
}

#[async_trait]
impl PatternHandler for MailboxPattern {
    fn name(&self) -> &str {
        "mailbox"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn interface_declarations(&self) -> Vec<String> {
        vec![
            "pattern_mailbox".to_string(),
            "pattern_consumer".to_string(),
        ]
    }

    fn slot_requirements(&self) -> Vec<SlotRequirement> {
        vec![
            self.requirement("message_source"),
            self.requirement("table_writer"),
            self.requirement("table_reader"),
        ]
    }

    fn consumer_protocol(&self) -> Option<ConsumerProtocol> {
        Some(ConsumerProtocol {
            topics: vec![TopicExpectation {
                topic: self.topic.clone(),
                schema_id: None,
            }],
            governance: GovernanceMetadata {
                team: "data-platform".to_string(),
                purpose: "durable mailbox of published events".to_string(),
                data_usage: "storage".to_string(),
                pii_access: "none".to_string(),
                retention_days: self.retention_days,
                access_pattern: "append".to_string(),
                ..Default::default()
            },
        })
    }

    async fn initialize(&mut self, config: PatternConfig) -> Result<()> {
        if let Some(topic) = config.behavior.topic.clone() {
            self.topic = topic;
        }
        if let Some(group) = config.behavior.consumer_group.clone() {
            self.subscriber_id = group;
        }
        self.retention_days = config.behavior.retention_days;

        let source_config = config.slot("message_source").ok_or_else(|| {
            PrismError::validation("slots.message_source", "slot configuration is required")
        })?;
        let bound = bind(&self.requirement("message_source"), source_config).await?;
        self.source = bound.as_pubsub();
        if self.source.is_none() {
            return Err(PrismError::interface_not_supported("message_source", "Subscribe").into());
        }

        let writer_config = config.slot("table_writer").ok_or_else(|| {
            PrismError::validation("slots.table_writer", "slot configuration is required")
        })?;
        let bound = bind(&self.requirement("table_writer"), writer_config).await?;
        self.reader = bound.as_table_reader();
        self.writer = bound.as_table_writer();
        if self.writer.is_none() {
            return Err(
                PrismError::interface_not_supported("table_writer", "WriteEvent").into(),
            );
        }

        // An explicit table_reader slot overrides the writer-side view.
        if let Some(reader_config) = config.slot("table_reader") {
            let bound = bind(&self.requirement("table_reader"), reader_config).await?;
            self.reader = bound.as_table_reader();
        }

        tracing::info!(
            topic = %self.topic,
            namespace = %self.namespace,
            "Mailbox initialized"
        );
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| PrismError::internal("start before initialize"))?;
        let writer = self
            .writer
            .clone()
            .ok_or_else(|| PrismError::internal("start before initialize"))?;

        if let Some(days) = self.retention_days {
            let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
            let removed = writer.delete_old_events(cutoff).await?;
            if removed > 0 {
                tracing::info!(removed, "Expired events removed at start");
            }
        }

        let mut stream = source.subscribe(&self.topic, &self.subscriber_id).await?;
        let namespace = self.namespace.clone();
        let counter = self.events_written.clone();
        self.consume_task = Some(tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let event = MailboxEvent::from_message(&message, namespace.clone());
                match writer.write_event(&event).await {
                    Ok(()) => {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::error!(
                            message_id = %event.message_id,
                            "Failed persisting event: {}",
                            e
                        );
                    }
                }
            }
            tracing::info!("Mailbox subscription ended");
        }));
        tracing::info!(topic = %self.topic, "Mailbox consuming");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(source) = self.source.clone() {
            source.unsubscribe(&self.topic, &self.subscriber_id).await?;
        }
        if let Some(task) = self.consume_task.take() {
            // unsubscribe ends the stream; awaiting lets the last write land
            let _ = task.await;
        }
        tracing::info!("Mailbox stopped");
        Ok(())
    }

    async fn health(&self) -> HealthReport {
        let consuming = self
            .consume_task
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false);
        if consuming {
            HealthReport::healthy("consuming")
                .with_detail("topic", self.topic.clone())
                .with_detail("events_written", self.events_written().to_string())
        } else {
            HealthReport::unhealthy("subscription is not active")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism::protocol::frame::HealthStatus;
    use prism::slots::EventFilter;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn config() -> PatternConfig {
        PatternConfig::from_value(&json!({
            "slots": {
                "message_source": {"backend": "memory_pubsub"},
                "table_writer": {"backend": "sqlite"}
            },
            "behavior": {"topic": "evt.orders", "consumer_group": "mb-test"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_consume_and_persist() {
        let mut mailbox = MailboxPattern::new("mailbox-x");
        mailbox.initialize(config()).await.unwrap();
        mailbox.start().await.unwrap();

        let source = mailbox.source.clone().unwrap();
        source
            .publish(
                "evt.orders",
                b"order-1".to_vec(),
                HashMap::from([("principal".to_string(), "alice".to_string())]),
            )
            .await
            .unwrap();

        // allow the consume task to land the write
        for _ in 0..50 {
            if mailbox.events_written() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(mailbox.events_written(), 1);

        let reader = mailbox.reader().unwrap();
        let events = reader.query_events(&EventFilter::default()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].namespace, "mailbox-x");
        assert_eq!(events[0].topic, "evt.orders");
        assert_eq!(events[0].principal.as_deref(), Some("alice"));
        assert_eq!(events[0].body, b"order-1");

        mailbox.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_health_reflects_subscription() {
        let mut mailbox = MailboxPattern::new("mailbox-x");
        mailbox.initialize(config()).await.unwrap();
        assert_eq!(mailbox.health().await.status, HealthStatus::Unhealthy);

        mailbox.start().await.unwrap();
        assert_eq!(mailbox.health().await.status, HealthStatus::Healthy);

        mailbox.stop().await.unwrap();
        assert_eq!(mailbox.health().await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_missing_slot_fails_initialize() {
        let mut mailbox = MailboxPattern::new("mailbox-x");
        let config = PatternConfig::from_value(&json!({
            "slots": {"message_source": {"backend": "memory_pubsub"}}
        }))
        .unwrap();
        let err = mailbox.initialize(config).await.unwrap_err();
        assert_eq!(
            err.status().unwrap().code,
            prism::error::ErrorCode::ValidationFailed
        );
    }

    #[tokio::test]
    async fn test_wrong_backend_capability_fails_initialize() {
        // a kv backend cannot serve the table_writer slot
        let mut mailbox = MailboxPattern::new("mailbox-x");
        let config = PatternConfig::from_value(&json!({
            "slots": {
                "message_source": {"backend": "memory_pubsub"},
                "table_writer": {"backend": "memory"}
            }
        }))
        .unwrap();
        let err = mailbox.initialize(config).await.unwrap_err();
        let status = err.status().unwrap();
        assert_eq!(
            status.code,
            prism::error::ErrorCode::InterfaceNotSupported
        );
        assert!(status.message.contains("WriteEvent"));
    }

    #[tokio::test]
    async fn test_stop_is_repeatable() {
        let mut mailbox = MailboxPattern::new("mailbox-x");
        mailbox.initialize(config()).await.unwrap();
        mailbox.start().await.unwrap();
        mailbox.stop().await.unwrap();
        mailbox.stop().await.unwrap();
    }
}
