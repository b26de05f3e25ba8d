//! Table writer/reader slot contracts
//!
//! The table slots persist durable mailbox events: the writer side is fed by
//! a consuming pattern, the reader side serves queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

use super::Backend;

/// A durable event persisted by a table writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxEvent {
    /// Unique message id
    pub message_id: String,
    /// Event time
    pub timestamp: DateTime<Utc>,
    /// Source topic
    pub topic: String,
    /// Payload content type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Schema reference, when the topic declares one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    /// Encryption marker for the body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<String>,
    /// Correlation id threaded from the producer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Principal that produced the event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Owning namespace
    pub namespace: String,
    /// Application headers
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
    /// Opaque body
    pub body: Vec<u8>,
}

impl MailboxEvent {
    /// Build an event from a pub/sub message for the given namespace
    pub fn from_message(msg: &super::PubSubMessage, namespace: impl Into<String>) -> Self {
        Self {
            message_id: msg.message_id.clone(),
            timestamp: msg.timestamp,
            topic: msg.topic.clone(),
            content_type: msg.metadata.get("content-type").cloned(),
            schema_id: msg.metadata.get("schema-id").cloned(),
            encryption: msg.metadata.get("encryption").cloned(),
            correlation_id: msg.metadata.get("correlation-id").cloned(),
            principal: msg.metadata.get("principal").cloned(),
            namespace: namespace.into(),
            custom_headers: msg
                .metadata
                .iter()
                .filter(|(k, _)| k.starts_with("x-"))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            body: msg.payload.clone(),
        }
    }
}

/// Filter for event queries; empty fields match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Inclusive lower bound on timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// Topics to match; empty matches all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    /// Principals to match; empty matches all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub principals: Vec<String>,
    /// Exact correlation id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Maximum rows returned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Rows to skip
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

/// Aggregate statistics for an event table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    /// Total stored events
    pub event_count: u64,
    /// Oldest stored event time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest: Option<DateTime<Utc>>,
    /// Newest stored event time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest: Option<DateTime<Utc>>,
}

/// Durable event persistence
#[async_trait]
pub trait TableWriter: Backend {
    /// Append an event
    async fn write_event(&self, event: &MailboxEvent) -> Result<()>;

    /// Delete events older than the cutoff; returns the number deleted
    async fn delete_old_events(&self, older_than: DateTime<Utc>) -> Result<u64>;

    /// Aggregate statistics
    async fn table_stats(&self) -> Result<TableStats>;
}

/// Durable event retrieval
#[async_trait]
pub trait TableReader: Backend {
    /// Events matching the filter, newest first
    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<MailboxEvent>>;

    /// A single event by message id
    async fn get_event(&self, message_id: &str) -> Result<Option<MailboxEvent>>;

    /// Aggregate statistics
    async fn table_stats(&self) -> Result<TableStats>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::PubSubMessage;

    #[test]
    fn test_event_from_message() {
        let msg = PubSubMessage::new("evt.orders", b"hello".to_vec())
            .with_metadata("content-type", "application/json")
            .with_metadata("correlation-id", "req-7")
            .with_metadata("x-tenant", "acme");
        let event = MailboxEvent::from_message(&msg, "mailbox-x");
        assert_eq!(event.namespace, "mailbox-x");
        assert_eq!(event.topic, "evt.orders");
        assert_eq!(event.content_type.as_deref(), Some("application/json"));
        assert_eq!(event.correlation_id.as_deref(), Some("req-7"));
        assert_eq!(event.custom_headers.get("x-tenant").map(String::as_str), Some("acme"));
        assert_eq!(event.body, b"hello");
    }

    #[test]
    fn test_filter_round_trip() {
        let filter = EventFilter {
            topics: vec!["evt.orders".to_string()],
            limit: Some(10),
            ..Default::default()
        };
        let json = serde_json::to_string(&filter).unwrap();
        let back: EventFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(filter, back);
    }
}
