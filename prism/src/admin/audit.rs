//! Audit records
//!
//! Audit records are facts, not logs: a permanent, queryable table with a
//! stable schema, written for every admin RPC, success or failure. For
//! mutating RPCs the write shares the mutation's transaction, so a
//! successful mutation implies a durable audit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One immutable audit row
///
/// `status_code` is zero for success; failures carry the HTTP-equivalent
/// status of the structured error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record id
    pub id: Uuid,
    /// When the call started
    pub timestamp: DateTime<Utc>,
    /// Already-authenticated principal
    pub principal: String,
    /// RPC name, e.g. `CreateNamespace`
    pub action: String,
    /// Resource type, e.g. `namespace`
    pub resource_type: String,
    /// Resource identity
    pub resource_id: String,
    /// Namespace involved, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Serialized request body, when capture is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<serde_json::Value>,
    /// Serialized response body, when capture is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<serde_json::Value>,
    /// Zero for success, HTTP-equivalent status otherwise
    pub status_code: u16,
    /// Error message on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Call duration in milliseconds
    pub duration_ms: i64,
    /// Calling client IP, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    /// Calling user agent, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl AuditRecord {
    /// Start a record for an RPC; status is success until marked otherwise
    pub fn new(
        principal: impl Into<String>,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            principal: principal.into(),
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            namespace: None,
            request_body: None,
            response_body: None,
            status_code: 0,
            error: None,
            duration_ms: 0,
            client_ip: None,
            user_agent: None,
        }
    }

    /// Attach the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Capture the request body
    pub fn with_request(mut self, body: serde_json::Value) -> Self {
        self.request_body = Some(body);
        self
    }

    /// Capture the response body
    pub fn with_response(mut self, body: serde_json::Value) -> Self {
        self.response_body = Some(body);
        self
    }

    /// Mark the call failed
    pub fn failed(mut self, status_code: u16, error: impl Into<String>) -> Self {
        self.status_code = status_code;
        self.error = Some(error.into());
        self
    }

    /// Record the call duration
    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Attach caller information
    pub fn with_client(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.client_ip = ip;
        self.user_agent = user_agent;
        self
    }
}

/// Filter for audit queries; results are ordered by timestamp descending
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let record = AuditRecord::new("alice", "CreateNamespace", "namespace", "mailbox-x")
            .with_namespace("mailbox-x")
            .with_request(serde_json::json!({"pattern": "mailbox"}))
            .with_duration_ms(12);
        assert_eq!(record.status_code, 0);
        assert_eq!(record.principal, "alice");
        assert_eq!(record.namespace.as_deref(), Some("mailbox-x"));
        assert!(record.error.is_none());
    }

    #[test]
    fn test_failed_marks_status() {
        let record = AuditRecord::new("cli", "CreateNamespace", "namespace", "orphan")
            .failed(503, "no proxy available");
        assert_eq!(record.status_code, 503);
        assert_eq!(record.error.as_deref(), Some("no proxy available"));
    }
}
