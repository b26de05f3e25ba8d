//! Object store slot contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::Backend;

/// Metadata recorded for a stored object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Object size in bytes
    pub size: u64,
    /// Content type, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// When the object was stored
    pub created_at: DateTime<Utc>,
    /// Remaining TTL in seconds, when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

/// Object storage, the claim-check side of a claim-check pattern
#[async_trait]
pub trait ObjectStore: Backend {
    /// Store an object under the key
    async fn put(&self, key: &str, data: Vec<u8>, content_type: Option<String>) -> Result<()>;

    /// Fetch an object; `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete an object; deleting an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Set or replace the TTL on a stored object
    async fn set_ttl(&self, key: &str, ttl_seconds: u64) -> Result<()>;

    /// Whether the object exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Metadata for a stored object; `None` when absent
    async fn get_metadata(&self, key: &str) -> Result<Option<ObjectMetadata>>;
}
