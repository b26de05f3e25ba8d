//! In-memory object store backend

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::error::{PrismError, Result};
use crate::slots::{Backend, Capability, ObjectMetadata, ObjectStore};

const CAPABILITIES: &[Capability] = &[Capability::ObjectStore];

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    metadata: ObjectMetadata,
    expires_at: Option<Instant>,
}

impl StoredObject {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// In-memory object store with lazy TTL expiry
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, StoredObject>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The read guard is released before any removal to keep map access
    /// non-reentrant.
    fn live(&self, key: &str) -> Option<StoredObject> {
        match self.objects.get(key) {
            Some(obj) if obj.expired() => {}
            Some(obj) => return Some(obj.clone()),
            None => return None,
        }
        self.objects.remove(key);
        None
    }
}

impl Backend for MemoryObjectStore {
    fn name(&self) -> &str {
        "memory_object"
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: Option<String>) -> Result<()> {
        let metadata = ObjectMetadata {
            size: data.len() as u64,
            content_type,
            created_at: Utc::now(),
            ttl_seconds: None,
        };
        self.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                metadata,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.live(key).map(|obj| obj.data))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.remove(key);
        Ok(())
    }

    async fn set_ttl(&self, key: &str, ttl_seconds: u64) -> Result<()> {
        match self.objects.get_mut(key) {
            Some(mut obj) if !obj.expired() => {
                obj.expires_at = Some(Instant::now() + Duration::from_secs(ttl_seconds));
                obj.metadata.ttl_seconds = Some(ttl_seconds);
                Ok(())
            }
            _ => Err(PrismError::not_found("object", key).into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live(key).is_some())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        Ok(self.live(key).map(|obj| {
            let mut metadata = obj.metadata.clone();
            metadata.ttl_seconds = obj
                .expires_at
                .map(|at| at.saturating_duration_since(Instant::now()).as_secs());
            metadata
        }))
    }
}
