//! The key-value pattern
//!
//! Serves a single `kv_store` slot; the declared interfaces gate which
//! data-plane operations the proxy will route here.

use async_trait::async_trait;
use std::sync::Arc;

use prism::error::{PrismError, Result};
use prism::pattern::{bind, PatternConfig, PatternHandler};
use prism::protocol::frame::HealthReport;
use prism::slots::{Capability, KeyValueStore, SlotRequirement};

/// Key-value contract over one store slot
pub struct KeyValuePattern {
    namespace: String,
    store: Option<Arc<dyn KeyValueStore>>,
    running: bool,
}

impl KeyValuePattern {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            store: None,
            running: false,
        }
    }

    /// The bound store, once initialized
    pub fn store(&self) -> Option<Arc<dyn KeyValueStore>> {
        self.store.clone()
    }

    fn requirement() -> SlotRequirement {
        SlotRequirement::required(
            "kv_store",
            vec![
                Capability::KvBasic,
                Capability::KvTtl,
                Capability::KvScan,
            ],
        )
    }
}

#[async_trait]
impl PatternHandler for KeyValuePattern {
    fn name(&self) -> &str {
        "keyvalue"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn interface_declarations(&self) -> Vec<String> {
        vec![
            "keyvalue_basic".to_string(),
            "keyvalue_ttl".to_string(),
            "keyvalue_scan".to_string(),
        ]
    }

    fn slot_requirements(&self) -> Vec<SlotRequirement> {
        vec![Self::requirement()]
    }

    async fn initialize(&mut self, config: PatternConfig) -> Result<()> {
        let slot_config = config.slot("kv_store").ok_or_else(|| {
            PrismError::validation("slots.kv_store", "slot configuration is required")
        })?;
        let bound = bind(&Self::requirement(), slot_config).await?;
        self.store = bound.as_kv();
        if self.store.is_none() {
            return Err(PrismError::interface_not_supported("kv_store", "Get").into());
        }
        tracing::info!(namespace = %self.namespace, "Key-value store bound");
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        if self.store.is_none() {
            return Err(PrismError::internal("start before initialize").into());
        }
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    async fn health(&self) -> HealthReport {
        match (&self.store, self.running) {
            (Some(store), true) => match store.scan("", 0).await {
                Ok(keys) => HealthReport::healthy("serving")
                    .with_detail("keys", keys.len().to_string()),
                Err(e) => HealthReport::unhealthy(format!("store probe failed: {}", e)),
            },
            _ => HealthReport::unhealthy("not running"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism::protocol::frame::HealthStatus;
    use serde_json::json;

    fn config() -> PatternConfig {
        PatternConfig::from_value(&json!({
            "slots": {"kv_store": {"backend": "memory"}}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle_and_store_access() {
        let mut pattern = KeyValuePattern::new("kv-a");
        pattern.initialize(config()).await.unwrap();
        pattern.start().await.unwrap();

        let store = pattern.store().unwrap();
        store.set("user:1", b"alice".to_vec(), 0).await.unwrap();
        assert_eq!(store.get("user:1").await.unwrap(), Some(b"alice".to_vec()));

        let health = pattern.health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.details.get("keys").map(String::as_str), Some("1"));

        pattern.stop().await.unwrap();
        assert_eq!(pattern.health().await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_missing_slot_config() {
        let mut pattern = KeyValuePattern::new("kv-a");
        let empty = PatternConfig::from_value(&json!({})).unwrap();
        let err = pattern.initialize(empty).await.unwrap_err();
        assert_eq!(
            err.status().unwrap().code,
            prism::error::ErrorCode::ValidationFailed
        );
    }

    #[tokio::test]
    async fn test_wrong_backend_for_slot() {
        let mut pattern = KeyValuePattern::new("kv-a");
        let config = PatternConfig::from_value(&json!({
            "slots": {"kv_store": {"backend": "memory_pubsub"}}
        }))
        .unwrap();
        let err = pattern.initialize(config).await.unwrap_err();
        assert_eq!(
            err.status().unwrap().code,
            prism::error::ErrorCode::InterfaceNotSupported
        );
    }
}
