//! Slot binding
//!
//! Resolves a slot's configured backend name to a live driver and
//! type-checks the backend's capability set against the slot requirement.
//! A mismatch surfaces as `INTERFACE_NOT_SUPPORTED` naming the missing
//! operation, before any data flows.

use std::sync::Arc;

use crate::error::{PrismError, Result};
use crate::slots::memory::{MemoryKv, MemoryObjectStore, MemoryPubSub, MemoryQueue};
use crate::slots::sqlite::SqliteTableStore;
use crate::slots::{
    Capability, KeyValueStore, ObjectStore, PubSub, Queue, SlotRequirement, TableReader,
    TableWriter,
};

use super::config::SlotConfig;

/// A live backend bound to a slot
#[derive(Clone)]
pub enum BoundSlot {
    Kv(Arc<dyn KeyValueStore>),
    PubSub(Arc<dyn PubSub>),
    Queue(Arc<dyn Queue>),
    ObjectStore(Arc<dyn ObjectStore>),
    TableWriter(Arc<dyn TableWriter>),
    TableReader(Arc<dyn TableReader>),
    /// A store serving both table slots
    Table(Arc<SqliteTableStore>),
}

impl std::fmt::Debug for BoundSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            Self::Kv(_) => "Kv",
            Self::PubSub(_) => "PubSub",
            Self::Queue(_) => "Queue",
            Self::ObjectStore(_) => "ObjectStore",
            Self::TableWriter(_) => "TableWriter",
            Self::TableReader(_) => "TableReader",
            Self::Table(_) => "Table",
        };
        f.debug_tuple(variant).finish()
    }
}

impl BoundSlot {
    /// View as a table writer, when the binding supports it
    pub fn as_table_writer(&self) -> Option<Arc<dyn TableWriter>> {
        match self {
            Self::TableWriter(writer) => Some(writer.clone()),
            Self::Table(store) => Some(store.clone()),
            _ => None,
        }
    }

    /// View as a table reader, when the binding supports it
    pub fn as_table_reader(&self) -> Option<Arc<dyn TableReader>> {
        match self {
            Self::TableReader(reader) => Some(reader.clone()),
            Self::Table(store) => Some(store.clone()),
            _ => None,
        }
    }

    pub fn as_pubsub(&self) -> Option<Arc<dyn PubSub>> {
        match self {
            Self::PubSub(bus) => Some(bus.clone()),
            _ => None,
        }
    }

    pub fn as_queue(&self) -> Option<Arc<dyn Queue>> {
        match self {
            Self::Queue(queue) => Some(queue.clone()),
            _ => None,
        }
    }

    pub fn as_kv(&self) -> Option<Arc<dyn KeyValueStore>> {
        match self {
            Self::Kv(store) => Some(store.clone()),
            _ => None,
        }
    }
}

/// Capability set a named backend provides, without constructing it
pub fn backend_capabilities(backend: &str) -> Option<&'static [Capability]> {
    match backend {
        "memory" => Some(&[
            Capability::KvBasic,
            Capability::KvTtl,
            Capability::KvScan,
            Capability::KvAtomic,
        ]),
        "memory_pubsub" => Some(&[Capability::PubSub]),
        "memory_queue" => Some(&[Capability::Queue]),
        "memory_object" => Some(&[Capability::ObjectStore]),
        "sqlite" => Some(&[Capability::TableWrite, Capability::TableRead]),
        _ => None,
    }
}

/// Bind a backend to a slot, enforcing the slot's capability requirements
pub async fn bind(requirement: &SlotRequirement, config: &SlotConfig) -> Result<BoundSlot> {
    let provided = backend_capabilities(&config.backend).ok_or_else(|| {
        PrismError::validation(
            format!("slots.{}.backend", requirement.slot),
            format!("unknown backend {:?}", config.backend),
        )
    })?;

    let missing = requirement.missing_from(provided);
    if let Some(capability) = missing.first() {
        return Err(PrismError::interface_not_supported(
            requirement.slot.clone(),
            capability.representative_operation(),
        )
        .with_metadata("backend", config.backend.clone())
        .into());
    }

    match config.backend.as_str() {
        "memory" => Ok(BoundSlot::Kv(Arc::new(MemoryKv::new()))),
        "memory_pubsub" => Ok(BoundSlot::PubSub(Arc::new(MemoryPubSub::new()))),
        "memory_queue" => Ok(BoundSlot::Queue(Arc::new(MemoryQueue::new()))),
        "memory_object" => Ok(BoundSlot::ObjectStore(Arc::new(MemoryObjectStore::new()))),
        "sqlite" => {
            let store = match config.tuning.get("path").and_then(|v| v.as_str()) {
                Some(path) => {
                    SqliteTableStore::connect(&format!("sqlite://{}?mode=rwc", path)).await?
                }
                None => SqliteTableStore::in_memory().await?,
            };
            Ok(BoundSlot::Table(Arc::new(store)))
        }
        other => Err(PrismError::validation(
            format!("slots.{}.backend", requirement.slot),
            format!("unknown backend {:?}", other),
        )
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn slot_config(backend: &str) -> SlotConfig {
        SlotConfig {
            backend: backend.to_string(),
            tuning: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_bind_matching_backend() {
        let requirement = SlotRequirement::required("kv_store", vec![Capability::KvBasic]);
        let bound = bind(&requirement, &slot_config("memory")).await.unwrap();
        assert!(bound.as_kv().is_some());
    }

    #[tokio::test]
    async fn test_capability_mismatch_names_missing_operation() {
        // a kv backend bound where table writes are required
        let requirement = SlotRequirement::required("table_writer", vec![Capability::TableWrite]);
        let err = bind(&requirement, &slot_config("memory")).await.unwrap_err();
        let status = err.status().expect("structured error");
        assert_eq!(status.code, crate::error::ErrorCode::InterfaceNotSupported);
        assert!(status.message.contains("WriteEvent"));
    }

    #[tokio::test]
    async fn test_unknown_backend_is_validation_error() {
        let requirement = SlotRequirement::required("kv_store", vec![Capability::KvBasic]);
        let err = bind(&requirement, &slot_config("redis-prod")).await.unwrap_err();
        let status = err.status().expect("structured error");
        assert_eq!(status.code, crate::error::ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn test_sqlite_serves_both_table_slots() {
        let requirement = SlotRequirement::required(
            "table_writer",
            vec![Capability::TableWrite, Capability::TableRead],
        );
        let bound = bind(&requirement, &slot_config("sqlite")).await.unwrap();
        assert!(bound.as_table_writer().is_some());
        assert!(bound.as_table_reader().is_some());
    }
}
