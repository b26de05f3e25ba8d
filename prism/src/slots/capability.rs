//! Capability vocabulary for slot binding

use serde::{Deserialize, Serialize};
use std::fmt;

/// A capability a backend can support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// `Set`/`Get`/`Delete`/`Exists`
    KvBasic,
    /// `SetWithTTL`/`GetTTL`/`UpdateTTL`
    KvTtl,
    /// `Scan`/`ScanWithValues`
    KvScan,
    /// `CompareAndSwap`/`Increment`/`Decrement`
    KvAtomic,
    /// `Publish`/`Subscribe`/`Unsubscribe`
    PubSub,
    /// `Enqueue`/`Receive`/`Acknowledge`/`Reject`
    Queue,
    /// `Put`/`Get`/`Delete`/`SetTTL`/`Exists`/`GetMetadata`
    ObjectStore,
    /// `WriteEvent`/`DeleteOldEvents`/`GetTableStats`
    TableWrite,
    /// `QueryEvents`/`GetEvent`/`GetTableStats`
    TableRead,
}

impl Capability {
    /// Representative operation name, used in error details
    pub fn representative_operation(self) -> &'static str {
        match self {
            Self::KvBasic => "Get",
            Self::KvTtl => "SetWithTTL",
            Self::KvScan => "Scan",
            Self::KvAtomic => "CompareAndSwap",
            Self::PubSub => "Subscribe",
            Self::Queue => "Receive",
            Self::ObjectStore => "Put",
            Self::TableWrite => "WriteEvent",
            Self::TableRead => "QueryEvents",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::KvBasic => "kv_basic",
            Self::KvTtl => "kv_ttl",
            Self::KvScan => "kv_scan",
            Self::KvAtomic => "kv_atomic",
            Self::PubSub => "pubsub",
            Self::Queue => "queue",
            Self::ObjectStore => "object_store",
            Self::TableWrite => "table_write",
            Self::TableRead => "table_read",
        };
        write!(f, "{}", s)
    }
}

/// A slot a pattern requires, declared at registration time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRequirement {
    /// Slot name, e.g. `message_source` or `table_writer`
    pub slot: String,
    /// Capabilities the bound backend must cover
    pub capabilities: Vec<Capability>,
    /// Whether the pattern can run without this slot bound
    #[serde(default)]
    pub optional: bool,
}

impl SlotRequirement {
    /// Required slot with the given capabilities
    pub fn required(slot: impl Into<String>, capabilities: Vec<Capability>) -> Self {
        Self {
            slot: slot.into(),
            capabilities,
            optional: false,
        }
    }

    /// Optional slot with the given capabilities
    pub fn optional(slot: impl Into<String>, capabilities: Vec<Capability>) -> Self {
        Self {
            slot: slot.into(),
            capabilities,
            optional: true,
        }
    }

    /// Capabilities in this requirement that `provided` does not cover
    pub fn missing_from(&self, provided: &[Capability]) -> Vec<Capability> {
        self.capabilities
            .iter()
            .copied()
            .filter(|c| !provided.contains(c))
            .collect()
    }
}
