//! Pattern configuration parsing
//!
//! `Initialize.config` arrives as a dynamic value tree. It is parsed into
//! [`PatternConfig`] before any state transition; a malformed tree fails the
//! `Initialize` and leaves the pattern exactly where it was.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{PrismError, Result};

/// Backend selection and tuning for one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Backend name, resolved by the slot binder
    pub backend: String,
    /// Backend-specific tuning, passed through untouched
    #[serde(flatten)]
    pub tuning: BTreeMap<String, Value>,
}

/// Pattern-specific behavior knobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorConfig {
    /// Topic or subject filter to consume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Consumer group / subscriber identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_group: Option<String>,
    /// Retention horizon for persisted events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    /// Whether consumed messages are acknowledged automatically
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_commit: Option<bool>,
    /// Remaining behavior knobs, pattern-defined
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Strongly-typed view of `Initialize.config`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternConfig {
    /// Slot name → backend selection
    pub slots: BTreeMap<String, SlotConfig>,
    /// Behavior knobs
    pub behavior: BehaviorConfig,
    /// Any other top-level keys, preserved as free-form backend config
    pub extra: BTreeMap<String, Value>,
}

impl PatternConfig {
    /// Parse the dynamic config tree
    ///
    /// Recognises `slots` and `behavior`; every other top-level key is kept
    /// verbatim in `extra`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            PrismError::validation("config", "expected an object at the top level")
        })?;

        let mut config = PatternConfig::default();
        for (key, entry) in object {
            match key.as_str() {
                "slots" => {
                    config.slots = serde_json::from_value(entry.clone()).map_err(|e| {
                        PrismError::validation("slots", format!("malformed slot map: {}", e))
                    })?;
                }
                "behavior" => {
                    config.behavior = serde_json::from_value(entry.clone()).map_err(|e| {
                        PrismError::validation("behavior", format!("malformed behavior: {}", e))
                    })?;
                }
                other => {
                    config.extra.insert(other.to_string(), entry.clone());
                }
            }
        }
        Ok(config)
    }

    /// Slot config by name
    pub fn slot(&self, name: &str) -> Option<&SlotConfig> {
        self.slots.get(name)
    }
}
