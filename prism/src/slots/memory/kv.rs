//! In-memory key-value backend

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::error::{PrismError, Result};
use crate::slots::{
    Backend, Capability, KeyValueAtomic, KeyValueBasic, KeyValueScan, KeyValueTtl,
};

const CAPABILITIES: &[Capability] = &[
    Capability::KvBasic,
    Capability::KvTtl,
    Capability::KvScan,
    Capability::KvAtomic,
];

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// In-memory key-value store with lazy TTL expiry
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: DashMap<String, Entry>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn expires_at(ttl_seconds: u64) -> Option<Instant> {
        (ttl_seconds > 0).then(|| Instant::now() + Duration::from_secs(ttl_seconds))
    }

    /// Current live value, expiring lazily
    ///
    /// The read guard is released before any removal to keep map access
    /// non-reentrant.
    fn live(&self, key: &str) -> Option<Vec<u8>> {
        match self.entries.get(key) {
            Some(entry) if entry.expired() => {}
            Some(entry) => return Some(entry.value.clone()),
            None => return None,
        }
        self.entries.remove(key);
        None
    }

    fn parse_counter(value: &[u8]) -> Result<i64> {
        std::str::from_utf8(value)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| {
                PrismError::backend("memory", "increment", "value is not an integer").into()
            })
    }

    fn add(&self, key: &str, delta: i64) -> Result<i64> {
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: b"0".to_vec(),
            expires_at: None,
        });
        if entry.expired() {
            entry.value = b"0".to_vec();
            entry.expires_at = None;
        }
        let next = Self::parse_counter(&entry.value)? + delta;
        entry.value = next.to_string().into_bytes();
        Ok(next)
    }
}

impl Backend for MemoryKv {
    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }
}

#[async_trait]
impl KeyValueBasic for MemoryKv {
    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Self::expires_at(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.live(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live(key).is_some())
    }
}

#[async_trait]
impl KeyValueTtl for MemoryKv {
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> Result<()> {
        self.set(key, value, ttl_seconds).await
    }

    async fn get_ttl(&self, key: &str) -> Result<Option<u64>> {
        match self.entries.get(key) {
            Some(entry) if !entry.expired() => Ok(entry
                .expires_at
                .map(|at| at.saturating_duration_since(Instant::now()).as_secs())),
            _ => Err(PrismError::not_found("key", key).into()),
        }
    }

    async fn update_ttl(&self, key: &str, ttl_seconds: u64) -> Result<()> {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.expired() => {
                entry.expires_at = Self::expires_at(ttl_seconds);
                Ok(())
            }
            _ => Err(PrismError::not_found("key", key).into()),
        }
    }
}

#[async_trait]
impl KeyValueScan for MemoryKv {
    async fn scan(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.value().expired() && e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        if limit > 0 {
            keys.truncate(limit);
        }
        Ok(keys)
    }

    async fn scan_with_values(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let mut pairs: Vec<(String, Vec<u8>)> = self
            .entries
            .iter()
            .filter(|e| !e.value().expired() && e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        if limit > 0 {
            pairs.truncate(limit);
        }
        Ok(pairs)
    }
}

#[async_trait]
impl KeyValueAtomic for MemoryKv {
    async fn compare_and_swap(&self, key: &str, old: &[u8], new: Vec<u8>) -> Result<bool> {
        // An empty `old` expects the key to be absent.
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if current.expired() {
                    if old.is_empty() {
                        occupied.insert(Entry {
                            value: new,
                            expires_at: None,
                        });
                        return Ok(true);
                    }
                    occupied.remove();
                    return Ok(false);
                }
                if current.value == old {
                    occupied.insert(Entry {
                        value: new,
                        expires_at: None,
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                if old.is_empty() {
                    vacant.insert(Entry {
                        value: new,
                        expires_at: None,
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        self.add(key, 1)
    }

    async fn decrement(&self, key: &str) -> Result<i64> {
        self.add(key, -1)
    }
}
