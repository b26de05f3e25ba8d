//! Key-value slot contracts

use async_trait::async_trait;

use crate::error::Result;

use super::Backend;

/// Basic key-value operations
#[async_trait]
pub trait KeyValueBasic: Backend {
    /// Store a value; `ttl_seconds` of zero means no expiry
    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> Result<()>;

    /// Fetch a value; `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a key; deleting an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether the key exists
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// TTL management on existing keys
#[async_trait]
pub trait KeyValueTtl: Backend {
    /// Store a value with an explicit TTL
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> Result<()>;

    /// Remaining TTL in seconds; `None` when the key has no expiry
    async fn get_ttl(&self, key: &str) -> Result<Option<u64>>;

    /// Replace the TTL on an existing key
    async fn update_ttl(&self, key: &str, ttl_seconds: u64) -> Result<()>;
}

/// Prefix scans
#[async_trait]
pub trait KeyValueScan: Backend {
    /// Keys matching the prefix, up to `limit` (zero means no limit)
    async fn scan(&self, prefix: &str, limit: usize) -> Result<Vec<String>>;

    /// Keys and values matching the prefix
    async fn scan_with_values(&self, prefix: &str, limit: usize)
        -> Result<Vec<(String, Vec<u8>)>>;
}

/// Atomic operations
#[async_trait]
pub trait KeyValueAtomic: Backend {
    /// Replace `old` with `new` iff the current value equals `old`;
    /// returns whether the swap applied
    async fn compare_and_swap(&self, key: &str, old: &[u8], new: Vec<u8>) -> Result<bool>;

    /// Atomically add one to an integer value, creating it at 1 when absent
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Atomically subtract one from an integer value, creating it at -1 when absent
    async fn decrement(&self, key: &str) -> Result<i64>;
}

/// Full key-value store: every KV capability in one object
pub trait KeyValueStore: KeyValueBasic + KeyValueTtl + KeyValueScan + KeyValueAtomic {}

impl<T: KeyValueBasic + KeyValueTtl + KeyValueScan + KeyValueAtomic> KeyValueStore for T {}
