//! Correlation-id allocation and pending-response routing
//!
//! Each pending command is a one-shot response sink registered under its
//! correlation id; the stream's receive loop consults the map, hands the
//! response off, and removes the entry.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

use crate::error::{PrismError, Result};

/// Stream-scoped identity for a single command/response pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap a raw id, used when decoding frames
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic correlation-id source, one per connection
#[derive(Debug, Default)]
pub struct CorrelationCounter {
    next: AtomicU64,
}

impl CorrelationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id on this stream
    pub fn next(&self) -> CorrelationId {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        CorrelationId(format!("c-{}", n))
    }
}

/// Pending command sinks for one stream, keyed by correlation id
#[derive(Debug)]
pub struct PendingResponses<R> {
    map: DashMap<CorrelationId, oneshot::Sender<R>>,
}

impl<R> Default for PendingResponses<R> {
    fn default() -> Self {
        Self {
            map: DashMap::new(),
        }
    }
}

impl<R: Send + 'static> PendingResponses<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink for the id
    ///
    /// A duplicate pending id is a protocol violation; per the wire contract
    /// the stream carrying it must be closed.
    pub fn register(&self, id: CorrelationId) -> Result<oneshot::Receiver<R>> {
        let (tx, rx) = oneshot::channel();
        match self.map.entry(id) {
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(tx);
                Ok(rx)
            }
            dashmap::mapref::entry::Entry::Occupied(occupied) => Err(PrismError::protocol_violation(
                format!("correlation id {} is already pending", occupied.key()),
            )
            .into()),
        }
    }

    /// Hand a response to its waiting sink
    ///
    /// Returns `false` for an unknown id (already resolved, cancelled by the
    /// caller's deadline, or never issued); the caller logs and drops it.
    pub fn resolve(&self, id: &CorrelationId, response: R) -> bool {
        match self.map.remove(id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Remove a sink whose caller gave up; a late response is then dropped
    pub fn cancel(&self, id: &CorrelationId) {
        self.map.remove(id);
    }

    /// Drop every pending sink; waiting callers observe the stream failure
    pub fn fail_all(&self) {
        self.map.clear();
    }

    /// Number of pending commands
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_is_monotonic_and_unique() {
        let counter = CorrelationCounter::new();
        let a = counter.next();
        let b = counter.next();
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "c-1");
        assert_eq!(b.as_str(), "c-2");
    }

    #[tokio::test]
    async fn test_register_resolve() {
        let pending: PendingResponses<&'static str> = PendingResponses::new();
        let id = CorrelationId::new("c-1");
        let rx = pending.register(id.clone()).unwrap();
        assert!(pending.resolve(&id, "ok"));
        assert_eq!(rx.await.unwrap(), "ok");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_duplicate_pending_id_is_protocol_violation() {
        let pending: PendingResponses<()> = PendingResponses::new();
        let id = CorrelationId::new("c-1");
        let _rx = pending.register(id.clone()).unwrap();
        let err = pending.register(id).unwrap_err();
        let status = err.status().expect("structured error");
        assert_eq!(status.code, crate::error::ErrorCode::ProtocolViolation);
    }

    #[test]
    fn test_unknown_response_is_dropped() {
        let pending: PendingResponses<()> = PendingResponses::new();
        assert!(!pending.resolve(&CorrelationId::new("c-99"), ()));
    }

    #[tokio::test]
    async fn test_cancelled_entry_drops_late_response() {
        let pending: PendingResponses<&'static str> = PendingResponses::new();
        let id = CorrelationId::new("c-1");
        let rx = pending.register(id.clone()).unwrap();
        pending.cancel(&id);
        drop(rx);
        assert!(!pending.resolve(&id, "late"));
    }

    #[tokio::test]
    async fn test_fail_all_wakes_waiters() {
        let pending: PendingResponses<()> = PendingResponses::new();
        let rx = pending.register(CorrelationId::new("c-1")).unwrap();
        pending.fail_all();
        assert!(rx.await.is_err());
    }
}
