//! The proxy's process-wide instance registry
//!
//! The only fleet-level mutable structure: `instance_id → PatternHandle`
//! plus the `namespace → instance_id` dispatch table. Readers are dispatch
//! paths; writers are registration and stream teardown.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::{PrismError, Result};
use crate::protocol::correlation::{CorrelationCounter, PendingResponses};
use crate::protocol::frame::{
    CommandFrame, Heartbeat, LifecycleState, PatternMetadata, ProxyCommand, ResponseBody,
};

/// Dispatch state for one connected pattern
///
/// Commands go out through a bounded queue consumed by the connection's send
/// task, preserving send-order per pattern. Each pending command is a
/// one-shot sink keyed by correlation id; responses may resolve out of
/// order.
pub struct PatternHandle {
    pub instance_id: String,
    pub pattern_name: String,
    pub namespace: String,
    /// Capability advertisement captured at registration
    pub metadata: PatternMetadata,
    pub connected_at: DateTime<Utc>,
    commands: mpsc::Sender<CommandFrame>,
    pending: PendingResponses<ResponseBody>,
    correlation: CorrelationCounter,
    last_seen: RwLock<DateTime<Utc>>,
    last_state: RwLock<LifecycleState>,
}

impl PatternHandle {
    pub fn new(
        instance_id: String,
        pattern_name: String,
        namespace: String,
        metadata: PatternMetadata,
        commands: mpsc::Sender<CommandFrame>,
    ) -> Self {
        let now = Utc::now();
        Self {
            instance_id,
            pattern_name,
            namespace,
            metadata,
            connected_at: now,
            commands,
            pending: PendingResponses::new(),
            correlation: CorrelationCounter::new(),
            last_seen: RwLock::new(now),
            last_state: RwLock::new(LifecycleState::Registered),
        }
    }

    /// Issue a command and wait for its correlated response
    ///
    /// Blocks on a full outbound queue (backpressure) and cancels its
    /// pending entry when the deadline fires, so a late response is dropped
    /// silently by the receive loop.
    pub async fn send_command(
        &self,
        command: ProxyCommand,
        deadline: Duration,
    ) -> Result<ResponseBody> {
        let correlation_id = self.correlation.next();
        let receiver = self.pending.register(correlation_id.clone())?;

        let frame = CommandFrame {
            correlation_id: correlation_id.clone(),
            command,
        };
        match timeout(deadline, self.commands.send(frame)).await {
            Err(_) => {
                self.pending.cancel(&correlation_id);
                return Err(PrismError::deadline_exceeded(format!(
                    "command queue of {}",
                    self.instance_id
                ))
                .into());
            }
            Ok(Err(_)) => {
                // Queue closed: the connection is gone.
                self.pending.cancel(&correlation_id);
                return Err(PrismError::pattern_not_connected(&self.instance_id).into());
            }
            Ok(Ok(())) => {}
        }

        match timeout(deadline, receiver).await {
            Err(_) => {
                self.pending.cancel(&correlation_id);
                Err(PrismError::deadline_exceeded(format!(
                    "response from {}",
                    self.instance_id
                ))
                .into())
            }
            Ok(Err(_)) => Err(PrismError::pattern_not_connected(&self.instance_id).into()),
            Ok(Ok(body)) => Ok(body),
        }
    }

    /// Resolve a response arriving on the stream
    ///
    /// Returns `false` for an unknown correlation id; the caller logs and
    /// drops the frame.
    pub fn resolve_response(&self, frame: crate::protocol::frame::ResponseFrame) -> bool {
        self.pending.resolve(&frame.correlation_id, frame.body)
    }

    /// Record a heartbeat; heartbeats are passive and never acknowledged
    pub fn note_heartbeat(&self, heartbeat: &Heartbeat) {
        *self.last_seen.write().expect("last_seen lock") = Utc::now();
        *self.last_state.write().expect("last_state lock") = heartbeat.state;
    }

    /// Last heartbeat or registration time
    pub fn last_seen(&self) -> DateTime<Utc> {
        *self.last_seen.read().expect("last_seen lock")
    }

    /// Lifecycle state from the most recent heartbeat
    pub fn last_state(&self) -> LifecycleState {
        *self.last_state.read().expect("last_state lock")
    }

    /// Drop every pending sink, waking in-flight callers with a failure
    pub fn fail_pending(&self) {
        self.pending.fail_all();
    }

    /// Whether the pattern declared the interface
    pub fn declares_interface(&self, interface: &str) -> bool {
        self.metadata.interfaces.iter().any(|i| i == interface)
    }
}

/// Registry of connected pattern instances
#[derive(Default)]
pub struct InstanceRegistry {
    instances: DashMap<String, Arc<PatternHandle>>,
    namespaces: DashMap<String, String>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly registered instance
    ///
    /// Rejects a duplicate instance id, and rejects a namespace that is
    /// already served by a live instance so `namespace → instance` stays a
    /// partial function.
    pub fn register(&self, handle: Arc<PatternHandle>) -> Result<()> {
        match self.instances.entry(handle.instance_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(PrismError::already_exists("instance", &handle.instance_id).into());
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(handle.clone());
            }
        }

        let conflict = match self.namespaces.entry(handle.namespace.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if self.instances.contains_key(occupied.get())
                    && occupied.get() != &handle.instance_id
                {
                    true
                } else {
                    occupied.insert(handle.instance_id.clone());
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(handle.instance_id.clone());
                false
            }
        };

        if conflict {
            self.instances.remove(&handle.instance_id);
            return Err(PrismError::already_exists("namespace binding", &handle.namespace)
                .with_namespace(handle.namespace.clone())
                .into());
        }
        Ok(())
    }

    /// Remove an instance on stream teardown; releases its namespace binding
    pub fn remove(&self, instance_id: &str) -> Option<Arc<PatternHandle>> {
        let (_, handle) = self.instances.remove(instance_id)?;
        self.namespaces
            .remove_if(&handle.namespace, |_, bound| bound == instance_id);
        Some(handle)
    }

    pub fn get(&self, instance_id: &str) -> Option<Arc<PatternHandle>> {
        self.instances.get(instance_id).map(|e| e.value().clone())
    }

    /// Instance currently bound to a namespace
    pub fn get_by_namespace(&self, namespace: &str) -> Option<Arc<PatternHandle>> {
        let instance_id = self.namespaces.get(namespace)?.value().clone();
        self.get(&instance_id)
    }

    pub fn list(&self) -> Vec<Arc<PatternHandle>> {
        self.instances.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::ResponseFrame;

    fn handle(instance_id: &str, namespace: &str) -> (Arc<PatternHandle>, mpsc::Receiver<CommandFrame>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = Arc::new(PatternHandle::new(
            instance_id.to_string(),
            "mailbox".to_string(),
            namespace.to_string(),
            PatternMetadata {
                name: "mailbox".to_string(),
                version: "0.1.0".to_string(),
                interfaces: vec!["pattern_mailbox".to_string()],
                slots: Vec::new(),
            },
            tx,
        ));
        (handle, rx)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = InstanceRegistry::new();
        let (h, _rx) = handle("mailbox-100", "ns-a");
        registry.register(h).unwrap();

        assert!(registry.get("mailbox-100").is_some());
        assert_eq!(
            registry.get_by_namespace("ns-a").unwrap().instance_id,
            "mailbox-100"
        );
    }

    #[tokio::test]
    async fn test_duplicate_instance_id_rejected() {
        let registry = InstanceRegistry::new();
        let (first, _rx1) = handle("mailbox-100", "ns-a");
        let (second, _rx2) = handle("mailbox-100", "ns-b");
        registry.register(first).unwrap();
        assert!(registry.register(second).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_namespace_is_a_partial_function() {
        let registry = InstanceRegistry::new();
        let (first, _rx1) = handle("mailbox-100", "ns-a");
        let (second, _rx2) = handle("mailbox-200", "ns-a");
        registry.register(first).unwrap();
        // a live instance already serves ns-a
        assert!(registry.register(second.clone()).is_err());
        assert!(registry.get("mailbox-200").is_none());

        // after the first instance goes away, the namespace is free again
        registry.remove("mailbox-100");
        registry.register(second).unwrap();
        assert_eq!(
            registry.get_by_namespace("ns-a").unwrap().instance_id,
            "mailbox-200"
        );
    }

    #[tokio::test]
    async fn test_concurrent_same_name_distinct_pids() {
        // Two patterns reusing one pattern name with different PIDs coexist.
        let registry = InstanceRegistry::new();
        let (a, _rx1) = handle("x-100", "ns-a");
        let (b, _rx2) = handle("x-200", "ns-b");
        registry.register(a).unwrap();
        registry.register(b).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("x-100").is_some());
        assert!(registry.get("x-200").is_some());
    }

    #[tokio::test]
    async fn test_remove_releases_namespace() {
        let registry = InstanceRegistry::new();
        let (h, _rx) = handle("mailbox-100", "ns-a");
        registry.register(h).unwrap();
        registry.remove("mailbox-100");
        assert!(registry.get_by_namespace("ns-a").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_send_command_round_trip() {
        let (h, mut rx) = handle("mailbox-100", "ns-a");
        let handle_for_responder = h.clone();

        let responder = tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            assert!(matches!(frame.command, ProxyCommand::HealthCheck));
            handle_for_responder.resolve_response(ResponseFrame {
                correlation_id: frame.correlation_id,
                body: ResponseBody::HealthCheck {
                    report: crate::protocol::frame::HealthReport::healthy("ok"),
                },
            });
        });

        let body = h
            .send_command(ProxyCommand::HealthCheck, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(body.success());
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_command_deadline_cancels_pending() {
        let (h, _rx) = handle("mailbox-100", "ns-a");
        let err = h
            .send_command(ProxyCommand::HealthCheck, Duration::from_millis(50))
            .await
            .unwrap_err();
        let status = err.status().unwrap();
        assert_eq!(status.code, crate::error::ErrorCode::DeadlineExceeded);
        // the pending entry is cancelled, so a late response is dropped
        assert!(h.pending.is_empty());
    }

    #[tokio::test]
    async fn test_send_command_after_queue_close_is_not_connected() {
        let (h, rx) = handle("mailbox-100", "ns-a");
        drop(rx);
        let err = h
            .send_command(ProxyCommand::HealthCheck, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(
            err.status().unwrap().code,
            crate::error::ErrorCode::PatternNotConnected
        );
    }

    #[test]
    fn test_interface_declaration_check() {
        let (h, _rx) = handle("mailbox-100", "ns-a");
        assert!(h.declares_interface("pattern_mailbox"));
        assert!(!h.declares_interface("keyvalue_basic"));
    }
}
