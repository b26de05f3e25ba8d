//! The admin control gateway
//!
//! Launchers and proxies dial in here, mirroring the pattern→proxy
//! inversion: the admin opens no outbound connections either. Each stream
//! registers once, then carries correlated instructions (spawn/stop for
//! launchers, relayed lifecycle commands for proxies), heartbeats, and
//! failure reports.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::AdminConfig;
use crate::error::{PrismError, Result};
use crate::protocol::codec::{ControlStream, FrameSink};
use crate::protocol::correlation::{CorrelationCounter, PendingResponses};
use crate::protocol::frame::{
    AdminToNode, InstructionFrame, InstructionResponse, LauncherRegistration, NodeInstruction,
    NodeToAdmin, ProxyRegistration,
};

use super::partitions::PartitionMap;
use super::storage::{AdminStore, LauncherRecord, NodeStatus, ProxyRecord};

/// Dispatch state for one connected launcher or proxy
pub struct NodeHandle {
    pub node_id: String,
    instructions: mpsc::Sender<InstructionFrame>,
    pending: PendingResponses<InstructionResponse>,
    correlation: CorrelationCounter,
    available_slots: AtomicU32,
    last_seen: RwLock<DateTime<Utc>>,
}

impl NodeHandle {
    fn new(node_id: String, instructions: mpsc::Sender<InstructionFrame>, slots: u32) -> Self {
        Self {
            node_id,
            instructions,
            pending: PendingResponses::new(),
            correlation: CorrelationCounter::new(),
            available_slots: AtomicU32::new(slots),
            last_seen: RwLock::new(Utc::now()),
        }
    }

    /// Issue an instruction and wait for its correlated response
    pub async fn send_instruction(
        &self,
        instruction: NodeInstruction,
        deadline: Duration,
    ) -> Result<InstructionResponse> {
        let correlation_id = self.correlation.next();
        let receiver = self.pending.register(correlation_id.clone())?;
        let frame = InstructionFrame {
            correlation_id: correlation_id.clone(),
            instruction,
        };

        match timeout(deadline, self.instructions.send(frame)).await {
            Err(_) => {
                self.pending.cancel(&correlation_id);
                return Err(PrismError::deadline_exceeded(format!(
                    "instruction queue of {}",
                    self.node_id
                ))
                .into());
            }
            Ok(Err(_)) => {
                self.pending.cancel(&correlation_id);
                return Err(PrismError::pattern_not_connected(&self.node_id).into());
            }
            Ok(Ok(())) => {}
        }

        match timeout(deadline, receiver).await {
            Err(_) => {
                self.pending.cancel(&correlation_id);
                Err(PrismError::deadline_exceeded(format!(
                    "response from {}",
                    self.node_id
                ))
                .into())
            }
            Ok(Err(_)) => Err(PrismError::pattern_not_connected(&self.node_id).into()),
            Ok(Ok(response)) => Ok(response),
        }
    }

    pub fn available_slots(&self) -> u32 {
        self.available_slots.load(Ordering::Relaxed)
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        *self.last_seen.read().expect("last_seen lock")
    }

    fn note_heartbeat(&self, slots: Option<u32>) {
        if let Some(slots) = slots {
            self.available_slots.store(slots, Ordering::Relaxed);
        }
        *self.last_seen.write().expect("last_seen lock") = Utc::now();
    }
}

enum NodeRole {
    Launcher,
    Proxy,
}

/// Accepts and serves launcher and proxy control streams
pub struct AdminGateway {
    launchers: DashMap<String, Arc<NodeHandle>>,
    proxies: DashMap<String, Arc<NodeHandle>>,
    store: Arc<AdminStore>,
    partitions: Arc<Mutex<PartitionMap>>,
    config: AdminConfig,
}

impl AdminGateway {
    pub fn new(
        store: Arc<AdminStore>,
        partitions: Arc<Mutex<PartitionMap>>,
        config: AdminConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            launchers: DashMap::new(),
            proxies: DashMap::new(),
            store,
            partitions,
            config,
        })
    }

    /// Bind the gateway listener on the configured port
    pub async fn bind(config: &AdminConfig) -> Result<TcpListener> {
        let addr = format!("0.0.0.0:{}", config.gateway_port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Admin gateway listening on {}", addr);
        Ok(listener)
    }

    /// Accept node connections until shutdown
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (tcp, peer) = accepted?;
                    tracing::debug!(%peer, "Gateway connection accepted");
                    tokio::spawn(self.clone().handle_connection(tcp, peer));
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Admin gateway shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Connected launcher with the most free slots
    pub fn launcher_with_capacity(&self) -> Option<Arc<NodeHandle>> {
        self.launchers
            .iter()
            .map(|e| e.value().clone())
            .filter(|handle| handle.available_slots() > 0)
            .max_by_key(|handle| handle.available_slots())
    }

    /// Connected proxy by id
    pub fn proxy(&self, proxy_id: &str) -> Option<Arc<NodeHandle>> {
        self.proxies.get(proxy_id).map(|e| e.value().clone())
    }

    /// Connected launcher by id
    pub fn launcher(&self, launcher_id: &str) -> Option<Arc<NodeHandle>> {
        self.launchers.get(launcher_id).map(|e| e.value().clone())
    }

    async fn handle_connection(self: Arc<Self>, tcp: TcpStream, peer: SocketAddr) {
        let mut stream = ControlStream::new(tcp);

        let register_window = Duration::from_secs(self.config.liveness_window_secs);
        let first = match timeout(register_window, stream.recv::<NodeToAdmin>()).await {
            Err(_) => {
                tracing::warn!(%peer, "Gateway connection never registered, dropping");
                return;
            }
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                tracing::warn!(%peer, "Failed reading node registration: {}", e);
                return;
            }
        };

        let (role, node_id, slots) = match &first {
            NodeToAdmin::RegisterLauncher(reg) => {
                if let Err(e) = self.record_launcher(reg).await {
                    self.reject(&mut stream, e.to_string()).await;
                    return;
                }
                (NodeRole::Launcher, reg.launcher_id.clone(), reg.max_patterns)
            }
            NodeToAdmin::RegisterProxy(reg) => {
                if let Err(e) = self.record_proxy(reg).await {
                    self.reject(&mut stream, e.to_string()).await;
                    return;
                }
                (NodeRole::Proxy, reg.proxy_id.clone(), 0)
            }
            other => {
                tracing::warn!(%peer, "First gateway frame was not a registration: {:?}", other);
                return;
            }
        };

        if let Err(e) = stream
            .send(&AdminToNode::RegisterAck {
                success: true,
                message: String::new(),
            })
            .await
        {
            tracing::warn!(%node_id, "Failed sending RegisterAck: {}", e);
            return;
        }

        let (instruction_tx, instruction_rx) = mpsc::channel::<InstructionFrame>(16);
        let handle = Arc::new(NodeHandle::new(node_id.clone(), instruction_tx, slots));
        match role {
            NodeRole::Launcher => {
                self.launchers.insert(node_id.clone(), handle.clone());
            }
            NodeRole::Proxy => {
                self.proxies.insert(node_id.clone(), handle.clone());
            }
        }
        tracing::info!(%node_id, "Node registered with gateway");

        let (sink, mut source) = stream.split();
        let send_task = tokio::spawn(forward_instructions(sink, instruction_rx, node_id.clone()));

        loop {
            match source.recv::<NodeToAdmin>().await {
                Ok(Some(NodeToAdmin::Heartbeat(heartbeat))) => {
                    handle.note_heartbeat(heartbeat.available_slots);
                    let result = match role {
                        NodeRole::Launcher => {
                            self.store
                                .touch_launcher(&node_id, handle.available_slots())
                                .await
                        }
                        NodeRole::Proxy => self.store.touch_proxy(&node_id).await,
                    };
                    if let Err(e) = result {
                        tracing::warn!(%node_id, "Failed recording heartbeat: {}", e);
                    }
                }
                Ok(Some(NodeToAdmin::Response(response))) => {
                    let correlation_id = response.correlation_id.clone();
                    if !handle.pending.resolve(&correlation_id, response) {
                        tracing::debug!(
                            %node_id,
                            %correlation_id,
                            "Response with unknown correlation id dropped"
                        );
                    }
                }
                Ok(Some(NodeToAdmin::PatternExited(exit))) => {
                    tracing::warn!(
                        namespace = %exit.namespace,
                        pattern = %exit.pattern_name,
                        pid = exit.process_id,
                        "Pattern exit reported by {}",
                        node_id
                    );
                    if let Err(e) = self.store.set_pattern_state(&exit.namespace, "failed").await {
                        tracing::warn!("Failed recording pattern exit: {}", e);
                    }
                }
                Ok(Some(NodeToAdmin::RegisterLauncher(_)))
                | Ok(Some(NodeToAdmin::RegisterProxy(_))) => {
                    tracing::warn!(%node_id, "Duplicate registration frame, closing stream");
                    break;
                }
                Ok(None) => {
                    tracing::info!(%node_id, "Node stream closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(%node_id, "Node stream failed: {}", e);
                    break;
                }
            }
        }

        // Teardown: only remove the map entry if a reconnect has not already
        // replaced it.
        let map = match role {
            NodeRole::Launcher => &self.launchers,
            NodeRole::Proxy => &self.proxies,
        };
        map.remove_if(&node_id, |_, current| Arc::ptr_eq(current, &handle));
        send_task.abort();
        handle.pending.fail_all();

        let status_update = match role {
            NodeRole::Launcher => self.store.set_launcher_status(&node_id, NodeStatus::Unknown).await,
            NodeRole::Proxy => self.store.set_proxy_status(&node_id, NodeStatus::Unknown).await,
        };
        if let Err(e) = status_update {
            tracing::warn!(%node_id, "Failed recording node status: {}", e);
        }
        tracing::info!(%node_id, "Gateway connection cleaned up");
    }

    async fn record_launcher(&self, reg: &LauncherRegistration) -> Result<()> {
        self.store
            .upsert_launcher(&LauncherRecord {
                launcher_id: reg.launcher_id.clone(),
                address: reg.address.clone(),
                region: reg.region.clone(),
                version: reg.version.clone(),
                status: NodeStatus::Healthy,
                max_patterns: reg.max_patterns,
                available_slots: reg.max_patterns,
                capabilities: reg.capabilities.clone(),
                last_seen: Utc::now(),
            })
            .await
    }

    async fn record_proxy(&self, reg: &ProxyRegistration) -> Result<()> {
        self.store
            .upsert_proxy(&ProxyRecord {
                proxy_id: reg.proxy_id.clone(),
                address: reg.address.clone(),
                version: reg.version.clone(),
                status: NodeStatus::Healthy,
                last_seen: Utc::now(),
            })
            .await?;
        let owned = self
            .partitions
            .lock()
            .expect("partition lock")
            .assign_unowned(&reg.proxy_id);
        tracing::info!(
            proxy_id = %reg.proxy_id,
            partitions = owned.len(),
            "Proxy registered; partitions assigned"
        );
        Ok(())
    }

    async fn reject(&self, stream: &mut ControlStream<TcpStream>, message: String) {
        let _ = stream
            .send(&AdminToNode::RegisterAck {
                success: false,
                message,
            })
            .await;
    }
}

/// Forward queued instructions to the node in send-order
async fn forward_instructions(
    mut sink: FrameSink<TcpStream>,
    mut instructions: mpsc::Receiver<InstructionFrame>,
    node_id: String,
) {
    while let Some(frame) = instructions.recv().await {
        if let Err(e) = sink.send(&AdminToNode::Instruction(frame)).await {
            tracing::warn!(%node_id, "Failed sending instruction: {}", e);
            break;
        }
    }
}
