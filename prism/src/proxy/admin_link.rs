//! Proxy registration, heartbeats, and relayed commands
//!
//! The proxy dials the admin gateway; the admin opens no outbound
//! connections. Admin-originated lifecycle commands arrive here as
//! `DispatchCommand` instructions, are routed through the local registry,
//! and answered with the pattern's response under the instruction's
//! correlation id. The link redials with capped exponential backoff
//! whenever the stream drops.

use chrono::Utc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::error::{PrismError, Result};
use crate::protocol::codec::ControlStream;
use crate::protocol::frame::{
    AdminToNode, InstructionFrame, InstructionResponse, NodeHeartbeat, NodeInstruction,
    NodeToAdmin, ProxyRegistration,
};

use super::dispatch::Dispatcher;

const MAX_REDIAL_DELAY: Duration = Duration::from_secs(30);
const OUTBOUND_QUEUE: usize = 16;

/// Maintain the proxy's admin-gateway link until shutdown
pub async fn run(
    config: ProxyConfig,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut delay = Duration::from_secs(1);
    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }
        match connect_and_serve(&config, &dispatcher, &shutdown).await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                tracing::warn!("Admin gateway stream closed, redialing in {:?}", delay);
            }
            Err(e) => {
                tracing::warn!("Admin gateway link failed: {}. Redialing in {:?}", e, delay);
            }
        }
        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.cancelled() => return Ok(()),
        }
        delay = (delay * 2).min(MAX_REDIAL_DELAY);
    }
}

/// One connection lifetime; returns `true` when shutdown ended it
async fn connect_and_serve(
    config: &ProxyConfig,
    dispatcher: &Dispatcher,
    shutdown: &CancellationToken,
) -> Result<bool> {
    let tcp = TcpStream::connect(&config.admin_addr).await?;
    let mut stream = ControlStream::new(tcp);

    let address = config
        .advertise_addr
        .clone()
        .unwrap_or_else(|| format!("127.0.0.1:{}", config.control_port));
    stream
        .send(&NodeToAdmin::RegisterProxy(ProxyRegistration {
            proxy_id: config.proxy_id.clone(),
            address,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
        .await?;

    match stream.recv::<AdminToNode>().await? {
        Some(AdminToNode::RegisterAck { success: true, .. }) => {}
        Some(AdminToNode::RegisterAck { message, .. }) => {
            return Err(PrismError::new(
                crate::error::ErrorCode::LifecycleRejected,
                format!("proxy registration rejected: {}", message),
            )
            .into());
        }
        Some(AdminToNode::Instruction(_)) => {
            return Err(
                PrismError::protocol_violation("instruction received before RegisterAck").into(),
            );
        }
        None => {
            return Err(PrismError::protocol_violation("stream closed before RegisterAck").into());
        }
    }
    tracing::info!(proxy_id = %config.proxy_id, "Registered with admin gateway");

    // Relayed commands resolve asynchronously; their responses merge back
    // into the stream through this queue.
    let (out_tx, mut out_rx) = mpsc::channel::<NodeToAdmin>(OUTBOUND_QUEUE);

    let mut heartbeat = interval(config.heartbeat_interval());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                stream
                    .send(&NodeToAdmin::Heartbeat(NodeHeartbeat {
                        available_slots: None,
                        timestamp: Utc::now(),
                    }))
                    .await?;
            }
            Some(frame) = out_rx.recv() => {
                stream.send(&frame).await?;
            }
            frame = stream.recv::<AdminToNode>() => match frame {
                Ok(Some(AdminToNode::Instruction(instruction))) => {
                    handle_instruction(instruction, dispatcher.clone(), out_tx.clone());
                }
                Ok(Some(other)) => {
                    tracing::debug!("Ignoring admin frame: {:?}", other);
                }
                Ok(None) => return Ok(false),
                Err(e) => return Err(e),
            },
            _ = shutdown.cancelled() => return Ok(true),
        }
    }
}

/// Execute one relayed instruction without blocking the stream loop
fn handle_instruction(
    frame: InstructionFrame,
    dispatcher: Dispatcher,
    out: mpsc::Sender<NodeToAdmin>,
) {
    let InstructionFrame {
        correlation_id,
        instruction,
    } = frame;

    match instruction {
        NodeInstruction::DispatchCommand {
            namespace,
            required_interface,
            command,
        } => {
            tokio::spawn(async move {
                let result = dispatcher
                    .send_to_namespace(&namespace, required_interface.as_deref(), command)
                    .await;
                let response = match result {
                    Ok(body) => NodeToAdmin::Response(InstructionResponse {
                        correlation_id,
                        success: body.success(),
                        message: body.message().to_string(),
                        process_id: None,
                        response: Some(body),
                        error: None,
                    }),
                    Err(e) => NodeToAdmin::Response(InstructionResponse {
                        correlation_id,
                        success: false,
                        message: e.to_string(),
                        process_id: None,
                        response: None,
                        error: e.status().cloned(),
                    }),
                };
                let _ = out.send(response).await;
            });
        }
        other => {
            tracing::warn!("Instruction not meant for a proxy: {:?}", other);
            let response = NodeToAdmin::Response(InstructionResponse {
                correlation_id,
                success: false,
                message: "instruction is not valid for a proxy".to_string(),
                process_id: None,
                response: None,
                error: None,
            });
            tokio::spawn(async move {
                let _ = out.send(response).await;
            });
        }
    }
}
