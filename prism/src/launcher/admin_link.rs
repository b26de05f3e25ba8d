//! Launcher registration and instruction loop
//!
//! The launcher dials the admin gateway, advertises its capacity and
//! capabilities, and then serves spawn/stop instructions. Supervision
//! failures detected by the poll loop are reported on the same stream.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::LauncherConfig;
use crate::error::{PrismError, Result};
use crate::protocol::codec::ControlStream;
use crate::protocol::frame::{
    AdminToNode, InstructionFrame, InstructionResponse, LauncherRegistration, NodeHeartbeat,
    NodeInstruction, NodeToAdmin, PatternExit,
};

use super::supervisor::{SpawnSpec, Supervisor};

const MAX_REDIAL_DELAY: Duration = Duration::from_secs(30);

/// Maintain the launcher's admin-gateway link until shutdown
pub async fn run(
    config: LauncherConfig,
    supervisor: Arc<Supervisor>,
    mut exits: mpsc::Receiver<PatternExit>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut delay = Duration::from_secs(1);
    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }
        match connect_and_serve(&config, &supervisor, &mut exits, &shutdown).await {
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

/// Pattern executables available under the binaries directory
fn discover_capabilities(config: &LauncherConfig) -> Vec<String> {
    let mut capabilities = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&config.binaries_dir) {
        for entry in entries.flatten() {
            if entry.path().is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    capabilities.push(name.to_string());
                }
            }
        }
    }
    capabilities.sort();
    capabilities
}

/// One connection lifetime; returns `true` when shutdown ended it
async fn connect_and_serve(
    config: &LauncherConfig,
    supervisor: &Arc<Supervisor>,
    exits: &mut mpsc::Receiver<PatternExit>,
    shutdown: &CancellationToken,
) -> Result<bool> {
    let tcp = TcpStream::connect(&config.admin_addr).await?;
    let local_addr = tcp.local_addr()?;
    let mut stream = ControlStream::new(tcp);

    stream
        .send(&NodeToAdmin::RegisterLauncher(LauncherRegistration {
            launcher_id: config.launcher_id.clone(),
            address: local_addr.to_string(),
            region: config.region.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            max_patterns: config.max_patterns,
            capabilities: discover_capabilities(config),
        }))
        .await?;

    match stream.recv::<AdminToNode>().await? {
        Some(AdminToNode::RegisterAck { success: true, .. }) => {}
        Some(AdminToNode::RegisterAck { message, .. }) => {
            return Err(PrismError::new(
                crate::error::ErrorCode::LifecycleRejected,
                format!("launcher registration rejected: {}", message),
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
    tracing::info!(launcher_id = %config.launcher_id, "Registered with admin gateway");

    let mut heartbeat = interval(config.heartbeat_interval());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                stream
                    .send(&NodeToAdmin::Heartbeat(NodeHeartbeat {
                        available_slots: Some(supervisor.available_slots()),
                        timestamp: Utc::now(),
                    }))
                    .await?;
            }
            Some(exit) = exits.recv() => {
                tracing::warn!(
                    namespace = %exit.namespace,
                    pid = exit.process_id,
                    "Reporting pattern exit to admin"
                );
                stream.send(&NodeToAdmin::PatternExited(exit)).await?;
            }
            frame = stream.recv::<AdminToNode>() => match frame {
                Ok(Some(AdminToNode::Instruction(instruction))) => {
                    let response = execute_instruction(supervisor, instruction).await;
                    stream.send(&NodeToAdmin::Response(response)).await?;
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

/// Execute one instruction; spawns stay serialized per launcher because the
/// stream loop handles them one at a time
async fn execute_instruction(
    supervisor: &Arc<Supervisor>,
    frame: InstructionFrame,
) -> InstructionResponse {
    let InstructionFrame {
        correlation_id,
        instruction,
    } = frame;

    match instruction {
        NodeInstruction::SpawnPattern {
            pattern,
            namespace,
            proxy_addr,
            config,
        } => {
            let spec = SpawnSpec {
                pattern,
                namespace,
                proxy_addr,
                config,
            };
            match supervisor.spawn_pattern(&spec) {
                Ok(pid) => InstructionResponse {
                    correlation_id,
                    success: true,
                    message: format!("spawned pid {}", pid),
                    process_id: Some(pid),
                    response: None,
                    error: None,
                },
                Err(e) => InstructionResponse {
                    correlation_id,
                    success: false,
                    message: e.to_string(),
                    process_id: None,
                    response: None,
                    error: e.status().cloned(),
                },
            }
        }
        NodeInstruction::StopPattern {
            namespace,
            timeout_seconds,
        } => {
            match supervisor
                .stop_pattern(&namespace, Duration::from_secs(timeout_seconds))
                .await
            {
                Ok(()) => InstructionResponse {
                    correlation_id,
                    success: true,
                    message: format!("stopped {}", namespace),
                    process_id: None,
                    response: None,
                    error: None,
                },
                Err(e) => InstructionResponse {
                    correlation_id,
                    success: false,
                    message: e.to_string(),
                    process_id: None,
                    response: None,
                    error: e.status().cloned(),
                },
            }
        }
        other => {
            tracing::warn!("Instruction not meant for a launcher: {:?}", other);
            InstructionResponse {
                correlation_id,
                success: false,
                message: "instruction is not valid for a launcher".to_string(),
                process_id: None,
                response: None,
                error: None,
            }
        }
    }
}
