//! Per-pattern connection handling
//!
//! Each accepted stream gets one receive loop (this task) and one send task.
//! The receive loop performs the registration handshake, then routes
//! responses to their pending sinks and folds heartbeats into last-seen
//! state. Teardown garbage-collects the registry entry and closes the
//! outbound queue so in-flight callers observe the failure.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::ProxyConfig;
use crate::protocol::codec::{ControlStream, FrameSink};
use crate::protocol::frame::{
    CommandFrame, PatternToProxy, ProxyToPattern, RegisterAck, RegisterRequest,
};

use super::registry::{InstanceRegistry, PatternHandle};

/// Serve one pattern connection to completion
pub async fn serve_pattern_connection(
    tcp: TcpStream,
    peer: SocketAddr,
    registry: Arc<InstanceRegistry>,
    config: ProxyConfig,
) {
    let mut stream = ControlStream::new(tcp);

    // The very first frame must be a RegisterRequest, within the idle window.
    let request = match timeout(config.register_timeout(), stream.recv::<PatternToProxy>()).await {
        Err(_) => {
            tracing::warn!(%peer, "Connection never registered, dropping");
            return;
        }
        Ok(Ok(Some(PatternToProxy::Register(request)))) => request,
        Ok(Ok(Some(other))) => {
            tracing::warn!(%peer, "First frame was not RegisterRequest ({:?}), dropping", frame_kind(&other));
            return;
        }
        Ok(Ok(None)) => return,
        Ok(Err(e)) => {
            tracing::warn!(%peer, "Failed reading registration: {}", e);
            return;
        }
    };

    if let Err(message) = validate_registration(&request) {
        tracing::warn!(%peer, pattern = %request.pattern_name, "Registration rejected: {}", message);
        let _ = stream
            .send(&ProxyToPattern::RegisterAck(RegisterAck {
                success: false,
                instance_id: None,
                message,
            }))
            .await;
        return;
    }

    let instance_id = format!("{}-{}", request.pattern_name, request.process_id);
    let (command_tx, command_rx) = mpsc::channel::<CommandFrame>(config.command_queue_depth);
    let handle = Arc::new(PatternHandle::new(
        instance_id.clone(),
        request.pattern_name.clone(),
        request.namespace.clone(),
        request.metadata.clone(),
        command_tx,
    ));

    if let Err(e) = registry.register(handle.clone()) {
        tracing::warn!(%peer, %instance_id, "Registration rejected: {}", e);
        let _ = stream
            .send(&ProxyToPattern::RegisterAck(RegisterAck {
                success: false,
                instance_id: None,
                message: e.to_string(),
            }))
            .await;
        return;
    }

    if let Err(e) = stream
        .send(&ProxyToPattern::RegisterAck(RegisterAck {
            success: true,
            instance_id: Some(instance_id.clone()),
            message: String::new(),
        }))
        .await
    {
        tracing::warn!(%instance_id, "Failed sending RegisterAck: {}", e);
        registry.remove(&instance_id);
        return;
    }

    tracing::info!(
        %instance_id,
        namespace = %request.namespace,
        interfaces = ?request.metadata.interfaces,
        "Pattern registered"
    );

    let (sink, mut source) = stream.split();
    let send_task = tokio::spawn(forward_commands(sink, command_rx, instance_id.clone()));

    // Receive loop: responses resolve pending sinks, heartbeats update
    // last-seen, anything else is a protocol violation.
    loop {
        match source.recv::<PatternToProxy>().await {
            Ok(Some(PatternToProxy::Response(frame))) => {
                let correlation_id = frame.correlation_id.clone();
                if !handle.resolve_response(frame) {
                    tracing::debug!(
                        %instance_id,
                        %correlation_id,
                        "Response with unknown correlation id dropped"
                    );
                }
            }
            Ok(Some(PatternToProxy::Heartbeat(heartbeat))) => {
                handle.note_heartbeat(&heartbeat);
            }
            Ok(Some(PatternToProxy::Register(_))) => {
                tracing::warn!(%instance_id, "Duplicate RegisterRequest, closing stream");
                break;
            }
            Ok(None) => {
                tracing::info!(%instance_id, "Pattern stream closed");
                break;
            }
            Err(e) => {
                tracing::warn!(%instance_id, "Pattern stream failed: {}", e);
                break;
            }
        }
    }

    // Teardown: registry entry first so dispatch stops finding the instance,
    // then the send task (closing the queue), then pending callers.
    registry.remove(&instance_id);
    send_task.abort();
    handle.fail_pending();
    tracing::info!(%instance_id, "Pattern connection cleaned up");
}

/// Forward queued commands to the stream in send-order
async fn forward_commands(
    mut sink: FrameSink<TcpStream>,
    mut commands: mpsc::Receiver<CommandFrame>,
    instance_id: String,
) {
    while let Some(frame) = commands.recv().await {
        if let Err(e) = sink.send(&ProxyToPattern::Command(frame)).await {
            tracing::warn!(%instance_id, "Failed sending command: {}", e);
            break;
        }
    }
}

fn validate_registration(request: &RegisterRequest) -> std::result::Result<(), String> {
    if request.pattern_name.is_empty() {
        return Err("pattern_name must not be empty".to_string());
    }
    if request.namespace.is_empty() {
        return Err("namespace must not be empty".to_string());
    }
    if request.process_id == 0 {
        return Err("process_id must not be zero".to_string());
    }
    // Declared interfaces must be backed by at least one slot or be a
    // pattern-level contract; an empty declaration set serves nothing.
    if request.metadata.interfaces.is_empty() {
        return Err("at least one interface declaration is required".to_string());
    }
    Ok(())
}

fn frame_kind(frame: &PatternToProxy) -> &'static str {
    match frame {
        PatternToProxy::Register(_) => "register",
        PatternToProxy::Heartbeat(_) => "heartbeat",
        PatternToProxy::Response(_) => "response",
    }
}
