//! Control-plane listener
//!
//! Accepts pattern connections on the control port. Each connection is an
//! independent bidirectional stream served by [`super::connection`]. The
//! proxy opens no outbound connections to patterns; patterns dial in.

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::error::Result;

use super::connection::serve_pattern_connection;
use super::registry::InstanceRegistry;

/// Bind the control listener for the configured port
pub async fn bind(config: &ProxyConfig) -> Result<TcpListener> {
    let addr = format!("0.0.0.0:{}", config.control_port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Pattern control listener on {}", addr);
    Ok(listener)
}

/// Accept pattern connections until shutdown
pub async fn run(
    listener: TcpListener,
    registry: Arc<InstanceRegistry>,
    config: ProxyConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (tcp, peer) = accepted?;
                tracing::debug!(%peer, "Pattern connection accepted");
                tokio::spawn(serve_pattern_connection(
                    tcp,
                    peer,
                    registry.clone(),
                    config.clone(),
                ));
            }
            _ = shutdown.cancelled() => {
                tracing::info!("Control listener shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatternRuntimeConfig;
    use crate::error::Result;
    use crate::pattern::{PatternConfig, PatternHandler, PatternRuntime};
    use crate::protocol::codec::ControlStream;
    use crate::protocol::frame::{
        HealthReport, HealthStatus, PatternToProxy, ProxyCommand, ProxyToPattern, RegisterAck,
    };
    use crate::proxy::dispatch::Dispatcher;
    use crate::slots::SlotRequirement;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::net::TcpStream;

    struct EchoPattern;

    #[async_trait]
    impl PatternHandler for EchoPattern {
        fn name(&self) -> &str {
            "echo"
        }
        fn version(&self) -> &str {
            "0.0.1"
        }
        fn interface_declarations(&self) -> Vec<String> {
            vec!["pattern_echo".to_string()]
        }
        fn slot_requirements(&self) -> Vec<SlotRequirement> {
            Vec::new()
        }
        async fn initialize(&mut self, _config: PatternConfig) -> Result<()> {
            Ok(())
        }
        async fn start(&mut self) -> Result<()> {
            Ok(())
        }
        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }
        async fn health(&self) -> HealthReport {
            HealthReport::healthy("echo ok")
        }
    }

    struct Stack {
        registry: Arc<InstanceRegistry>,
        dispatcher: Dispatcher,
        addr: std::net::SocketAddr,
        shutdown: CancellationToken,
    }

    async fn start_stack() -> Stack {
        let registry = Arc::new(InstanceRegistry::new());
        let config = ProxyConfig {
            register_timeout_secs: 1,
            ..ProxyConfig::default()
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(run(
            listener,
            registry.clone(),
            config,
            shutdown.clone(),
        ));
        let dispatcher = Dispatcher::new(registry.clone(), Duration::from_secs(2));
        Stack {
            registry,
            dispatcher,
            addr,
            shutdown,
        }
    }

    fn pattern_config(addr: std::net::SocketAddr, namespace: &str) -> PatternRuntimeConfig {
        PatternRuntimeConfig {
            proxy_addr: addr.to_string(),
            namespace: namespace.to_string(),
            heartbeat_interval_secs: 60,
            reconnect_delay_secs: 1,
            max_reconnects: 2,
            shutdown_timeout_secs: 2,
        }
    }

    async fn wait_for_registration(registry: &InstanceRegistry, namespace: &str) -> String {
        for _ in 0..100 {
            if let Some(handle) = registry.get_by_namespace(namespace) {
                return handle.instance_id.clone();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("pattern for {} never registered", namespace);
    }

    #[tokio::test]
    async fn test_register_then_dispatch_full_lifecycle() {
        let stack = start_stack().await;
        let runtime = PatternRuntime::new(EchoPattern, pattern_config(stack.addr, "ns-echo"));
        let pattern = tokio::spawn(runtime.run());

        let instance_id = wait_for_registration(&stack.registry, "ns-echo").await;
        assert!(instance_id.starts_with("echo-"));

        let body = stack
            .dispatcher
            .send_to_instance(
                &instance_id,
                ProxyCommand::Initialize {
                    config: serde_json::json!({}),
                },
            )
            .await
            .unwrap();
        assert!(body.success());

        let body = stack
            .dispatcher
            .send_to_instance(&instance_id, ProxyCommand::Start)
            .await
            .unwrap();
        assert!(body.success());

        // Dispatch by namespace, gated on a declared interface.
        let body = stack
            .dispatcher
            .send_to_namespace("ns-echo", Some("pattern_echo"), ProxyCommand::HealthCheck)
            .await
            .unwrap();
        match body {
            crate::protocol::frame::ResponseBody::HealthCheck { report } => {
                assert_eq!(report.status, HealthStatus::Healthy);
            }
            other => panic!("expected health response, got {:?}", other),
        }

        // An undeclared interface is refused without dialing the pattern.
        let err = stack
            .dispatcher
            .send_to_namespace("ns-echo", Some("keyvalue_basic"), ProxyCommand::HealthCheck)
            .await
            .unwrap_err();
        assert_eq!(
            err.status().unwrap().code,
            crate::error::ErrorCode::InterfaceNotSupported
        );

        let body = stack
            .dispatcher
            .send_to_instance(
                &instance_id,
                ProxyCommand::Shutdown {
                    reason: "test done".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(body.success());

        pattern.await.unwrap().unwrap();
        stack.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_registry_gc_after_stream_loss() {
        let stack = start_stack().await;
        let runtime = PatternRuntime::new(EchoPattern, pattern_config(stack.addr, "ns-gone"));
        let pattern = tokio::spawn(runtime.run());

        let instance_id = wait_for_registration(&stack.registry, "ns-gone").await;

        // Kill the pattern task; its socket drops with it.
        pattern.abort();
        let _ = pattern.await;

        // The registry entry is garbage-collected promptly...
        for _ in 0..100 {
            if stack.registry.get(&instance_id).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(stack.registry.get(&instance_id).is_none());

        // ...and dispatch to the vanished instance fails retryably.
        let err = stack
            .dispatcher
            .send_to_instance(&instance_id, ProxyCommand::HealthCheck)
            .await
            .unwrap_err();
        let status = err.status().unwrap();
        assert_eq!(status.code, crate::error::ErrorCode::PatternNotConnected);
        assert!(status.is_retryable());
        stack.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_connection_that_never_registers_is_dropped() {
        let stack = start_stack().await;
        let tcp = TcpStream::connect(stack.addr).await.unwrap();
        let mut stream = ControlStream::new(tcp);

        // Register timeout in the stack config is 1s; the proxy closes us.
        let result: std::result::Result<Option<ProxyToPattern>, _> =
            tokio::time::timeout(Duration::from_secs(3), stream.recv())
                .await
                .expect("proxy should close the idle connection");
        assert!(matches!(result, Ok(None)));
        assert!(stack.registry.is_empty());
        stack.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_malformed_registration_is_rejected() {
        let stack = start_stack().await;
        let tcp = TcpStream::connect(stack.addr).await.unwrap();
        let mut stream = ControlStream::new(tcp);

        // Heartbeat as the first frame is a protocol violation.
        stream
            .send(&PatternToProxy::Heartbeat(crate::protocol::frame::Heartbeat {
                state: crate::protocol::frame::LifecycleState::Unregistered,
                timestamp: chrono::Utc::now(),
            }))
            .await
            .unwrap();

        let result: std::result::Result<Option<ProxyToPattern>, _> =
            tokio::time::timeout(Duration::from_secs(3), stream.recv())
                .await
                .expect("proxy should close the stream");
        assert!(matches!(result, Ok(None)));
        stack.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_concurrent_registration_same_name_distinct_pids() {
        // Two raw registrations reusing pattern name "x" with PIDs 100/200.
        let stack = start_stack().await;

        let mut streams = Vec::new();
        for (pid, namespace) in [(100u32, "ns-a"), (200u32, "ns-b")] {
            let tcp = TcpStream::connect(stack.addr).await.unwrap();
            let mut stream = ControlStream::new(tcp);
            stream
                .send(&PatternToProxy::Register(
                    crate::protocol::frame::RegisterRequest {
                        pattern_name: "x".to_string(),
                        pattern_version: "0.0.1".to_string(),
                        process_id: pid,
                        namespace: namespace.to_string(),
                        metadata: crate::protocol::frame::PatternMetadata {
                            name: "x".to_string(),
                            version: "0.0.1".to_string(),
                            interfaces: vec!["pattern_test".to_string()],
                            slots: Vec::new(),
                        },
                        consumer_protocol: None,
                    },
                ))
                .await
                .unwrap();
            streams.push(stream);
        }

        let mut instance_ids = Vec::new();
        for stream in &mut streams {
            let ack: ProxyToPattern = stream.recv().await.unwrap().unwrap();
            match ack {
                ProxyToPattern::RegisterAck(RegisterAck {
                    success: true,
                    instance_id: Some(id),
                    ..
                }) => instance_ids.push(id),
                other => panic!("expected successful ack, got {:?}", other),
            }
        }

        instance_ids.sort();
        assert_eq!(instance_ids, vec!["x-100".to_string(), "x-200".to_string()]);
        assert_eq!(stack.registry.len(), 2);
        stack.shutdown.cancel();
    }
}
