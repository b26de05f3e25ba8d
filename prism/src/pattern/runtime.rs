//! Pattern-side control loop
//!
//! Owns the single bidirectional stream to the proxy. The very first frame
//! out is the `RegisterRequest`; no command is processed until the proxy
//! acknowledges with an instance id. Commands are handled serially in
//! arrival order and answered on the same stream, tagged with the command's
//! correlation id. Heartbeats interleave between commands.

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::net::TcpStream;
use tokio::time::{interval, sleep, timeout, Duration, MissedTickBehavior};

use crate::config::PatternRuntimeConfig;
use crate::error::{Error, PrismError, Result, Severity};
use crate::protocol::codec::ControlStream;
use crate::protocol::frame::{
    CommandFrame, CommandKind, HealthReport, Heartbeat, LifecycleState, PatternMetadata,
    PatternToProxy, ProxyCommand, ProxyToPattern, RegisterRequest, ResponseBody, ResponseFrame,
};

use super::config::PatternConfig;
use super::lifecycle::{self, Transition};
use super::PatternHandler;

/// Drives a [`PatternHandler`] against its assigned proxy
pub struct PatternRuntime<H> {
    handler: H,
    config: PatternRuntimeConfig,
    state: LifecycleState,
    instance_id: Option<String>,
}

impl<H: PatternHandler> PatternRuntime<H> {
    pub fn new(handler: H, config: PatternRuntimeConfig) -> Self {
        Self {
            handler,
            config,
            state: LifecycleState::Unregistered,
            instance_id: None,
        }
    }

    /// Instance id assigned by the proxy, once registered
    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Connect, register, and serve commands until shutdown or stream loss
    ///
    /// Returns `Ok` on an orderly end (a `Shutdown` command, or stream loss
    /// after a graceful stop; the launcher restarts the process on its own
    /// schedule). Returns `Err` when registration never succeeds or the
    /// pattern ends in `Failed`.
    pub async fn run(mut self) -> Result<()> {
        let mut stream = self.connect_and_register().await?;
        tracing::info!(
            instance_id = self.instance_id.as_deref().unwrap_or(""),
            namespace = %self.config.namespace,
            "Registered with proxy"
        );
        self.serve(&mut stream).await
    }

    /// Dial the proxy with bounded exponential backoff until registered
    async fn connect_and_register(&mut self) -> Result<ControlStream<TcpStream>> {
        let base_delay = self.config.reconnect_delay();
        let mut attempt = 0u32;

        loop {
            match self.try_register().await {
                Ok((stream, instance_id)) => {
                    self.instance_id = Some(instance_id);
                    self.state = LifecycleState::Registered;
                    return Ok(stream);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.config.max_reconnects {
                        tracing::error!(
                            "Registration failed after {} attempt(s): {}",
                            attempt,
                            e
                        );
                        self.state = LifecycleState::Failed;
                        return Err(e);
                    }
                    let delay = base_delay * 2u32.pow(attempt.saturating_sub(1).min(5));
                    tracing::warn!(
                        "Registration attempt {} failed: {}. Retrying in {:?}...",
                        attempt,
                        e,
                        delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn try_register(&self) -> Result<(ControlStream<TcpStream>, String)> {
        let tcp = TcpStream::connect(&self.config.proxy_addr).await?;
        let mut stream = ControlStream::new(tcp);

        let request = RegisterRequest {
            pattern_name: self.handler.name().to_string(),
            pattern_version: self.handler.version().to_string(),
            process_id: std::process::id(),
            namespace: self.config.namespace.clone(),
            metadata: PatternMetadata {
                name: self.handler.name().to_string(),
                version: self.handler.version().to_string(),
                interfaces: self.handler.interface_declarations(),
                slots: self.handler.slot_requirements(),
            },
            consumer_protocol: self.handler.consumer_protocol(),
        };
        stream.send(&PatternToProxy::Register(request)).await?;

        match stream.recv::<ProxyToPattern>().await? {
            Some(ProxyToPattern::RegisterAck(ack)) if ack.success => {
                let instance_id = ack.instance_id.ok_or_else(|| {
                    PrismError::protocol_violation("RegisterAck.success without an instance id")
                })?;
                Ok((stream, instance_id))
            }
            Some(ProxyToPattern::RegisterAck(ack)) => Err(PrismError::new(
                crate::error::ErrorCode::LifecycleRejected,
                format!("registration rejected: {}", ack.message),
            )
            .into()),
            Some(ProxyToPattern::Command(_)) => Err(PrismError::protocol_violation(
                "command received before RegisterAck",
            )
            .into()),
            None => Err(PrismError::protocol_violation(
                "stream closed before RegisterAck",
            )
            .into()),
        }
    }

    async fn serve(&mut self, stream: &mut ControlStream<TcpStream>) -> Result<()> {
        let mut heartbeat = interval(self.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = stream.recv::<ProxyToPattern>() => match frame {
                    Ok(Some(ProxyToPattern::Command(command))) => {
                        let CommandFrame { correlation_id, command } = command;
                        let (body, disconnect) = self.handle_command(command).await;
                        stream
                            .send(&PatternToProxy::Response(ResponseFrame {
                                correlation_id,
                                body,
                            }))
                            .await?;
                        if self.state == LifecycleState::Failed {
                            return Err(PrismError::internal(
                                "pattern entered failed state; terminating",
                            )
                            .with_namespace(self.config.namespace.clone())
                            .into());
                        }
                        if disconnect {
                            tracing::info!("Shutdown complete, disconnecting");
                            return Ok(());
                        }
                    }
                    Ok(Some(ProxyToPattern::RegisterAck(_))) => {
                        self.stop_quietly().await;
                        return Err(PrismError::protocol_violation(
                            "unexpected RegisterAck after registration",
                        )
                        .into());
                    }
                    Ok(None) => {
                        // Stream loss after registration: stop gracefully and
                        // exit; the launcher redials on its own schedule.
                        tracing::warn!("Proxy stream closed, stopping");
                        self.stop_quietly().await;
                        return Ok(());
                    }
                    Err(Error::Io(e)) => {
                        tracing::warn!("Proxy stream failed ({}), stopping", e);
                        self.stop_quietly().await;
                        return Ok(());
                    }
                    Err(e) => {
                        self.stop_quietly().await;
                        return Err(e);
                    }
                },
                _ = heartbeat.tick() => {
                    stream
                        .send(&PatternToProxy::Heartbeat(Heartbeat {
                            state: self.state,
                            timestamp: Utc::now(),
                        }))
                        .await?;
                }
            }
        }
    }

    /// Dispatch one command through the state machine
    ///
    /// Returns the response and whether the stream should be torn down.
    async fn handle_command(&mut self, command: ProxyCommand) -> (ResponseBody, bool) {
        let kind = command.kind();

        // HealthCheck never transitions state.
        if kind == CommandKind::HealthCheck {
            let report = if self.state == LifecycleState::Running {
                match AssertUnwindSafe(self.handler.health()).catch_unwind().await {
                    Ok(report) => report,
                    Err(panic) => HealthReport::unhealthy(format!(
                        "health check panicked: {}",
                        panic_message(&panic)
                    )),
                }
            } else {
                HealthReport::unhealthy(format!("pattern is not running (state: {})", self.state))
            };
            return (ResponseBody::HealthCheck { report }, false);
        }

        match lifecycle::evaluate(self.state, kind) {
            Transition::Idempotent => (
                success_body(kind, format!("already {}", self.state)),
                false,
            ),
            Transition::Reject { reason } => {
                tracing::warn!(state = %self.state, "Rejected {}: {}", kind, reason);
                (failure_body(kind, reason), false)
            }
            Transition::Accept { next } => self.execute(command, next).await,
        }
    }

    async fn execute(&mut self, command: ProxyCommand, next: LifecycleState) -> (ResponseBody, bool) {
        match command {
            ProxyCommand::Initialize { config } => {
                let parsed = match PatternConfig::from_value(&config) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        // Parse failures never leave the pattern half-initialized.
                        return (
                            ResponseBody::Initialize {
                                success: false,
                                message: format!("config parse error: {}", e),
                            },
                            false,
                        );
                    }
                };
                let result = AssertUnwindSafe(self.handler.initialize(parsed))
                    .catch_unwind()
                    .await;
                let body = self.settle(CommandKind::Initialize, result, next, self.state);
                (body, false)
            }
            ProxyCommand::Start => {
                let result = AssertUnwindSafe(self.handler.start()).catch_unwind().await;
                let body = self.settle(CommandKind::Start, result, next, self.state);
                (body, false)
            }
            ProxyCommand::Stop { timeout_seconds } => {
                let previous = self.state;
                self.state = LifecycleState::Stopping;
                if timeout_seconds == 0 {
                    // Zero grace escalates immediately: the callback is not
                    // awaited and the transition to Stopped is forced. The
                    // launcher handles the process-level SIGKILL.
                    tracing::warn!("Stop with zero grace, forcing stopped");
                    self.state = next;
                    return (
                        success_body(CommandKind::Stop, "forced stop (zero grace)".to_string()),
                        false,
                    );
                }
                let stop = AssertUnwindSafe(self.handler.stop()).catch_unwind();
                match timeout(Duration::from_secs(timeout_seconds), stop).await {
                    Ok(result) => {
                        let body = self.settle(CommandKind::Stop, result, next, previous);
                        (body, false)
                    }
                    Err(_) => {
                        self.state = previous;
                        (
                            failure_body(
                                CommandKind::Stop,
                                format!("stop did not finish within {}s", timeout_seconds),
                            ),
                            false,
                        )
                    }
                }
            }
            ProxyCommand::Shutdown { reason } => {
                tracing::info!("Shutdown requested: {}", reason);
                let needs_stop = matches!(
                    self.state,
                    LifecycleState::Running | LifecycleState::Stopping
                );
                self.state = LifecycleState::Stopping;
                if needs_stop {
                    let stop = AssertUnwindSafe(self.handler.stop()).catch_unwind();
                    match timeout(self.config.shutdown_timeout(), stop).await {
                        Ok(Ok(Ok(()))) => {}
                        Ok(Ok(Err(e))) => {
                            tracing::warn!("Stop during shutdown failed: {}", e);
                        }
                        Ok(Err(panic)) => {
                            tracing::warn!(
                                "Stop during shutdown panicked: {}",
                                panic_message(&panic)
                            );
                        }
                        Err(_) => {
                            // Stop hung past the bound; force the process out.
                            self.state = LifecycleState::Failed;
                            return (
                                ResponseBody::Shutdown {
                                    success: false,
                                    message: "stop timed out; forcing exit".to_string(),
                                },
                                true,
                            );
                        }
                    }
                }
                self.state = LifecycleState::Stopped;
                (
                    ResponseBody::Shutdown {
                        success: true,
                        message: format!("shutting down: {}", reason),
                    },
                    true,
                )
            }
            ProxyCommand::HealthCheck => unreachable!("handled before the lifecycle table"),
        }
    }

    /// Apply a callback outcome: advance on success, hold position on
    /// failure, fail the process on a critical error.
    fn settle(
        &mut self,
        kind: CommandKind,
        result: std::result::Result<Result<()>, Box<dyn Any + Send>>,
        next: LifecycleState,
        on_failure: LifecycleState,
    ) -> ResponseBody {
        match result {
            Ok(Ok(())) => {
                self.state = next;
                success_body(kind, format!("{}", next))
            }
            Ok(Err(e)) => {
                let critical = e
                    .status()
                    .map(|s| s.severity == Severity::Critical)
                    .unwrap_or(false);
                self.state = if critical {
                    LifecycleState::Failed
                } else {
                    on_failure
                };
                tracing::error!("{} failed: {}", kind, e);
                failure_body(kind, e.to_string())
            }
            Err(panic) => {
                self.state = on_failure;
                let message = panic_message(&panic);
                tracing::error!("{} panicked: {}", kind, message);
                failure_body(kind, format!("panic: {}", message))
            }
        }
    }

    async fn stop_quietly(&mut self) {
        if matches!(
            self.state,
            LifecycleState::Running | LifecycleState::Stopping
        ) {
            let stop = AssertUnwindSafe(self.handler.stop()).catch_unwind();
            if timeout(self.config.shutdown_timeout(), stop).await.is_err() {
                tracing::warn!("Graceful stop timed out");
            }
        }
        if self.state != LifecycleState::Failed {
            self.state = LifecycleState::Stopped;
        }
    }
}

fn success_body(kind: CommandKind, message: String) -> ResponseBody {
    build_body(kind, true, message)
}

fn failure_body(kind: CommandKind, message: String) -> ResponseBody {
    build_body(kind, false, message)
}

fn build_body(kind: CommandKind, success: bool, message: String) -> ResponseBody {
    match kind {
        CommandKind::Initialize => ResponseBody::Initialize { success, message },
        CommandKind::Start => ResponseBody::Start { success, message },
        CommandKind::Stop => ResponseBody::Stop { success, message },
        CommandKind::Shutdown => ResponseBody::Shutdown { success, message },
        CommandKind::HealthCheck => ResponseBody::HealthCheck {
            report: if success {
                HealthReport::healthy(message)
            } else {
                HealthReport::unhealthy(message)
            },
        },
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
