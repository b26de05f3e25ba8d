//! Control-stream frame types
//!
//! Every frame is a tagged union. The first frame pattern→proxy must be
//! [`PatternToProxy::Register`]; the first frame proxy→pattern must be
//! [`ProxyToPattern::RegisterAck`]. The admin gateway carries the same shape
//! between launchers/proxies and the admin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::slots::SlotRequirement;

use super::correlation::CorrelationId;

// ============================================================================
// Shared vocabulary
// ============================================================================

/// Pattern lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unregistered,
    Registered,
    Initialized,
    Running,
    Stopping,
    Stopped,
    /// Terminal error state
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unregistered => "unregistered",
            Self::Registered => "registered",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Health verdict reported by a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health report returned to a `HealthCheck` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl HealthReport {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Registration payload
// ============================================================================

/// Capability advertisement captured at registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMetadata {
    /// Advertised pattern name
    pub name: String,
    /// Advertised pattern version
    pub version: String,
    /// Interfaces this instance is willing to serve
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Slots the pattern composes
    #[serde(default)]
    pub slots: Vec<SlotRequirement>,
}

/// Per-topic schema expectation inside a consumer protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicExpectation {
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
}

/// Governance metadata a consuming pattern declares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GovernanceMetadata {
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub data_usage: String,
    /// PII access class, e.g. `none`, `masked`, `full`
    #[serde(default)]
    pub pii_access: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compliance_frameworks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_messages_per_second: Option<u32>,
    #[serde(default)]
    pub access_pattern: String,
}

/// Declaration of what a pattern will consume, and under what policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConsumerProtocol {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<TopicExpectation>,
    #[serde(default)]
    pub governance: GovernanceMetadata,
}

/// First frame on a pattern→proxy stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub pattern_name: String,
    pub pattern_version: String,
    /// OS process id; combined with the pattern name to form the instance id
    pub process_id: u32,
    /// Namespace this instance serves
    pub namespace: String,
    pub metadata: PatternMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_protocol: Option<ConsumerProtocol>,
}

/// Reply to a [`RegisterRequest`], exactly one per stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Passive liveness signal; carries no correlation id and elicits no response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub state: LifecycleState,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Commands and responses
// ============================================================================

/// Lifecycle command issued by the proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ProxyCommand {
    /// Deliver configuration; the value tree is parsed pattern-side
    Initialize { config: serde_json::Value },
    Start,
    Stop { timeout_seconds: u64 },
    HealthCheck,
    Shutdown { reason: String },
}

impl ProxyCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Initialize { .. } => CommandKind::Initialize,
            Self::Start => CommandKind::Start,
            Self::Stop { .. } => CommandKind::Stop,
            Self::HealthCheck => CommandKind::HealthCheck,
            Self::Shutdown { .. } => CommandKind::Shutdown,
        }
    }
}

/// Command discriminant, used by the lifecycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Initialize,
    Start,
    Stop,
    HealthCheck,
    Shutdown,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialize => "Initialize",
            Self::Start => "Start",
            Self::Stop => "Stop",
            Self::HealthCheck => "HealthCheck",
            Self::Shutdown => "Shutdown",
        };
        write!(f, "{}", s)
    }
}

/// A command tagged with its fresh correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub command: ProxyCommand,
}

/// Response payload, one variant per command family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseBody {
    Initialize { success: bool, message: String },
    Start { success: bool, message: String },
    Stop { success: bool, message: String },
    HealthCheck { report: HealthReport },
    Shutdown { success: bool, message: String },
}

impl ResponseBody {
    /// Whether the command succeeded
    pub fn success(&self) -> bool {
        match self {
            Self::Initialize { success, .. }
            | Self::Start { success, .. }
            | Self::Stop { success, .. }
            | Self::Shutdown { success, .. } => *success,
            Self::HealthCheck { report } => report.status != HealthStatus::Unhealthy,
        }
    }

    /// Human-readable outcome message
    pub fn message(&self) -> &str {
        match self {
            Self::Initialize { message, .. }
            | Self::Start { message, .. }
            | Self::Stop { message, .. }
            | Self::Shutdown { message, .. } => message,
            Self::HealthCheck { report } => &report.message,
        }
    }
}

/// A response echoing its command's correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub body: ResponseBody,
}

// ============================================================================
// Stream frame families: pattern ↔ proxy
// ============================================================================

/// Frames a pattern sends to its proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternToProxy {
    Register(RegisterRequest),
    Heartbeat(Heartbeat),
    Response(ResponseFrame),
}

/// Frames a proxy sends to a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProxyToPattern {
    RegisterAck(RegisterAck),
    Command(CommandFrame),
}

// ============================================================================
// Stream frame families: launcher / proxy ↔ admin gateway
// ============================================================================

/// Launcher registration payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LauncherRegistration {
    pub launcher_id: String,
    pub address: String,
    pub region: String,
    pub version: String,
    pub max_patterns: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

/// Proxy registration payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRegistration {
    pub proxy_id: String,
    pub address: String,
    pub version: String,
}

/// Liveness signal from a launcher or proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHeartbeat {
    /// Free pattern slots, reported by launchers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_slots: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

/// A node's reply to an instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionResponse {
    pub correlation_id: CorrelationId,
    pub success: bool,
    #[serde(default)]
    pub message: String,
    /// PID of the spawned process, on a successful spawn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    /// Pattern response, when the instruction was a relayed command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseBody>,
    /// Structured error, when the instruction failed with one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::error::PrismError>,
}

/// Report that a supervised pattern process disappeared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternExit {
    pub namespace: String,
    pub pattern_name: String,
    pub process_id: u32,
    #[serde(default)]
    pub message: String,
}

/// Frames a launcher or proxy sends to the admin gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeToAdmin {
    RegisterLauncher(LauncherRegistration),
    RegisterProxy(ProxyRegistration),
    Heartbeat(NodeHeartbeat),
    Response(InstructionResponse),
    PatternExited(PatternExit),
}

/// Instruction issued by the admin to a launcher or proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "instruction", rename_all = "snake_case")]
pub enum NodeInstruction {
    /// Spawn a pattern executable for a namespace (launchers)
    SpawnPattern {
        pattern: String,
        namespace: String,
        proxy_addr: String,
        config: serde_json::Value,
    },
    /// Stop the process serving a namespace (launchers)
    StopPattern {
        namespace: String,
        timeout_seconds: u64,
    },
    /// Relay a lifecycle command to the pattern serving a namespace (proxies)
    DispatchCommand {
        namespace: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        required_interface: Option<String>,
        command: ProxyCommand,
    },
}

/// An instruction tagged with its correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionFrame {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub instruction: NodeInstruction,
}

/// Frames the admin gateway sends to a launcher or proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminToNode {
    RegisterAck { success: bool, message: String },
    Instruction(InstructionFrame),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::Capability;

    fn register_request() -> RegisterRequest {
        RegisterRequest {
            pattern_name: "mailbox".to_string(),
            pattern_version: "0.1.0".to_string(),
            process_id: 4242,
            namespace: "mailbox-x".to_string(),
            metadata: PatternMetadata {
                name: "mailbox".to_string(),
                version: "0.1.0".to_string(),
                interfaces: vec!["pattern_mailbox".to_string(), "pattern_consumer".to_string()],
                slots: vec![
                    SlotRequirement::required("message_source", vec![Capability::PubSub]),
                    SlotRequirement::required("table_writer", vec![Capability::TableWrite]),
                    SlotRequirement::optional("table_reader", vec![Capability::TableRead]),
                ],
            },
            consumer_protocol: Some(ConsumerProtocol {
                topics: vec![TopicExpectation {
                    topic: "evt.>".to_string(),
                    schema_id: None,
                }],
                governance: GovernanceMetadata {
                    team: "data-platform".to_string(),
                    purpose: "durable mailbox".to_string(),
                    pii_access: "none".to_string(),
                    retention_days: Some(30),
                    ..Default::default()
                },
            }),
        }
    }

    #[test]
    fn test_register_round_trip() {
        let frame = PatternToProxy::Register(register_request());
        let json = serde_json::to_string(&frame).unwrap();
        let back: PatternToProxy = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, back);
    }

    #[test]
    fn test_command_round_trip() {
        let frames = vec![
            ProxyToPattern::RegisterAck(RegisterAck {
                success: true,
                instance_id: Some("mailbox-4242".to_string()),
                message: String::new(),
            }),
            ProxyToPattern::Command(CommandFrame {
                correlation_id: CorrelationId::new("c-1"),
                command: ProxyCommand::Initialize {
                    config: serde_json::json!({"slots": {"kv_store": {"backend": "memory"}}}),
                },
            }),
            ProxyToPattern::Command(CommandFrame {
                correlation_id: CorrelationId::new("c-2"),
                command: ProxyCommand::Stop { timeout_seconds: 5 },
            }),
            ProxyToPattern::Command(CommandFrame {
                correlation_id: CorrelationId::new("c-3"),
                command: ProxyCommand::Shutdown {
                    reason: "drain".to_string(),
                },
            }),
        ];
        for frame in frames {
            let json = serde_json::to_string(&frame).unwrap();
            let back: ProxyToPattern = serde_json::from_str(&json).unwrap();
            assert_eq!(frame, back);
        }
    }

    #[test]
    fn test_response_round_trip() {
        let frames = vec![
            PatternToProxy::Response(ResponseFrame {
                correlation_id: CorrelationId::new("c-1"),
                body: ResponseBody::Initialize {
                    success: false,
                    message: "bad config".to_string(),
                },
            }),
            PatternToProxy::Response(ResponseFrame {
                correlation_id: CorrelationId::new("c-2"),
                body: ResponseBody::HealthCheck {
                    report: HealthReport::healthy("ok").with_detail("events", "12"),
                },
            }),
            PatternToProxy::Heartbeat(Heartbeat {
                state: LifecycleState::Running,
                timestamp: Utc::now(),
            }),
        ];
        for frame in frames {
            let json = serde_json::to_string(&frame).unwrap();
            let back: PatternToProxy = serde_json::from_str(&json).unwrap();
            assert_eq!(frame, back);
        }
    }

    #[test]
    fn test_gateway_round_trip() {
        let frames = vec![
            NodeToAdmin::RegisterLauncher(LauncherRegistration {
                launcher_id: "launcher-01".to_string(),
                address: "10.0.0.5:0".to_string(),
                region: "local".to_string(),
                version: "0.1.0".to_string(),
                max_patterns: 8,
                capabilities: vec!["mailbox".to_string()],
            }),
            NodeToAdmin::Response(InstructionResponse {
                correlation_id: CorrelationId::new("c-1"),
                success: true,
                message: String::new(),
                process_id: Some(100),
                response: None,
                error: None,
            }),
            NodeToAdmin::PatternExited(PatternExit {
                namespace: "mailbox-x".to_string(),
                pattern_name: "mailbox".to_string(),
                process_id: 100,
                message: "process missing".to_string(),
            }),
        ];
        for frame in frames {
            let json = serde_json::to_string(&frame).unwrap();
            let back: NodeToAdmin = serde_json::from_str(&json).unwrap();
            assert_eq!(frame, back);
        }

        let instructions = vec![
            AdminToNode::Instruction(InstructionFrame {
                correlation_id: CorrelationId::new("c-9"),
                instruction: NodeInstruction::SpawnPattern {
                    pattern: "mailbox".to_string(),
                    namespace: "mailbox-x".to_string(),
                    proxy_addr: "127.0.0.1:8980".to_string(),
                    config: serde_json::json!({"behavior": {"topic": "evt.>"}}),
                },
            }),
            AdminToNode::Instruction(InstructionFrame {
                correlation_id: CorrelationId::new("c-10"),
                instruction: NodeInstruction::DispatchCommand {
                    namespace: "mailbox-x".to_string(),
                    required_interface: Some("pattern_mailbox".to_string()),
                    command: ProxyCommand::HealthCheck,
                },
            }),
        ];
        for instruction in instructions {
            let json = serde_json::to_string(&instruction).unwrap();
            let back: AdminToNode = serde_json::from_str(&json).unwrap();
            assert_eq!(instruction, back);
        }
    }

    #[test]
    fn test_response_success_helper() {
        let ok = ResponseBody::Start {
            success: true,
            message: "running".to_string(),
        };
        assert!(ok.success());
        let unhealthy = ResponseBody::HealthCheck {
            report: HealthReport::unhealthy("backend down"),
        };
        assert!(!unhealthy.success());
    }

    #[test]
    fn test_lifecycle_state_display() {
        assert_eq!(LifecycleState::Running.to_string(), "running");
        assert_eq!(LifecycleState::Failed.to_string(), "failed");
    }
}
