//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence
//! (highest to lowest):
//! 1. Environment variables (prefix: PRISM_)
//! 2. Current working directory: ./prism.toml
//! 3. Default values
//!
//! All four process kinds (admin, proxy, launcher, pattern executables) share
//! one configuration shape; each reads the sections relevant to it.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Process-level configuration
    pub service: ServiceConfig,

    /// Admin control plane
    #[serde(default)]
    pub admin: AdminConfig,

    /// Proxy control plane
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Launcher
    #[serde(default)]
    pub launcher: LauncherConfig,

    /// Admin storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Pattern runtime (read by pattern executables)
    #[serde(default)]
    pub pattern: PatternRuntimeConfig,
}

impl Config {
    /// Load configuration from prism.toml and PRISM_* environment variables
    pub fn load() -> Result<Self> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("prism.toml"))
            .merge(Env::prefixed("PRISM_").split("__"))
            .extract()?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            admin: AdminConfig::default(),
            proxy: ProxyConfig::default(),
            launcher: LauncherConfig::default(),
            storage: StorageConfig::default(),
            pattern: PatternRuntimeConfig::default(),
        }
    }
}

/// Process-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Process name, used in logs and registrations
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            environment: default_environment(),
        }
    }
}

/// Admin control plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Port for the admin RPC surface
    #[serde(default = "default_admin_rpc_port")]
    pub rpc_port: u16,

    /// Port for the control gateway (launcher and proxy streams)
    #[serde(default = "default_admin_gateway_port")]
    pub gateway_port: u16,

    /// Number of namespace partitions
    #[serde(default = "default_partition_count")]
    pub partition_count: u32,

    /// Deadline for short admin calls, in seconds
    #[serde(default = "default_admin_deadline")]
    pub deadline_secs: u64,

    /// Deadline for a launcher to acknowledge a spawn instruction, in seconds
    #[serde(default = "default_spawn_timeout")]
    pub spawn_timeout_secs: u64,

    /// A peer missing heartbeats for this long is marked unhealthy
    #[serde(default = "default_liveness_window")]
    pub liveness_window_secs: u64,
}

impl AdminConfig {
    /// Deadline for short admin calls
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Deadline for spawn instructions
    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_secs(self.spawn_timeout_secs)
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            rpc_port: default_admin_rpc_port(),
            gateway_port: default_admin_gateway_port(),
            partition_count: default_partition_count(),
            deadline_secs: default_admin_deadline(),
            spawn_timeout_secs: default_spawn_timeout(),
            liveness_window_secs: default_liveness_window(),
        }
    }
}

/// Proxy control plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy identity; defaults to a host-derived name when empty
    #[serde(default = "default_proxy_id")]
    pub proxy_id: String,

    /// Port patterns dial in to
    #[serde(default = "default_proxy_control_port")]
    pub control_port: u16,

    /// Port for the proxy HTTP edge
    #[serde(default = "default_proxy_http_port")]
    pub http_port: u16,

    /// Address of the admin gateway
    #[serde(default = "default_admin_gateway_addr")]
    pub admin_addr: String,

    /// Address advertised to the admin for data-plane routing
    #[serde(default)]
    pub advertise_addr: Option<String>,

    /// A connection that has not registered within this window is dropped
    #[serde(default = "default_register_timeout")]
    pub register_timeout_secs: u64,

    /// Heartbeat interval towards the admin
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Bound of the per-pattern outbound command queue
    #[serde(default = "default_command_queue_depth")]
    pub command_queue_depth: usize,

    /// Default deadline for dispatched commands, in seconds
    #[serde(default = "default_dispatch_deadline")]
    pub dispatch_deadline_secs: u64,
}

impl ProxyConfig {
    /// Window a pattern has to send its RegisterRequest
    pub fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout_secs)
    }

    /// Heartbeat interval towards the admin
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Default dispatch deadline
    pub fn dispatch_deadline(&self) -> Duration {
        Duration::from_secs(self.dispatch_deadline_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxy_id: default_proxy_id(),
            control_port: default_proxy_control_port(),
            http_port: default_proxy_http_port(),
            admin_addr: default_admin_gateway_addr(),
            advertise_addr: None,
            register_timeout_secs: default_register_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            command_queue_depth: default_command_queue_depth(),
            dispatch_deadline_secs: default_dispatch_deadline(),
        }
    }
}

/// Launcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Launcher identity
    #[serde(default = "default_launcher_id")]
    pub launcher_id: String,

    /// Region label advertised to the admin
    #[serde(default = "default_region")]
    pub region: String,

    /// Address of the admin gateway
    #[serde(default = "default_admin_gateway_addr")]
    pub admin_addr: String,

    /// Directory holding pattern executables
    #[serde(default = "default_binaries_dir")]
    pub binaries_dir: PathBuf,

    /// Directory for PID files and per-process logs
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    /// Maximum concurrently supervised pattern processes
    #[serde(default = "default_max_patterns")]
    pub max_patterns: u32,

    /// Liveness poll interval, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Grace period between SIGTERM and SIGKILL, in seconds
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    /// Heartbeat interval towards the admin
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

impl LauncherConfig {
    /// Liveness poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// SIGTERM→SIGKILL grace period
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Heartbeat interval towards the admin
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            launcher_id: default_launcher_id(),
            region: default_region(),
            admin_addr: default_admin_gateway_addr(),
            binaries_dir: default_binaries_dir(),
            logs_dir: default_logs_dir(),
            max_patterns: default_max_patterns(),
            poll_interval_secs: default_poll_interval(),
            stop_grace_secs: default_stop_grace(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

/// Admin storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite connection URL
    #[serde(default = "default_storage_url")]
    pub url: String,

    /// Maximum pool connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between connection attempts, in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: default_storage_url(),
            max_connections: default_max_connections(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

/// Pattern runtime configuration, read by pattern executables
///
/// The launcher overrides `proxy_addr` and `namespace` through the
/// environment when it spawns a pattern process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRuntimeConfig {
    /// Address of the proxy control port
    #[serde(default = "default_proxy_control_addr")]
    pub proxy_addr: String,

    /// Namespace this instance serves
    #[serde(default)]
    pub namespace: String,

    /// Heartbeat interval, in seconds
    #[serde(default = "default_pattern_heartbeat")]
    pub heartbeat_interval_secs: u64,

    /// Initial redial delay before registration succeeds, in seconds
    #[serde(default = "default_retry_delay")]
    pub reconnect_delay_secs: u64,

    /// Redial attempts before the process gives up
    #[serde(default = "default_max_retries")]
    pub max_reconnects: u32,

    /// Bound on a Shutdown-triggered stop, in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl PatternRuntimeConfig {
    /// Heartbeat interval
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Initial redial delay
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Bound on a Shutdown-triggered stop
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for PatternRuntimeConfig {
    fn default() -> Self {
        Self {
            proxy_addr: default_proxy_control_addr(),
            namespace: String::new(),
            heartbeat_interval_secs: default_pattern_heartbeat(),
            reconnect_delay_secs: default_retry_delay(),
            max_reconnects: default_max_retries(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

// Default value functions

fn default_service_name() -> String {
    "prism".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_admin_rpc_port() -> u16 {
    8981
}

fn default_admin_gateway_port() -> u16 {
    7070
}

fn default_partition_count() -> u32 {
    16
}

fn default_admin_deadline() -> u64 {
    10
}

fn default_spawn_timeout() -> u64 {
    10
}

fn default_liveness_window() -> u64 {
    30
}

fn default_proxy_id() -> String {
    "proxy-0".to_string()
}

fn default_proxy_control_port() -> u16 {
    8980
}

fn default_proxy_http_port() -> u16 {
    8982
}

fn default_admin_gateway_addr() -> String {
    "127.0.0.1:7070".to_string()
}

fn default_proxy_control_addr() -> String {
    "127.0.0.1:8980".to_string()
}

fn default_register_timeout() -> u64 {
    30
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_command_queue_depth() -> usize {
    16
}

fn default_dispatch_deadline() -> u64 {
    10
}

fn default_launcher_id() -> String {
    "launcher-0".to_string()
}

fn default_region() -> String {
    "local".to_string()
}

fn default_binaries_dir() -> PathBuf {
    PathBuf::from("./bin")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_max_patterns() -> u32 {
    8
}

fn default_poll_interval() -> u64 {
    5
}

fn default_stop_grace() -> u64 {
    5
}

fn default_pattern_heartbeat() -> u64 {
    5
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_storage_url() -> String {
    "sqlite://prism-admin.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2
}
