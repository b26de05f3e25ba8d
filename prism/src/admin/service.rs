//! The admin service
//!
//! Source of truth for namespaces, proxies, launchers, and pattern
//! assignments. `CreateNamespace` selects a partition (hash of the name),
//! resolves the partition's proxy, picks a launcher with a free slot,
//! issues the spawn instruction, drives the new pattern through
//! `Initialize`/`Start` via the proxy, and persists the namespace together
//! with its audit record in a single transaction. Every RPC, read or
//! write, leaves an audit record whether it succeeds or fails.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::time::{sleep, Duration};

use crate::config::AdminConfig;
use crate::error::{Error, ErrorCode, PrismError, Result};
use crate::protocol::frame::{NodeInstruction, ProxyCommand};

use super::audit::{AuditFilter, AuditRecord};
use super::gateway::{AdminGateway, NodeHandle};
use super::partitions::{partition_for, PartitionMap};
use super::storage::{
    AdminStore, LauncherRecord, NamespaceRecord, PatternRecord, ProxyRecord,
};

/// Interval between dispatch retries while a fresh pattern registers
const REGISTRATION_RETRY: Duration = Duration::from_millis(250);

/// Caller details carried into audit records
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Namespace configuration submitted with `CreateNamespace`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Pattern executable to run for this namespace
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Slot name → backend selection and tuning
    #[serde(default)]
    pub slots: BTreeMap<String, serde_json::Value>,
    /// Pattern behavior knobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_policy: Option<String>,
}

impl NamespaceConfig {
    /// The config value delivered to the pattern at `Initialize`
    pub fn to_pattern_config(&self) -> serde_json::Value {
        let mut root = serde_json::Map::new();
        root.insert(
            "slots".to_string(),
            serde_json::to_value(&self.slots).unwrap_or_default(),
        );
        if let Some(ref behavior) = self.behavior {
            root.insert("behavior".to_string(), behavior.clone());
        }
        serde_json::Value::Object(root)
    }
}

/// `CreateNamespace` input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNamespaceRequest {
    pub namespace: String,
    /// Proxy the caller reached, recorded for audit only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requesting_proxy: Option<String>,
    pub principal: String,
    pub config: NamespaceConfig,
}

/// `CreateNamespace` output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNamespaceResponse {
    pub success: bool,
    pub assigned_partition: u32,
    pub assigned_proxy: String,
    pub message: String,
}

/// The admin control plane
pub struct AdminService {
    store: Arc<AdminStore>,
    gateway: Arc<AdminGateway>,
    partitions: Arc<Mutex<PartitionMap>>,
    config: AdminConfig,
}

impl AdminService {
    pub fn new(
        store: Arc<AdminStore>,
        gateway: Arc<AdminGateway>,
        partitions: Arc<Mutex<PartitionMap>>,
        config: AdminConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            partitions,
            config,
        }
    }

    /// Create a namespace and bring its pattern up
    pub async fn create_namespace(
        &self,
        request: CreateNamespaceRequest,
        context: CallContext,
    ) -> Result<CreateNamespaceResponse> {
        let started = Instant::now();
        let audit = AuditRecord::new(
            &request.principal,
            "CreateNamespace",
            "namespace",
            &request.namespace,
        )
        .with_namespace(&request.namespace)
        .with_request(serde_json::to_value(&request)?)
        .with_client(context.client_ip, context.user_agent);

        match self.try_create(&request).await {
            Ok((response, namespace_record, pattern_record)) => {
                let audit = audit
                    .with_response(serde_json::to_value(&response)?)
                    .with_duration_ms(started.elapsed().as_millis() as i64);
                // Mutation and audit commit or roll back together.
                self.store.create_namespace(&namespace_record, &audit).await?;
                self.store.upsert_pattern(&pattern_record).await?;
                tracing::info!(
                    namespace = %request.namespace,
                    partition = response.assigned_partition,
                    proxy = %response.assigned_proxy,
                    "Namespace created"
                );
                Ok(response)
            }
            Err(e) => {
                let audit = audit
                    .failed(e.http_status().as_u16(), e.to_string())
                    .with_duration_ms(started.elapsed().as_millis() as i64);
                if let Err(audit_err) = self.store.append_audit(&audit).await {
                    tracing::error!("Failed writing failure audit: {}", audit_err);
                }
                Err(e)
            }
        }
    }

    async fn try_create(
        &self,
        request: &CreateNamespaceRequest,
    ) -> Result<(CreateNamespaceResponse, NamespaceRecord, PatternRecord)> {
        validate_namespace_name(&request.namespace)?;
        if request.config.pattern.is_empty() {
            return Err(PrismError::validation("config.pattern", "must not be empty").into());
        }

        if self.store.get_namespace(&request.namespace).await?.is_some() {
            return Err(PrismError::already_exists("namespace", &request.namespace)
                .with_namespace(request.namespace.clone())
                .into());
        }

        // Partition by name hash; the partition owns the proxy choice.
        let partition = {
            let partitions = self.partitions.lock().expect("partition lock");
            partition_for(&request.namespace, partitions.partition_count())
        };
        let proxy_id = {
            let partitions = self.partitions.lock().expect("partition lock");
            partitions.proxy_for(partition).map(String::from)
        };
        let proxy_id = proxy_id.ok_or_else(|| {
            Error::from(
                PrismError::no_proxy_available(partition)
                    .with_namespace(request.namespace.clone()),
            )
        })?;

        let proxy_record = self
            .store
            .get_proxy(&proxy_id)
            .await?
            .ok_or_else(|| PrismError::not_found("proxy", &proxy_id))?;

        let launcher = self.gateway.launcher_with_capacity().ok_or_else(|| {
            Error::from(
                PrismError::new(
                    ErrorCode::CapacityExhausted,
                    "no launcher has a free pattern slot",
                )
                .with_namespace(request.namespace.clone()),
            )
        })?;

        // Spawn, then drive the fresh instance to Running through its proxy.
        let pattern_config = request.config.to_pattern_config();
        let spawn = launcher
            .send_instruction(
                NodeInstruction::SpawnPattern {
                    pattern: request.config.pattern.clone(),
                    namespace: request.namespace.clone(),
                    proxy_addr: proxy_record.address.clone(),
                    config: pattern_config.clone(),
                },
                self.config.spawn_timeout(),
            )
            .await?;
        if !spawn.success {
            return Err(spawn
                .error
                .map(Error::from)
                .unwrap_or_else(|| {
                    PrismError::backend("launcher", "spawn", spawn.message.clone()).into()
                }));
        }
        let process_id = spawn.process_id.unwrap_or_default();

        if let Err(e) = self
            .drive_pattern(&proxy_id, &request.namespace, pattern_config)
            .await
        {
            // The process exists but never became ready; have the launcher
            // take it back down.
            tracing::warn!(
                namespace = %request.namespace,
                "Pattern never became ready ({}), stopping it",
                e
            );
            let _ = launcher
                .send_instruction(
                    NodeInstruction::StopPattern {
                        namespace: request.namespace.clone(),
                        timeout_seconds: 1,
                    },
                    self.config.spawn_timeout(),
                )
                .await;
            return Err(e);
        }

        let response = CreateNamespaceResponse {
            success: true,
            assigned_partition: partition,
            assigned_proxy: proxy_id.clone(),
            message: format!("namespace {} created", request.namespace),
        };
        let namespace_record = NamespaceRecord {
            name: request.namespace.clone(),
            description: request.config.description.clone(),
            created_at: Utc::now(),
            metadata: request.config.metadata.clone(),
            pattern: request.config.pattern.clone(),
            config: request.config.to_pattern_config(),
            auth_policy: request.config.auth_policy.clone(),
            partition,
            proxy_id: proxy_id.clone(),
        };
        let pattern_record = PatternRecord {
            namespace: request.namespace.clone(),
            pattern_name: request.config.pattern.clone(),
            launcher_id: launcher.node_id.clone(),
            proxy_id,
            process_id,
            state: "running".to_string(),
            updated_at: Utc::now(),
        };
        Ok((response, namespace_record, pattern_record))
    }

    /// Initialize and start a freshly spawned pattern through its proxy
    ///
    /// The pattern needs a moment to dial in and register, so dispatch is
    /// retried while the proxy reports it not connected, up to the spawn
    /// deadline.
    async fn drive_pattern(
        &self,
        proxy_id: &str,
        namespace: &str,
        config: serde_json::Value,
    ) -> Result<()> {
        let proxy = self
            .gateway
            .proxy(proxy_id)
            .ok_or_else(|| PrismError::pattern_not_connected(proxy_id))?;

        let deadline = Instant::now() + self.config.spawn_timeout();
        loop {
            let response = proxy
                .send_instruction(
                    NodeInstruction::DispatchCommand {
                        namespace: namespace.to_string(),
                        required_interface: None,
                        command: ProxyCommand::Initialize {
                            config: config.clone(),
                        },
                    },
                    self.config.deadline(),
                )
                .await?;
            if response.success {
                break;
            }
            let waiting_for_registration = response
                .error
                .as_ref()
                .is_some_and(|e| e.code == ErrorCode::PatternNotConnected);
            if waiting_for_registration && Instant::now() < deadline {
                sleep(REGISTRATION_RETRY).await;
                continue;
            }
            return Err(response
                .error
                .map(Error::from)
                .unwrap_or_else(|| {
                    PrismError::backend("pattern", "initialize", response.message.clone())
                        .with_namespace(namespace)
                        .into()
                }));
        }

        let response = proxy
            .send_instruction(
                NodeInstruction::DispatchCommand {
                    namespace: namespace.to_string(),
                    required_interface: None,
                    command: ProxyCommand::Start,
                },
                self.config.deadline(),
            )
            .await?;
        if !response.success {
            return Err(response
                .error
                .map(Error::from)
                .unwrap_or_else(|| {
                    PrismError::backend("pattern", "start", response.message.clone())
                        .with_namespace(namespace)
                        .into()
                }));
        }
        Ok(())
    }

    /// Delete a namespace: stop its pattern, then remove the rows
    ///
    /// The row deletion and its audit record share one transaction; the
    /// pattern stop is best-effort (a crashed launcher must not make a
    /// namespace undeletable).
    pub async fn delete_namespace(
        &self,
        name: &str,
        principal: &str,
        context: CallContext,
    ) -> Result<()> {
        let started = Instant::now();
        let audit = AuditRecord::new(principal, "DeleteNamespace", "namespace", name)
            .with_namespace(name)
            .with_client(context.client_ip, context.user_agent);

        let existing = match self.store.get_namespace(name).await? {
            Some(record) => record,
            None => {
                let e = Error::from(PrismError::not_found("namespace", name));
                let audit = audit
                    .failed(e.http_status().as_u16(), e.to_string())
                    .with_duration_ms(started.elapsed().as_millis() as i64);
                if let Err(audit_err) = self.store.append_audit(&audit).await {
                    tracing::error!("Failed writing failure audit: {}", audit_err);
                }
                return Err(e);
            }
        };

        if let Some(pattern) = self.store.get_pattern(name).await? {
            if let Some(launcher) = self.gateway.launcher(&pattern.launcher_id) {
                let result = launcher
                    .send_instruction(
                        NodeInstruction::StopPattern {
                            namespace: name.to_string(),
                            timeout_seconds: 5,
                        },
                        self.config.spawn_timeout(),
                    )
                    .await;
                if let Err(e) = result {
                    tracing::warn!(namespace = name, "Stop during delete failed: {}", e);
                }
            }
        }

        let audit = audit.with_duration_ms(started.elapsed().as_millis() as i64);
        self.store.delete_namespace(name, &audit).await?;
        tracing::info!(namespace = name, pattern = %existing.pattern, "Namespace deleted");
        Ok(())
    }

    /// All namespaces, sorted by name
    pub async fn list_namespaces(&self, principal: &str) -> Result<Vec<NamespaceRecord>> {
        let namespaces = self.store.list_namespaces().await?;
        self.audit_read(principal, "ListNamespaces", "namespace", "*").await;
        Ok(namespaces)
    }

    /// One namespace by name
    pub async fn get_namespace(&self, name: &str, principal: &str) -> Result<NamespaceRecord> {
        let result = self.store.get_namespace(name).await?;
        self.audit_read(principal, "GetNamespace", "namespace", name).await;
        result.ok_or_else(|| PrismError::not_found("namespace", name).into())
    }

    /// All proxies, most recently seen first
    pub async fn list_proxies(&self, principal: &str) -> Result<Vec<ProxyRecord>> {
        let proxies = self.store.list_proxies().await?;
        self.audit_read(principal, "ListProxies", "proxy", "*").await;
        Ok(proxies)
    }

    /// All launchers, most recently seen first
    pub async fn list_launchers(&self, principal: &str) -> Result<Vec<LauncherRecord>> {
        let launchers = self.store.list_launchers().await?;
        self.audit_read(principal, "ListLaunchers", "launcher", "*").await;
        Ok(launchers)
    }

    /// Audit records matching the filter, newest first
    pub async fn query_audit_logs(
        &self,
        filter: AuditFilter,
        principal: &str,
    ) -> Result<Vec<AuditRecord>> {
        let records = self.store.query_audit(&filter).await?;
        self.audit_read(principal, "QueryAuditLogs", "audit_log", "*").await;
        Ok(records)
    }

    /// Mark peers unhealthy when their heartbeats go stale
    pub async fn liveness_sweep(&self) -> Result<()> {
        self.store
            .mark_stale_unhealthy(Duration::from_secs(self.config.liveness_window_secs))
            .await
    }

    /// Launcher handle lookup, for operator tooling
    pub fn launcher(&self, launcher_id: &str) -> Option<Arc<NodeHandle>> {
        self.gateway.launcher(launcher_id)
    }

    async fn audit_read(&self, principal: &str, action: &str, resource_type: &str, id: &str) {
        let record = AuditRecord::new(principal, action, resource_type, id);
        if let Err(e) = self.store.append_audit(&record).await {
            tracing::warn!("Failed writing read audit: {}", e);
        }
    }
}

fn validate_namespace_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PrismError::validation("namespace", "must not be empty").into());
    }
    if name.len() > 128 {
        return Err(PrismError::validation("namespace", "must be at most 128 characters").into());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(PrismError::validation(
            "namespace",
            "may only contain alphanumerics, '-', '_', and '.'",
        )
        .into());
    }
    Ok(())
}
