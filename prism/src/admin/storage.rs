//! Admin storage over SQLite
//!
//! Tables: `namespaces`, `proxies`, `launchers`, `patterns`, `audit_logs`.
//! Each mutating RPC is one transaction, and the audit write is part of the
//! same transaction. `audit_logs` is append-only, enforced with triggers at
//! the database level rather than by application discipline.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::config::StorageConfig;
use crate::error::{PrismError, Result};

use super::audit::{AuditFilter, AuditRecord};

/// Liveness status of a proxy or launcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl NodeStatus {
    fn parse(s: &str) -> Self {
        match s {
            "healthy" => Self::Healthy,
            "unhealthy" => Self::Unhealthy,
            _ => Self::Unknown,
        }
    }
}

/// A namespace row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceRecord {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub pattern: String,
    /// Backend-slot configuration delivered to the pattern at Initialize
    pub config: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_policy: Option<String>,
    pub partition: u32,
    pub proxy_id: String,
}

/// A proxy row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub proxy_id: String,
    pub address: String,
    pub version: String,
    pub status: NodeStatus,
    pub last_seen: DateTime<Utc>,
}

/// A launcher row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LauncherRecord {
    pub launcher_id: String,
    pub address: String,
    pub region: String,
    pub version: String,
    pub status: NodeStatus,
    pub max_patterns: u32,
    pub available_slots: u32,
    pub capabilities: Vec<String>,
    pub last_seen: DateTime<Utc>,
}

/// A pattern-instance row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub namespace: String,
    pub pattern_name: String,
    pub launcher_id: String,
    pub proxy_id: String,
    pub process_id: u32,
    pub state: String,
    pub updated_at: DateTime<Utc>,
}

/// The admin's relational store
pub struct AdminStore {
    pool: SqlitePool,
}

impl AdminStore {
    /// Connect with retries and run migrations before anything else
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let mut attempt = 0u32;
        let delay = Duration::from_secs(config.retry_delay_secs);
        let pool = loop {
            match SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.url)
                .await
            {
                Ok(pool) => break pool,
                Err(e) => {
                    attempt += 1;
                    if attempt > config.max_retries {
                        return Err(e.into());
                    }
                    tracing::warn!(
                        "Storage connection attempt {} failed: {}. Retrying in {:?}...",
                        attempt,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// An in-memory store, for tests
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create or update the schema; the admin never serves traffic before
    /// this has completed
    pub async fn run_migrations(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS namespaces (
                name TEXT PRIMARY KEY,
                description TEXT,
                created_at TEXT NOT NULL,
                metadata TEXT NOT NULL,
                pattern TEXT NOT NULL,
                config TEXT NOT NULL,
                auth_policy TEXT,
                partition_id INTEGER NOT NULL,
                proxy_id TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS proxies (
                proxy_id TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                version TEXT NOT NULL,
                status TEXT NOT NULL,
                last_seen TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS launchers (
                launcher_id TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                region TEXT NOT NULL,
                version TEXT NOT NULL,
                status TEXT NOT NULL,
                max_patterns INTEGER NOT NULL,
                available_slots INTEGER NOT NULL,
                capabilities TEXT NOT NULL,
                last_seen TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS patterns (
                namespace TEXT PRIMARY KEY,
                pattern_name TEXT NOT NULL,
                launcher_id TEXT NOT NULL,
                proxy_id TEXT NOT NULL,
                process_id INTEGER NOT NULL,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                principal TEXT NOT NULL,
                action TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                namespace TEXT,
                request_body TEXT,
                response_body TEXT,
                status_code INTEGER NOT NULL,
                error TEXT,
                duration_ms INTEGER NOT NULL,
                client_ip TEXT,
                user_agent TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs (timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_namespace ON audit_logs (namespace)",
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_principal ON audit_logs (principal)",
            // Append-only, enforced at the database level
            r#"
            CREATE TRIGGER IF NOT EXISTS audit_no_update
            BEFORE UPDATE ON audit_logs
            BEGIN
                SELECT RAISE(ABORT, 'audit_logs is append-only');
            END
            "#,
            r#"
            CREATE TRIGGER IF NOT EXISTS audit_no_delete
            BEFORE DELETE ON audit_logs
            BEGIN
                SELECT RAISE(ABORT, 'audit_logs is append-only');
            END
            "#,
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Namespaces
    // ------------------------------------------------------------------

    /// Persist a namespace and its audit record in one transaction
    pub async fn create_namespace(
        &self,
        record: &NamespaceRecord,
        audit: &AuditRecord,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let metadata = serde_json::to_string(&record.metadata)?;
        let config = serde_json::to_string(&record.config)?;
        sqlx::query(
            r#"
            INSERT INTO namespaces (
                name, description, created_at, metadata, pattern,
                config, auth_policy, partition_id, proxy_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.name)
        .bind(&record.description)
        .bind(record.created_at)
        .bind(metadata)
        .bind(&record.pattern)
        .bind(config)
        .bind(&record.auth_policy)
        .bind(i64::from(record.partition))
        .bind(&record.proxy_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return crate::error::Error::from(PrismError::already_exists(
                        "namespace",
                        &record.name,
                    ));
                }
            }
            e.into()
        })?;
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete a namespace and its pattern row, auditing in the same transaction
    pub async fn delete_namespace(&self, name: &str, audit: &AuditRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM namespaces WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(PrismError::not_found("namespace", name).into());
        }
        sqlx::query("DELETE FROM patterns WHERE namespace = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceRecord>> {
        let row: Option<NamespaceRow> = sqlx::query_as("SELECT * FROM namespaces WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    pub async fn list_namespaces(&self) -> Result<Vec<NamespaceRecord>> {
        let rows: Vec<NamespaceRow> = sqlx::query_as("SELECT * FROM namespaces ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ------------------------------------------------------------------
    // Proxies
    // ------------------------------------------------------------------

    pub async fn upsert_proxy(&self, record: &ProxyRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO proxies (proxy_id, address, version, status, last_seen)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(proxy_id) DO UPDATE SET
                address = excluded.address,
                version = excluded.version,
                status = excluded.status,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(&record.proxy_id)
        .bind(&record.address)
        .bind(&record.version)
        .bind(record.status.to_string())
        .bind(record.last_seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_proxy(&self, proxy_id: &str) -> Result<Option<ProxyRecord>> {
        let row: Option<ProxyRow> = sqlx::query_as("SELECT * FROM proxies WHERE proxy_id = ?")
            .bind(proxy_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    pub async fn list_proxies(&self) -> Result<Vec<ProxyRecord>> {
        let rows: Vec<ProxyRow> =
            sqlx::query_as("SELECT * FROM proxies ORDER BY last_seen DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Heartbeat: refresh last-seen and mark healthy
    pub async fn touch_proxy(&self, proxy_id: &str) -> Result<()> {
        sqlx::query("UPDATE proxies SET last_seen = ?, status = 'healthy' WHERE proxy_id = ?")
            .bind(Utc::now())
            .bind(proxy_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_proxy_status(&self, proxy_id: &str, status: NodeStatus) -> Result<()> {
        sqlx::query("UPDATE proxies SET status = ? WHERE proxy_id = ?")
            .bind(status.to_string())
            .bind(proxy_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Launchers
    // ------------------------------------------------------------------

    pub async fn upsert_launcher(&self, record: &LauncherRecord) -> Result<()> {
        let capabilities = serde_json::to_string(&record.capabilities)?;
        sqlx::query(
            r#"
            INSERT INTO launchers (
                launcher_id, address, region, version, status,
                max_patterns, available_slots, capabilities, last_seen
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(launcher_id) DO UPDATE SET
                address = excluded.address,
                region = excluded.region,
                version = excluded.version,
                status = excluded.status,
                max_patterns = excluded.max_patterns,
                available_slots = excluded.available_slots,
                capabilities = excluded.capabilities,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(&record.launcher_id)
        .bind(&record.address)
        .bind(&record.region)
        .bind(&record.version)
        .bind(record.status.to_string())
        .bind(i64::from(record.max_patterns))
        .bind(i64::from(record.available_slots))
        .bind(capabilities)
        .bind(record.last_seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_launchers(&self) -> Result<Vec<LauncherRecord>> {
        let rows: Vec<LauncherRow> =
            sqlx::query_as("SELECT * FROM launchers ORDER BY last_seen DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Heartbeat: refresh last-seen, slots, and mark healthy
    pub async fn touch_launcher(&self, launcher_id: &str, available_slots: u32) -> Result<()> {
        sqlx::query(
            "UPDATE launchers SET last_seen = ?, available_slots = ?, status = 'healthy' WHERE launcher_id = ?",
        )
        .bind(Utc::now())
        .bind(i64::from(available_slots))
        .bind(launcher_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_launcher_status(&self, launcher_id: &str, status: NodeStatus) -> Result<()> {
        sqlx::query("UPDATE launchers SET status = ? WHERE launcher_id = ?")
            .bind(status.to_string())
            .bind(launcher_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark proxies and launchers unhealthy when their last heartbeat is
    /// older than the liveness window
    pub async fn mark_stale_unhealthy(&self, window: Duration) -> Result<()> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(window)
                .unwrap_or_else(|_| ChronoDuration::seconds(30));
        sqlx::query("UPDATE proxies SET status = 'unhealthy' WHERE last_seen < ? AND status = 'healthy'")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE launchers SET status = 'unhealthy' WHERE last_seen < ? AND status = 'healthy'")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Patterns
    // ------------------------------------------------------------------

    pub async fn upsert_pattern(&self, record: &PatternRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO patterns (
                namespace, pattern_name, launcher_id, proxy_id,
                process_id, state, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(namespace) DO UPDATE SET
                pattern_name = excluded.pattern_name,
                launcher_id = excluded.launcher_id,
                proxy_id = excluded.proxy_id,
                process_id = excluded.process_id,
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.namespace)
        .bind(&record.pattern_name)
        .bind(&record.launcher_id)
        .bind(&record.proxy_id)
        .bind(i64::from(record.process_id))
        .bind(&record.state)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_pattern(&self, namespace: &str) -> Result<Option<PatternRecord>> {
        let row: Option<PatternRow> = sqlx::query_as("SELECT * FROM patterns WHERE namespace = ?")
            .bind(namespace)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    pub async fn set_pattern_state(&self, namespace: &str, state: &str) -> Result<()> {
        sqlx::query("UPDATE patterns SET state = ?, updated_at = ? WHERE namespace = ?")
            .bind(state)
            .bind(Utc::now())
            .bind(namespace)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    /// Append an audit record outside any mutation (read RPCs, failures)
    pub async fn append_audit(&self, record: &AuditRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_audit(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Audit records matching the filter, newest first
    pub async fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        let mut qb: sqlx::QueryBuilder<Sqlite> =
            sqlx::QueryBuilder::new("SELECT * FROM audit_logs WHERE 1=1");
        if let Some(ref namespace) = filter.namespace {
            qb.push(" AND namespace = ");
            qb.push_bind(namespace);
        }
        if let Some(ref principal) = filter.principal {
            qb.push(" AND principal = ");
            qb.push_bind(principal);
        }
        if let Some(start) = filter.start {
            qb.push(" AND timestamp >= ");
            qb.push_bind(start);
        }
        if let Some(end) = filter.end {
            qb.push(" AND timestamp <= ");
            qb.push_bind(end);
        }
        qb.push(" ORDER BY timestamp DESC");
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(filter.limit.unwrap_or(100)));

        let rows: Vec<AuditRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

async fn insert_audit(tx: &mut Transaction<'_, Sqlite>, record: &AuditRecord) -> Result<()> {
    let request_body = record
        .request_body
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let response_body = record
        .response_body
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    sqlx::query(
        r#"
        INSERT INTO audit_logs (
            id, timestamp, principal, action, resource_type, resource_id,
            namespace, request_body, response_body, status_code, error,
            duration_ms, client_ip, user_agent
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(record.timestamp)
    .bind(&record.principal)
    .bind(&record.action)
    .bind(&record.resource_type)
    .bind(&record.resource_id)
    .bind(&record.namespace)
    .bind(request_body)
    .bind(response_body)
    .bind(i64::from(record.status_code))
    .bind(&record.error)
    .bind(record.duration_ms)
    .bind(&record.client_ip)
    .bind(&record.user_agent)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// Internal row types for sqlx mapping

#[derive(sqlx::FromRow)]
struct NamespaceRow {
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    metadata: String,
    pattern: String,
    config: String,
    auth_policy: Option<String>,
    partition_id: i64,
    proxy_id: String,
}

impl From<NamespaceRow> for NamespaceRecord {
    fn from(row: NamespaceRow) -> Self {
        NamespaceRecord {
            name: row.name,
            description: row.description,
            created_at: row.created_at,
            metadata: serde_json::from_str(&row.metadata).unwrap_or_default(),
            pattern: row.pattern,
            config: serde_json::from_str(&row.config).unwrap_or(serde_json::Value::Null),
            auth_policy: row.auth_policy,
            partition: row.partition_id as u32,
            proxy_id: row.proxy_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProxyRow {
    proxy_id: String,
    address: String,
    version: String,
    status: String,
    last_seen: DateTime<Utc>,
}

impl From<ProxyRow> for ProxyRecord {
    fn from(row: ProxyRow) -> Self {
        ProxyRecord {
            proxy_id: row.proxy_id,
            address: row.address,
            version: row.version,
            status: NodeStatus::parse(&row.status),
            last_seen: row.last_seen,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LauncherRow {
    launcher_id: String,
    address: String,
    region: String,
    version: String,
    status: String,
    max_patterns: i64,
    available_slots: i64,
    capabilities: String,
    last_seen: DateTime<Utc>,
}

impl From<LauncherRow> for LauncherRecord {
    fn from(row: LauncherRow) -> Self {
        LauncherRecord {
            launcher_id: row.launcher_id,
            address: row.address,
            region: row.region,
            version: row.version,
            status: NodeStatus::parse(&row.status),
            max_patterns: row.max_patterns as u32,
            available_slots: row.available_slots as u32,
            capabilities: serde_json::from_str(&row.capabilities).unwrap_or_default(),
            last_seen: row.last_seen,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PatternRow {
    namespace: String,
    pattern_name: String,
    launcher_id: String,
    proxy_id: String,
    process_id: i64,
    state: String,
    updated_at: DateTime<Utc>,
}

impl From<PatternRow> for PatternRecord {
    fn from(row: PatternRow) -> Self {
        PatternRecord {
            namespace: row.namespace,
            pattern_name: row.pattern_name,
            launcher_id: row.launcher_id,
            proxy_id: row.proxy_id,
            process_id: row.process_id as u32,
            state: row.state,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    timestamp: DateTime<Utc>,
    principal: String,
    action: String,
    resource_type: String,
    resource_id: String,
    namespace: Option<String>,
    request_body: Option<String>,
    response_body: Option<String>,
    status_code: i64,
    error: Option<String>,
    duration_ms: i64,
    client_ip: Option<String>,
    user_agent: Option<String>,
}

impl From<AuditRow> for AuditRecord {
    fn from(row: AuditRow) -> Self {
        AuditRecord {
            id: row.id.parse().unwrap_or_else(|_| uuid::Uuid::nil()),
            timestamp: row.timestamp,
            principal: row.principal,
            action: row.action,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            namespace: row.namespace,
            request_body: row.request_body.and_then(|b| serde_json::from_str(&b).ok()),
            response_body: row.response_body.and_then(|b| serde_json::from_str(&b).ok()),
            status_code: row.status_code as u16,
            error: row.error,
            duration_ms: row.duration_ms,
            client_ip: row.client_ip,
            user_agent: row.user_agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace(name: &str) -> NamespaceRecord {
        NamespaceRecord {
            name: name.to_string(),
            description: Some("test namespace".to_string()),
            created_at: Utc::now(),
            metadata: HashMap::from([("team".to_string(), "data".to_string())]),
            pattern: "mailbox".to_string(),
            config: serde_json::json!({"slots": {"table_writer": {"backend": "sqlite"}}}),
            auth_policy: None,
            partition: 3,
            proxy_id: "proxy-A".to_string(),
        }
    }

    fn audit(action: &str, resource: &str) -> AuditRecord {
        AuditRecord::new("alice", action, "namespace", resource).with_namespace(resource)
    }

    #[tokio::test]
    async fn test_create_and_get_namespace() {
        let store = AdminStore::in_memory().await.unwrap();
        let record = namespace("mailbox-x");
        store
            .create_namespace(&record, &audit("CreateNamespace", "mailbox-x"))
            .await
            .unwrap();

        let got = store.get_namespace("mailbox-x").await.unwrap().unwrap();
        assert_eq!(got.pattern, "mailbox");
        assert_eq!(got.partition, 3);
        assert_eq!(got.metadata.get("team").map(String::as_str), Some("data"));

        assert!(store.get_namespace("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_namespace_is_already_exists() {
        let store = AdminStore::in_memory().await.unwrap();
        let record = namespace("mailbox-x");
        store
            .create_namespace(&record, &audit("CreateNamespace", "mailbox-x"))
            .await
            .unwrap();
        let err = store
            .create_namespace(&record, &audit("CreateNamespace", "mailbox-x"))
            .await
            .unwrap_err();
        assert_eq!(
            err.status().unwrap().code,
            crate::error::ErrorCode::AlreadyExists
        );
        // the failed transaction rolled back, including its audit write
        let records = store.query_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_list_namespaces_sorted_by_name() {
        let store = AdminStore::in_memory().await.unwrap();
        for name in ["zeta", "alpha", "mid"] {
            store
                .create_namespace(&namespace(name), &audit("CreateNamespace", name))
                .await
                .unwrap();
        }
        let names: Vec<String> = store
            .list_namespaces()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_audit_is_append_only() {
        let store = AdminStore::in_memory().await.unwrap();
        store
            .append_audit(&audit("CreateNamespace", "mailbox-x"))
            .await
            .unwrap();

        let update = sqlx::query("UPDATE audit_logs SET principal = 'mallory'")
            .execute(&store.pool)
            .await;
        assert!(update.is_err(), "audit rows must reject UPDATE");

        let delete = sqlx::query("DELETE FROM audit_logs")
            .execute(&store.pool)
            .await;
        assert!(delete.is_err(), "audit rows must reject DELETE");
    }

    #[tokio::test]
    async fn test_audit_query_filters_and_order() {
        let store = AdminStore::in_memory().await.unwrap();
        let mut first = audit("CreateNamespace", "ns-a");
        first.timestamp = Utc::now() - ChronoDuration::seconds(60);
        store.append_audit(&first).await.unwrap();

        let mut second = audit("CreateNamespace", "ns-b");
        second.principal = "bob".to_string();
        store.append_audit(&second).await.unwrap();

        // newest first
        let all = store.query_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].namespace.as_deref(), Some("ns-b"));

        let by_namespace = store
            .query_audit(&AuditFilter {
                namespace: Some("ns-a".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_namespace.len(), 1);

        let by_principal = store
            .query_audit(&AuditFilter {
                principal: Some("bob".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_principal.len(), 1);

        let limited = store
            .query_audit(&AuditFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_proxy_upsert_and_liveness() {
        let store = AdminStore::in_memory().await.unwrap();
        let record = ProxyRecord {
            proxy_id: "proxy-A".to_string(),
            address: "127.0.0.1:8980".to_string(),
            version: "0.1.0".to_string(),
            status: NodeStatus::Healthy,
            last_seen: Utc::now() - ChronoDuration::seconds(120),
        };
        store.upsert_proxy(&record).await.unwrap();

        store
            .mark_stale_unhealthy(Duration::from_secs(30))
            .await
            .unwrap();
        let proxies = store.list_proxies().await.unwrap();
        assert_eq!(proxies[0].status, NodeStatus::Unhealthy);

        store.touch_proxy("proxy-A").await.unwrap();
        let proxies = store.list_proxies().await.unwrap();
        assert_eq!(proxies[0].status, NodeStatus::Healthy);
    }

    #[tokio::test]
    async fn test_launcher_round_trip() {
        let store = AdminStore::in_memory().await.unwrap();
        let record = LauncherRecord {
            launcher_id: "launcher-01".to_string(),
            address: "10.0.0.5:1234".to_string(),
            region: "local".to_string(),
            version: "0.1.0".to_string(),
            status: NodeStatus::Healthy,
            max_patterns: 8,
            available_slots: 8,
            capabilities: vec!["mailbox".to_string(), "keyvalue".to_string()],
            last_seen: Utc::now(),
        };
        store.upsert_launcher(&record).await.unwrap();
        store.touch_launcher("launcher-01", 7).await.unwrap();

        let launchers = store.list_launchers().await.unwrap();
        assert_eq!(launchers.len(), 1);
        assert_eq!(launchers[0].available_slots, 7);
        assert_eq!(launchers[0].capabilities.len(), 2);
    }

    #[tokio::test]
    async fn test_pattern_rows() {
        let store = AdminStore::in_memory().await.unwrap();
        let record = PatternRecord {
            namespace: "mailbox-x".to_string(),
            pattern_name: "mailbox".to_string(),
            launcher_id: "launcher-01".to_string(),
            proxy_id: "proxy-A".to_string(),
            process_id: 4242,
            state: "running".to_string(),
            updated_at: Utc::now(),
        };
        store.upsert_pattern(&record).await.unwrap();
        store.set_pattern_state("mailbox-x", "failed").await.unwrap();
        let got = store.get_pattern("mailbox-x").await.unwrap().unwrap();
        assert_eq!(got.state, "failed");
        assert_eq!(got.process_id, 4242);
    }

    #[tokio::test]
    async fn test_delete_namespace() {
        let store = AdminStore::in_memory().await.unwrap();
        store
            .create_namespace(&namespace("mailbox-x"), &audit("CreateNamespace", "mailbox-x"))
            .await
            .unwrap();
        store
            .delete_namespace("mailbox-x", &audit("DeleteNamespace", "mailbox-x"))
            .await
            .unwrap();
        assert!(store.get_namespace("mailbox-x").await.unwrap().is_none());

        let err = store
            .delete_namespace("mailbox-x", &audit("DeleteNamespace", "mailbox-x"))
            .await
            .unwrap_err();
        assert_eq!(err.status().unwrap().code, crate::error::ErrorCode::NotFound);
    }
}
