//! SQLite table writer/reader backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::Result;
use crate::slots::{
    Backend, Capability, EventFilter, MailboxEvent, TableReader, TableStats, TableWriter,
};

const CAPABILITIES: &[Capability] = &[Capability::TableWrite, Capability::TableRead];

/// SQLite-backed event table implementing both table slots
pub struct SqliteTableStore {
    pool: SqlitePool,
}

impl SqliteTableStore {
    /// Connect to a SQLite database URL and create the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// An in-memory store, for tests and the local stack
    ///
    /// A single pooled connection keeps every caller on the same in-memory
    /// database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mailbox_events (
                message_id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                topic TEXT NOT NULL,
                content_type TEXT,
                schema_id TEXT,
                encryption TEXT,
                correlation_id TEXT,
                principal TEXT,
                namespace TEXT NOT NULL,
                custom_headers TEXT NOT NULL,
                body BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_mailbox_events_timestamp ON mailbox_events (timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_mailbox_events_topic ON mailbox_events (topic)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl Backend for SqliteTableStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }
}

#[async_trait]
impl TableWriter for SqliteTableStore {
    async fn write_event(&self, event: &MailboxEvent) -> Result<()> {
        let headers = serde_json::to_string(&event.custom_headers)?;
        sqlx::query(
            r#"
            INSERT INTO mailbox_events (
                message_id, timestamp, topic, content_type, schema_id,
                encryption, correlation_id, principal, namespace,
                custom_headers, body
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.message_id)
        .bind(event.timestamp)
        .bind(&event.topic)
        .bind(&event.content_type)
        .bind(&event.schema_id)
        .bind(&event.encryption)
        .bind(&event.correlation_id)
        .bind(&event.principal)
        .bind(&event.namespace)
        .bind(headers)
        .bind(&event.body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_old_events(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM mailbox_events WHERE timestamp < ?")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn table_stats(&self) -> Result<TableStats> {
        stats(&self.pool).await
    }
}

#[async_trait]
impl TableReader for SqliteTableStore {
    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<MailboxEvent>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM mailbox_events WHERE 1=1");

        if let Some(start) = filter.start {
            qb.push(" AND timestamp >= ");
            qb.push_bind(start);
        }
        if let Some(end) = filter.end {
            qb.push(" AND timestamp <= ");
            qb.push_bind(end);
        }
        if !filter.topics.is_empty() {
            qb.push(" AND topic IN (");
            {
                let mut sep = qb.separated(", ");
                for topic in &filter.topics {
                    sep.push_bind(topic);
                }
            }
            qb.push(")");
        }
        if !filter.principals.is_empty() {
            qb.push(" AND principal IN (");
            {
                let mut sep = qb.separated(", ");
                for principal in &filter.principals {
                    sep.push_bind(principal);
                }
            }
            qb.push(")");
        }
        if let Some(ref correlation_id) = filter.correlation_id {
            qb.push(" AND correlation_id = ");
            qb.push_bind(correlation_id);
        }

        qb.push(" ORDER BY timestamp DESC");

        if filter.limit.is_some() || filter.offset.is_some() {
            let limit = filter.limit.map(i64::from).unwrap_or(-1);
            qb.push(" LIMIT ");
            qb.push_bind(limit);
            if let Some(offset) = filter.offset {
                qb.push(" OFFSET ");
                qb.push_bind(i64::from(offset));
            }
        }

        let rows: Vec<EventRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_event(&self, message_id: &str) -> Result<Option<MailboxEvent>> {
        let row: Option<EventRow> =
            sqlx::query_as("SELECT * FROM mailbox_events WHERE message_id = ?")
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn table_stats(&self) -> Result<TableStats> {
        stats(&self.pool).await
    }
}

async fn stats(pool: &SqlitePool) -> Result<TableStats> {
    let (count, oldest, newest): (i64, Option<DateTime<Utc>>, Option<DateTime<Utc>>) =
        sqlx::query_as("SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM mailbox_events")
            .fetch_one(pool)
            .await?;
    Ok(TableStats {
        event_count: count as u64,
        oldest,
        newest,
    })
}

/// Internal row type for sqlx mapping
#[derive(sqlx::FromRow)]
struct EventRow {
    message_id: String,
    timestamp: DateTime<Utc>,
    topic: String,
    content_type: Option<String>,
    schema_id: Option<String>,
    encryption: Option<String>,
    correlation_id: Option<String>,
    principal: Option<String>,
    namespace: String,
    custom_headers: String,
    body: Vec<u8>,
}

impl From<EventRow> for MailboxEvent {
    fn from(row: EventRow) -> Self {
        MailboxEvent {
            message_id: row.message_id,
            timestamp: row.timestamp,
            topic: row.topic,
            content_type: row.content_type,
            schema_id: row.schema_id,
            encryption: row.encryption,
            correlation_id: row.correlation_id,
            principal: row.principal,
            namespace: row.namespace,
            custom_headers: serde_json::from_str(&row.custom_headers).unwrap_or_default(),
            body: row.body,
        }
    }
}
