use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use tracing::{debug, error, info};

use crate::store::{AuditEvent, Database, TroubleshootingGuide};
use crate::{Error, Result};

pub struct SqliteDatabase {
    pool: Pool<Sqlite>,
}

fn audit_event_from_row(r: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent> {
    let id: String = r.get("id");
    Ok(AuditEvent {
        id: uuid::Uuid::parse_str(&id).map_err(|e| Error::Parse(e.to_string()))?,
        alert_id: r.get("alert_id"),
        resource: r.get("resource"),
        status: r.get("status"),
        message_id: r.get("message_id"),
        channel_id: r.get("channel_id"),
        severity: r.get::<String, _>("severity").parse()?,
        rule_name: r.get("rule_name"),
        source: r.get("source"),
        acknowledged_by: r.get("acknowledged_by"),
        resolved_by: r.get("resolved_by"),
        created_at: r.get("created_at"),
    })
}

impl SqliteDatabase {
    pub async fn new(path: &str, max_connections: u32) -> Result<Self> {
        info!(component = "database", "Connecting to SQLite database: {path}");

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))
            .map_err(Error::Sqlx)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| {
                error!(component = "database", "Failed to connect to SQLite: {e}");
                Error::Sqlx(e)
            })?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn init(&self) -> Result<()> {
        info!(component = "database", "Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| {
            error!(component = "database", "Failed to run migrations: {e}");
            Error::Migrate(e)
        })?;
        Ok(())
    }

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<()> {
        debug!(component = "audit", alert_id = %event.alert_id, "Appending audit event");

        sqlx::query(
            r#"
            INSERT INTO alert_events (
                id, alert_id, resource, status, message_id, channel_id,
                severity, rule_name, source, acknowledged_by, resolved_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(event.id.to_string())
        .bind(&event.alert_id)
        .bind(&event.resource)
        .bind(&event.status)
        .bind(&event.message_id)
        .bind(&event.channel_id)
        .bind(event.severity.to_string())
        .bind(&event.rule_name)
        .bind(&event.source)
        .bind(&event.acknowledged_by)
        .bind(&event.resolved_by)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_audit_events(&self, limit: i64) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, alert_id, resource, status, message_id, channel_id,
                   severity, rule_name, source, acknowledged_by, resolved_by, created_at
            FROM alert_events
            ORDER BY created_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| audit_event_from_row(&r)).collect()
    }

    async fn delete_audit_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM alert_events WHERE created_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn load_rules_config(&self) -> Result<Option<JsonValue>> {
        let row = sqlx::query("SELECT config FROM alerts_config WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let raw: String = r.get("config");
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn save_rules_config(&self, config: &JsonValue, now: DateTime<Utc>) -> Result<()> {
        let raw = serde_json::to_string(config)?;
        sqlx::query(
            r#"
            INSERT INTO alerts_config (id, config, updated_at) VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                config = excluded.config,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(raw)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_guide(&self, rule_name: &str) -> Result<Option<TroubleshootingGuide>> {
        let row = sqlx::query(
            "SELECT rule_name, content, updated_at FROM troubleshooting_guides WHERE rule_name = ?1",
        )
        .bind(rule_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| TroubleshootingGuide {
            rule_name: r.get("rule_name"),
            content: r.get("content"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn upsert_guide(&self, rule_name: &str, content: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO troubleshooting_guides (rule_name, content, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(rule_name) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(rule_name)
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_guides(&self) -> Result<Vec<TroubleshootingGuide>> {
        let rows = sqlx::query(
            "SELECT rule_name, content, updated_at FROM troubleshooting_guides ORDER BY rule_name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| TroubleshootingGuide {
                rule_name: r.get("rule_name"),
                content: r.get("content"),
                updated_at: r.get("updated_at"),
            })
            .collect())
    }
}
