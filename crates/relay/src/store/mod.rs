mod config;
mod dedup;
mod factory;
mod incidents;
mod memory;
mod models;
mod postgres;
mod redis;
mod sqlite;

pub use config::{DatabaseConfig, DatabaseType};
pub use dedup::{DedupOutcome, DedupStore};
pub use factory::create_database;
pub use incidents::IncidentStore;
pub use memory::MemoryKvStore;
pub use models::*;
pub use postgres::PostgresDatabase;
pub use self::redis::RedisKvStore;
pub use sqlite::SqliteDatabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// External key-value store holding dedup fingerprints and incident
/// records. The production implementation is Redis; tests substitute
/// [`MemoryKvStore`].
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomic set-if-absent with TTL. Returns true when the key was
    /// inserted, false when it already existed (TTL untouched).
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> crate::Result<bool>;
    async fn get(&self, key: &str) -> crate::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> crate::Result<()>;
    async fn delete(&self, key: &str) -> crate::Result<()>;
    async fn expire(&self, key: &str, ttl: Duration) -> crate::Result<()>;
    /// Cursor-based enumeration of keys matching a glob pattern. Never
    /// takes a whole-keyspace lock.
    async fn scan(&self, pattern: &str) -> crate::Result<Vec<String>>;
}

/// Relational database holding the audit log, the persisted rule
/// configuration, and the troubleshooting guides.
#[async_trait]
pub trait Database: Send + Sync {
    /// Apply schema migrations.
    async fn init(&self) -> crate::Result<()>;

    // Audit log
    async fn append_audit_event(&self, event: &AuditEvent) -> crate::Result<()>;
    async fn list_audit_events(&self, limit: i64) -> crate::Result<Vec<AuditEvent>>;
    async fn delete_audit_events_before(&self, cutoff: DateTime<Utc>) -> crate::Result<u64>;

    // Rule configuration (singleton row)
    async fn load_rules_config(&self) -> crate::Result<Option<JsonValue>>;
    async fn save_rules_config(&self, config: &JsonValue, now: DateTime<Utc>) -> crate::Result<()>;

    // Troubleshooting guides
    async fn get_guide(&self, rule_name: &str) -> crate::Result<Option<TroubleshootingGuide>>;
    async fn upsert_guide(
        &self,
        rule_name: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> crate::Result<()>;
    async fn list_guides(&self) -> crate::Result<Vec<TroubleshootingGuide>>;
}
