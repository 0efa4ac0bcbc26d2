//! Append-only audit log of lifecycle events plus its retention sweep.
//! Audit failures are logged and swallowed; they never fail the pipeline.

use chrono::Duration;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::alert::CanonicalAlert;
use crate::clock::Clock;
use crate::store::{AuditEvent, Database, IncidentRecord};

const RETENTION_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

pub struct AuditLog {
    db: Option<Arc<dyn Database>>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(db: Option<Arc<dyn Database>>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Record a source-driven lifecycle event from the processor.
    pub async fn record_alert(&self, alert: &CanonicalAlert, message_id: Option<&str>) {
        let event = AuditEvent {
            id: Uuid::new_v4(),
            alert_id: alert.alert_id.clone(),
            resource: alert.resource.clone(),
            status: alert.status.to_string(),
            message_id: message_id.map(str::to_string),
            channel_id: alert.channel_id.clone(),
            severity: alert.severity,
            rule_name: alert.rule_name.clone(),
            source: alert.source.clone(),
            acknowledged_by: None,
            resolved_by: None,
            created_at: self.clock.now(),
        };
        self.append(event).await;
    }

    /// Record a button-driven lifecycle event from the chat mirror.
    pub async fn record_user_action(&self, record: &IncidentRecord, status: &str, user: &str) {
        let event = AuditEvent {
            id: Uuid::new_v4(),
            alert_id: record.alert_id.clone(),
            resource: record.resource.clone(),
            status: status.to_string(),
            message_id: Some(record.message_id.clone()),
            channel_id: Some(record.channel_id.clone()),
            severity: record.severity,
            rule_name: record.rule_name.clone(),
            source: "discord".to_string(),
            acknowledged_by: (status == "acknowledged").then(|| user.to_string()),
            resolved_by: (status == "resolved").then(|| user.to_string()),
            created_at: self.clock.now(),
        };
        self.append(event).await;
    }

    async fn append(&self, event: AuditEvent) {
        let Some(db) = &self.db else {
            return;
        };
        if let Err(e) = db.append_audit_event(&event).await {
            warn!(
                component = "audit",
                alert_id = %event.alert_id, error = %e,
                "Failed to append audit event"
            );
        }
    }

    /// Retention sweep: delete audit rows older than the configured TTL,
    /// on startup and then hourly. An unset or unparseable TTL disables
    /// the sweep.
    pub async fn run_retention(
        self: Arc<Self>,
        ttl_raw: Option<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let Some(ttl) = ttl_raw.as_deref().and_then(parse_audit_ttl) else {
            info!(component = "audit", "Audit retention disabled");
            return;
        };

        let mut interval = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep(ttl).await {
                        error!(component = "audit", error = %e, "Audit retention sweep failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn sweep(&self, ttl: Duration) -> crate::Result<()> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        let cutoff = self.clock.now() - ttl;
        let deleted = db.delete_audit_events_before(cutoff).await?;
        if deleted > 0 {
            info!(component = "audit", deleted, "Swept expired audit events");
        }
        Ok(())
    }
}

/// Parse the audit TTL setting: `Nd` / `Ndays` for days, a bare number
/// for seconds.
pub fn parse_audit_ttl(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(days) = raw.strip_suffix("days").or_else(|| raw.strip_suffix('d')) {
        return days.trim().parse::<i64>().ok().map(Duration::days);
    }
    match raw.parse::<i64>() {
        Ok(seconds) => Some(Duration::seconds(seconds)),
        Err(_) => {
            warn!(component = "audit", raw, "Unparseable audit TTL");
            None
        }
    }
}
