//! Per-alert pipeline: rule lookup, dedup gate, lifecycle expiry, chat
//! emit, audit.

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::alert::{AlertStatus, CanonicalAlert};
use crate::audit::AuditLog;
use crate::chat::ChatMirror;
use crate::clock::Clock;
use crate::metrics::{
    ALERTS_RECEIVED_TOTAL, ALERTS_SENT_TOTAL, CHAT_ERRORS_TOTAL, DEDUP_SUPPRESSED_TOTAL,
    NO_CONFIG_SUPPRESSED_TOTAL,
};
use crate::rules::ConfigService;
use crate::store::{DedupOutcome, DedupStore, IncidentState, IncidentStore};
use crate::Result;

/// A firing alert within this window of a resolve repeats into the
/// existing incident; later ones start fresh.
const RESOLVED_REPEAT_WINDOW: Duration = Duration::minutes(30);
/// Same, measured from an acknowledgement.
const ACKNOWLEDGED_REPEAT_WINDOW: Duration = Duration::minutes(90);

pub struct Processor {
    rules: Arc<ConfigService>,
    dedup: Arc<DedupStore>,
    incidents: Arc<IncidentStore>,
    mirror: Arc<ChatMirror>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
}

impl Processor {
    pub fn new(
        rules: Arc<ConfigService>,
        dedup: Arc<DedupStore>,
        incidents: Arc<IncidentStore>,
        mirror: Arc<ChatMirror>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rules,
            dedup,
            incidents,
            mirror,
            audit,
            clock,
        }
    }

    pub async fn process(&self, mut alert: CanonicalAlert) -> Result<()> {
        ALERTS_RECEIVED_TOTAL.inc();

        let Some(rule) = self.rules.lookup(&alert.rule_name).await else {
            NO_CONFIG_SUPPRESSED_TOTAL.inc();
            debug!(
                component = "processor",
                alert_id = %alert.alert_id, rule_name = %alert.rule_name,
                "No rule configured, suppressing"
            );
            return Ok(());
        };
        if rule.channel_id.is_empty() {
            NO_CONFIG_SUPPRESSED_TOTAL.inc();
            return Ok(());
        }
        alert.channel_id = Some(rule.channel_id.clone());

        match alert.status {
            // Resolved events are never suppressed; they drop the
            // fingerprint so the next firing is fresh.
            AlertStatus::Resolved => {
                if let Err(e) = self.dedup.clear(&alert.alert_id).await {
                    warn!(
                        component = "processor",
                        alert_id = %alert.alert_id, error = %e,
                        "Failed to clear dedup fingerprint"
                    );
                }
            }
            AlertStatus::Firing => {
                match self
                    .dedup
                    .test_and_set(&alert.alert_id, rule.suppress_window_ms)
                    .await
                {
                    Ok(DedupOutcome::Duplicate) => {
                        DEDUP_SUPPRESSED_TOTAL.inc();
                        debug!(
                            component = "processor",
                            alert_id = %alert.alert_id,
                            "Suppressed within dedup window"
                        );
                        return Ok(());
                    }
                    Ok(DedupOutcome::New) => {}
                    // The dedup set is advisory; an unreachable store must
                    // not drop alerts.
                    Err(e) => {
                        warn!(
                            component = "processor",
                            alert_id = %alert.alert_id, error = %e,
                            "Dedup store unavailable, letting alert through"
                        );
                    }
                }
            }
        }

        if alert.status == AlertStatus::Firing {
            self.expire_stale_incident(&alert).await?;
        }

        let message_id = match self.mirror.emit(&alert, &rule).await {
            Ok(id) => {
                ALERTS_SENT_TOTAL.inc();
                Some(id)
            }
            // No retry: the source retransmits, and resolved events have
            // already had their fingerprint cleared.
            Err(e) => {
                CHAT_ERRORS_TOTAL.inc();
                error!(
                    component = "processor",
                    event = "chat_emit",
                    alert_id = %alert.alert_id, error = %e,
                    "Chat emit failed"
                );
                None
            }
        };

        self.audit.record_alert(&alert, message_id.as_deref()).await;
        Ok(())
    }

    /// Resolved incidents older than 30 minutes and acknowledged ones
    /// older than 90 minutes no longer absorb repeats; a new firing gets
    /// a brand-new incident.
    async fn expire_stale_incident(&self, alert: &CanonicalAlert) -> Result<()> {
        let key = alert.incident_key();
        let Some(prior) = self.incidents.get(&key).await? else {
            return Ok(());
        };
        let now = self.clock.now();
        let expired = match prior.state {
            IncidentState::Resolved => {
                let anchor = prior.resolved_at.unwrap_or(prior.updated_at);
                now - anchor > RESOLVED_REPEAT_WINDOW
            }
            IncidentState::Acknowledged => {
                let anchor = prior.acknowledged_at.unwrap_or(prior.updated_at);
                now - anchor > ACKNOWLEDGED_REPEAT_WINDOW
            }
            IncidentState::Firing => false,
        };
        if expired {
            info!(
                component = "processor",
                incident_key = %key,
                "Prior incident expired, starting fresh"
            );
            self.incidents.delete(&key).await?;
        }
        Ok(())
    }
}
