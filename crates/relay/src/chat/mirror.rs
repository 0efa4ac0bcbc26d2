//! The chat mirror reflects each incident into exactly one message,
//! manages its thread, and owns the interactive lifecycle controls.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::alert::{truncate, AlertStatus, CanonicalAlert};
use crate::audit::AuditLog;
use crate::chat::{
    chunk_markdown, ButtonAction, ChatClient, ChatMessage, Embed, EmbedField, MAX_MESSAGE_LEN,
};
use crate::clock::Clock;
use crate::rules::{ConfigService, RuleConfig, DEFAULT_SUPPRESS_WINDOW_MS};
use crate::store::{Database, DedupStore, IncidentRecord, IncidentState, IncidentStore};
use crate::Result;

const COLOR_CRITICAL: u32 = 0x00e7_4c3c;
const COLOR_HIGH: u32 = 0x00e6_7e22;
const COLOR_WARNING: u32 = 0x00f3_9c12;
const COLOR_INFO: u32 = 0x0034_98db;
const COLOR_ACKNOWLEDGED: u32 = 0x00f1_c40f;
const COLOR_RESOLVED: u32 = 0x002e_cc71;

/// Thread titles carry at most this much of the alert title.
const THREAD_TITLE_LEN: usize = 50;
/// Acknowledging pushes the dedup window out to at least this long.
const ACK_DEDUP_FLOOR_MS: u64 = 10 * 60 * 1000;
/// A repeat this long after an acknowledge re-pings the first responder.
const ACK_REMIND_AFTER: Duration = Duration::minutes(60);

/// Per-incident-key mutexes so concurrent emits for the same incident are
/// serialized in-process. Idle entries are reclaimed on the next acquire.
struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap();
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct ChatMirror {
    chat: Arc<dyn ChatClient>,
    incidents: Arc<IncidentStore>,
    dedup: Arc<DedupStore>,
    rules: Arc<ConfigService>,
    audit: Arc<AuditLog>,
    db: Option<Arc<dyn Database>>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
}

impl ChatMirror {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        incidents: Arc<IncidentStore>,
        dedup: Arc<DedupStore>,
        rules: Arc<ConfigService>,
        audit: Arc<AuditLog>,
        db: Option<Arc<dyn Database>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            chat,
            incidents,
            dedup,
            rules,
            audit,
            db,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    /// Reflect an alert into its incident message, creating or editing in
    /// place. Returns the message id.
    pub async fn emit(&self, alert: &CanonicalAlert, rule: &RuleConfig) -> Result<String> {
        let key = alert.incident_key();
        let _guard = self.locks.acquire(&key).await;
        let now = self.clock.now();

        if let Some(record) = self.incidents.get(&key).await? {
            let existing = self
                .chat
                .get_message(&record.channel_id, &record.message_id)
                .await?;
            if existing.is_some() {
                return self.update_incident(alert, rule, &key, record, now).await;
            }
            // Message vanished underneath us; start over.
            info!(component = "mirror", incident_key = %key, "Incident message gone, recreating");
            self.incidents.delete(&key).await?;
        }

        self.create_incident(alert, rule, &key, now).await
    }

    async fn update_incident(
        &self,
        alert: &CanonicalAlert,
        rule: &RuleConfig,
        key: &str,
        mut record: IncidentRecord,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let prior_state = record.state;
        let new_state = match alert.status {
            AlertStatus::Resolved => IncidentState::Resolved,
            // A repeat does not undo a human acknowledgement.
            AlertStatus::Firing if prior_state == IncidentState::Acknowledged => {
                IncidentState::Acknowledged
            }
            AlertStatus::Firing => IncidentState::Firing,
        };

        record.severity = alert.severity;
        if new_state == IncidentState::Resolved {
            record.resolved_at = Some(alert.resolved_at.unwrap_or(now));
        }
        if prior_state == IncidentState::Resolved && new_state == IncidentState::Firing {
            // Reopened within the repeat window: escalation starts over.
            record.mention_level = 0;
            record.resolved_by = None;
        }
        record.state = new_state;

        let message = ChatMessage {
            content: None,
            embed: Some(render_embed(alert, rule, &record)),
            buttons: buttons_for(new_state),
        };
        self.chat
            .edit_message(&record.channel_id, &record.message_id, &message)
            .await?;

        if alert.status == AlertStatus::Firing {
            if let Some(thread_id) = record.thread_id.clone() {
                let notice = self.repeat_notice(&record, rule, prior_state, now);
                if let Err(e) = self.chat.send_message(&thread_id, &ChatMessage::text(notice)).await
                {
                    warn!(
                        component = "mirror",
                        incident_key = %key, error = %e,
                        "Failed to post repeat notice"
                    );
                }
            }
        }

        record.updated_at = now;
        self.incidents.put(key, &record).await?;
        Ok(record.message_id.clone())
    }

    fn repeat_notice(
        &self,
        record: &IncidentRecord,
        rule: &RuleConfig,
        prior_state: IncidentState,
        now: DateTime<Utc>,
    ) -> String {
        if prior_state == IncidentState::Acknowledged {
            if let (Some(acknowledged_at), Some(first)) =
                (record.acknowledged_at, rule.mentions.first())
            {
                if now - acknowledged_at > ACK_REMIND_AFTER {
                    return format!(
                        "🔁 Alert repeated. {first} this incident was acknowledged over an hour ago and is still firing."
                    );
                }
            }
        }
        "🔁 Alert repeated".to_string()
    }

    async fn create_incident(
        &self,
        alert: &CanonicalAlert,
        rule: &RuleConfig,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let state = match alert.status {
            AlertStatus::Firing => IncidentState::Firing,
            AlertStatus::Resolved => IncidentState::Resolved,
        };
        let mut record = IncidentRecord {
            alert_id: alert.alert_id.clone(),
            resource: alert.resource.clone(),
            message_id: String::new(),
            channel_id: rule.channel_id.clone(),
            thread_id: None,
            state,
            rule_name: alert.rule_name.clone(),
            severity: alert.severity,
            updated_at: now,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_by: None,
            resolved_at: match state {
                IncidentState::Resolved => Some(alert.resolved_at.unwrap_or(now)),
                _ => None,
            },
            mention_level: 0,
        };

        let message = ChatMessage {
            content: None,
            embed: Some(render_embed(alert, rule, &record)),
            buttons: buttons_for(state),
        };
        let message_id = self.chat.send_message(&rule.channel_id, &message).await?;

        let thread_name = format!("Incident: {}", truncate(&alert.title, THREAD_TITLE_LEN));
        match self
            .chat
            .create_thread(&rule.channel_id, &message_id, &thread_name)
            .await
        {
            Ok(thread_id) => record.thread_id = Some(thread_id),
            Err(e) => {
                warn!(
                    component = "mirror",
                    incident_key = %key, error = %e,
                    "Failed to create incident thread"
                );
            }
        }

        record.message_id = message_id.clone();
        self.incidents.put(key, &record).await?;
        info!(component = "mirror", incident_key = %key, message_id = %message_id, "Incident created");
        Ok(message_id)
    }

    /// Acknowledge button: mark the incident, extend the suppression
    /// window, and re-render the message with the remaining controls.
    pub async fn acknowledge(&self, incident_key: &str, user: &str) -> Result<()> {
        let _guard = self.locks.acquire(incident_key).await;
        let Some(mut record) = self.incidents.get(incident_key).await? else {
            warn!(component = "mirror", incident_key, "Acknowledge for unknown incident");
            return Ok(());
        };
        if record.state == IncidentState::Resolved {
            return Ok(());
        }

        let now = self.clock.now();
        record.state = IncidentState::Acknowledged;
        record.acknowledged_by = Some(user.to_string());
        record.acknowledged_at = Some(now);

        let window = self
            .rules
            .lookup(&record.rule_name)
            .await
            .map(|r| r.suppress_window_ms)
            .unwrap_or(DEFAULT_SUPPRESS_WINDOW_MS);
        self.dedup
            .extend(&record.alert_id, window.max(ACK_DEDUP_FLOOR_MS))
            .await?;

        self.rerender(
            &record,
            COLOR_ACKNOWLEDGED,
            EmbedField {
                name: "Acknowledged by".to_string(),
                value: format!("{user} at {}", now.format("%Y-%m-%d %H:%M UTC")),
                inline: true,
            },
            vec![ButtonAction::Troubleshoot, ButtonAction::Resolve],
        )
        .await;

        record.updated_at = now;
        self.incidents.put(incident_key, &record).await?;
        self.audit.record_user_action(&record, "acknowledged", user).await;
        info!(component = "mirror", incident_key, user, "Incident acknowledged");
        Ok(())
    }

    /// Resolve button: close the incident, clear dedup so the next firing
    /// is fresh, and strip the controls.
    pub async fn resolve(&self, incident_key: &str, user: &str) -> Result<()> {
        let _guard = self.locks.acquire(incident_key).await;
        let Some(mut record) = self.incidents.get(incident_key).await? else {
            warn!(component = "mirror", incident_key, "Resolve for unknown incident");
            return Ok(());
        };
        if record.state == IncidentState::Resolved {
            return Ok(());
        }

        let now = self.clock.now();
        record.state = IncidentState::Resolved;
        record.resolved_by = Some(user.to_string());
        record.resolved_at = Some(now);

        self.dedup.clear(&record.alert_id).await?;

        self.rerender(
            &record,
            COLOR_RESOLVED,
            EmbedField {
                name: "Resolved by".to_string(),
                value: format!("{user} at {}", now.format("%Y-%m-%d %H:%M UTC")),
                inline: true,
            },
            Vec::new(),
        )
        .await;

        record.updated_at = now;
        self.incidents.put(incident_key, &record).await?;
        self.audit.record_user_action(&record, "resolved", user).await;
        info!(component = "mirror", incident_key, user, "Incident resolved");
        Ok(())
    }

    /// Troubleshoot button: post the rule's guide into the incident
    /// thread, chunked to the message limit.
    pub async fn troubleshoot(&self, incident_key: &str) -> Result<()> {
        let Some(record) = self.incidents.get(incident_key).await? else {
            warn!(component = "mirror", incident_key, "Troubleshoot for unknown incident");
            return Ok(());
        };
        let target = record.thread_id.as_deref().unwrap_or(&record.channel_id);

        let guide = match &self.db {
            Some(db) => db.get_guide(&record.rule_name).await?,
            None => None,
        };
        match guide {
            Some(guide) => {
                for chunk in chunk_markdown(&guide.content, MAX_MESSAGE_LEN) {
                    self.chat.send_message(target, &ChatMessage::text(chunk)).await?;
                }
            }
            None => {
                self.chat
                    .send_message(
                        target,
                        &ChatMessage::text(format!(
                            "No troubleshooting guide configured for **{}**",
                            record.rule_name
                        )),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Patch the live message based on what is actually there, so manual
    /// edits and stale embeds do not get clobbered wholesale. Failures are
    /// logged; the state transition has already happened.
    async fn rerender(
        &self,
        record: &IncidentRecord,
        color: u32,
        extra_field: EmbedField,
        buttons: Vec<ButtonAction>,
    ) {
        let existing = match self
            .chat
            .get_message(&record.channel_id, &record.message_id)
            .await
        {
            Ok(Some(existing)) => existing,
            Ok(None) => {
                warn!(component = "mirror", message_id = %record.message_id, "Message gone during re-render");
                return;
            }
            Err(e) => {
                warn!(component = "mirror", error = %e, "Failed to fetch message for re-render");
                return;
            }
        };

        let mut embed = existing.embed.unwrap_or_default();
        embed.color = color;
        embed.fields.retain(|f| f.name != extra_field.name);
        embed.fields.push(extra_field);

        let message = ChatMessage {
            content: existing.content,
            embed: Some(embed),
            buttons,
        };
        if let Err(e) = self
            .chat
            .edit_message(&record.channel_id, &record.message_id, &message)
            .await
        {
            warn!(component = "mirror", error = %e, "Failed to re-render incident message");
        }
    }
}

fn buttons_for(state: IncidentState) -> Vec<ButtonAction> {
    match state {
        IncidentState::Firing => vec![
            ButtonAction::Acknowledge,
            ButtonAction::Troubleshoot,
            ButtonAction::Resolve,
        ],
        IncidentState::Acknowledged => vec![ButtonAction::Troubleshoot, ButtonAction::Resolve],
        IncidentState::Resolved => Vec::new(),
    }
}

fn severity_color(severity: crate::alert::Severity) -> u32 {
    use crate::alert::Severity;
    match severity {
        Severity::Critical => COLOR_CRITICAL,
        Severity::High => COLOR_HIGH,
        Severity::Warning => COLOR_WARNING,
        Severity::Info => COLOR_INFO,
    }
}

fn render_embed(alert: &CanonicalAlert, rule: &RuleConfig, record: &IncidentRecord) -> Embed {
    let color = match record.state {
        IncidentState::Resolved => COLOR_RESOLVED,
        IncidentState::Acknowledged => COLOR_ACKNOWLEDGED,
        IncidentState::Firing => severity_color(alert.severity),
    };

    let mut fields: Vec<EmbedField> = alert
        .fields
        .iter()
        .map(|(name, value)| EmbedField {
            name: name.clone(),
            value: value.clone(),
            inline: name != "Key info",
        })
        .collect();

    if let (Some(user), Some(at)) = (&record.acknowledged_by, record.acknowledged_at) {
        fields.push(EmbedField {
            name: "Acknowledged by".to_string(),
            value: format!("{user} at {}", at.format("%Y-%m-%d %H:%M UTC")),
            inline: true,
        });
    }
    if let (Some(user), Some(at)) = (&record.resolved_by, record.resolved_at) {
        fields.push(EmbedField {
            name: "Resolved by".to_string(),
            value: format!("{user} at {}", at.format("%Y-%m-%d %H:%M UTC")),
            inline: true,
        });
    }

    Embed {
        title: alert.title.clone(),
        description: alert.description.clone(),
        color,
        fields,
        thumbnail_url: rule.thumbnail_url.clone(),
    }
}
