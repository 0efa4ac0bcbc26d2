//! Escalation loop: periodically pings responders for unacknowledged
//! critical incidents at level-indexed intervals.

use chrono::Duration;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::alert::Severity;
use crate::chat::{ChatClient, ChatMessage};
use crate::clock::Clock;
use crate::rules::ConfigService;
use crate::store::{IncidentState, IncidentStore};
use crate::Result;

const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
/// Level N fires (N + 1) * this long after the last user-visible emission.
const LEVEL_STEP: Duration = Duration::minutes(5);

pub struct EscalationLoop {
    incidents: Arc<IncidentStore>,
    rules: Arc<ConfigService>,
    chat: Arc<dyn ChatClient>,
    clock: Arc<dyn Clock>,
}

impl EscalationLoop {
    pub fn new(
        incidents: Arc<IncidentStore>,
        rules: Arc<ConfigService>,
        chat: Arc<dyn ChatClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            incidents,
            rules,
            chat,
            clock,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(component = "escalation", "Starting escalation loop");
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(component = "escalation", error = %e, "Escalation tick failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!(component = "escalation", "Escalation loop stopped");
    }

    /// One full pass over the incident store.
    pub async fn tick(&self) -> Result<()> {
        let now = self.clock.now();
        for (key, mut record) in self.incidents.list().await? {
            if record.state != IncidentState::Firing || record.severity != Severity::Critical {
                continue;
            }
            let Some(rule) = self.rules.lookup(&record.rule_name).await else {
                continue;
            };
            if rule.mentions.is_empty() {
                continue;
            }

            let level = record.mention_level as usize;
            if level >= rule.mentions.len() {
                continue;
            }

            // Thresholds are absolute offsets from updated_at, which this
            // loop must never advance: resetting it would push every
            // later level further out.
            let threshold = LEVEL_STEP * (level as i32 + 1);
            if now - record.updated_at < threshold {
                continue;
            }

            let mention = &rule.mentions[level];
            let target = record.thread_id.as_deref().unwrap_or(&record.channel_id);
            let notice = format!(
                "{mention} unacknowledged **{}** alert, escalation level {}",
                record.rule_name,
                level + 1
            );
            if let Err(e) = self.chat.send_message(target, &ChatMessage::text(notice)).await {
                warn!(
                    component = "escalation",
                    incident_key = %key, error = %e,
                    "Failed to post escalation mention"
                );
                continue;
            }

            record.mention_level = level as u32 + 1;
            self.incidents.put(&key, &record).await?;
            info!(
                component = "escalation",
                incident_key = %key,
                level = record.mention_level,
                "Escalated incident"
            );
        }
        Ok(())
    }
}
