//! Reconciler: garbage-collects incident state whose chat mirror has
//! disappeared out from under us.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::chat::ChatClient;
use crate::store::{IncidentState, IncidentStore};
use crate::Result;

const STARTUP_DELAY: std::time::Duration = std::time::Duration::from_secs(5 * 60);
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30 * 60);

pub struct Reconciler {
    incidents: Arc<IncidentStore>,
    chat: Arc<dyn ChatClient>,
}

impl Reconciler {
    pub fn new(incidents: Arc<IncidentStore>, chat: Arc<dyn ChatClient>) -> Self {
        Self { incidents, chat }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(STARTUP_DELAY) => {}
            _ = shutdown.changed() => return,
        }
        info!(component = "reconciler", "Starting reconciler");
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(component = "reconciler", error = %e, "Reconcile sweep failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!(component = "reconciler", "Reconciler stopped");
    }

    /// One sweep over the incident store. Channel-gone and message-gone
    /// delete the record; a lost thread only clears `thread_id`; transient
    /// chat errors are left for the next tick.
    pub async fn tick(&self) -> Result<()> {
        for (key, mut record) in self.incidents.list().await? {
            if record.state == IncidentState::Resolved {
                continue;
            }

            match self.chat.channel_kind(&record.channel_id).await {
                Ok(kind) if !kind.is_postable() => {
                    info!(component = "reconciler", incident_key = %key, "Channel not usable, deleting incident");
                    self.incidents.delete(&key).await?;
                    continue;
                }
                Ok(_) => {}
                Err(e) if e.is_gone() => {
                    info!(component = "reconciler", incident_key = %key, "Channel gone, deleting incident");
                    self.incidents.delete(&key).await?;
                    continue;
                }
                Err(e) => {
                    warn!(component = "reconciler", incident_key = %key, error = %e, "Channel lookup failed");
                    continue;
                }
            }

            match self.chat.get_message(&record.channel_id, &record.message_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    info!(component = "reconciler", incident_key = %key, "Message gone, deleting incident");
                    self.incidents.delete(&key).await?;
                    continue;
                }
                Err(e) => {
                    warn!(component = "reconciler", incident_key = %key, error = %e, "Message lookup failed");
                    continue;
                }
            }

            if let Some(thread_id) = record.thread_id.clone() {
                match self.chat.channel_kind(&thread_id).await {
                    Ok(kind) if kind.is_postable() => {}
                    Ok(_) | Err(_) => {
                        info!(component = "reconciler", incident_key = %key, "Thread inaccessible, detaching");
                        record.thread_id = None;
                        self.incidents.put(&key, &record).await?;
                    }
                }
            }
        }
        Ok(())
    }
}
