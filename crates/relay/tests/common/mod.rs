//! Shared test harness: a recording chat double plus a fully wired
//! pipeline over in-memory stores and a manual clock.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use incident_relay::alert::{AlertStatus, CanonicalAlert, Severity};
use incident_relay::audit::AuditLog;
use incident_relay::chat::{
    ChannelKind, ChatClient, ChatMessage, ChatMirror, SentMessage,
};
use incident_relay::clock::{Clock, ManualClock};
use incident_relay::processor::Processor;
use incident_relay::rules::ConfigService;
use incident_relay::store::{
    Database, DedupStore, IncidentStore, KvStore, MemoryKvStore, SqliteDatabase,
};
use incident_relay::{Error, Result};

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub channel_id: String,
    pub message: ChatMessage,
}

#[derive(Default)]
pub struct ChatState {
    pub messages: HashMap<String, StoredMessage>,
    pub channel_kinds: HashMap<String, ChannelKind>,
    pub gone_channels: HashSet<String>,
    /// Every send in order: (channel id, message).
    pub sends: Vec<(String, ChatMessage)>,
    /// Every edit in order: (channel id, message id, message).
    pub edits: Vec<(String, String, ChatMessage)>,
    /// message id -> thread id.
    pub threads: HashMap<String, String>,
    pub thread_names: HashMap<String, String>,
}

/// [`ChatClient`] double that records every call and serves reads from
/// its own state.
pub struct RecordingChatClient {
    next_id: AtomicU64,
    pub state: Mutex<ChatState>,
}

impl RecordingChatClient {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(ChatState::default()),
        }
    }

    fn next(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn send_count(&self) -> usize {
        self.state.lock().unwrap().sends.len()
    }

    pub fn edit_count(&self) -> usize {
        self.state.lock().unwrap().edits.len()
    }

    pub fn sends_to(&self, channel_id: &str) -> Vec<ChatMessage> {
        self.state
            .lock()
            .unwrap()
            .sends
            .iter()
            .filter(|(channel, _)| channel == channel_id)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn last_edit(&self) -> Option<(String, String, ChatMessage)> {
        self.state.lock().unwrap().edits.last().cloned()
    }

    pub fn thread_of(&self, message_id: &str) -> Option<String> {
        self.state.lock().unwrap().threads.get(message_id).cloned()
    }

    pub fn kill_message(&self, message_id: &str) {
        self.state.lock().unwrap().messages.remove(message_id);
    }

    pub fn kill_channel(&self, channel_id: &str) {
        self.state
            .lock()
            .unwrap()
            .gone_channels
            .insert(channel_id.to_string());
    }

    pub fn set_channel_kind(&self, channel_id: &str, kind: ChannelKind) {
        self.state
            .lock()
            .unwrap()
            .channel_kinds
            .insert(channel_id.to_string(), kind);
    }
}

#[async_trait]
impl ChatClient for RecordingChatClient {
    async fn validate_token(&self) -> Result<()> {
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, message: &ChatMessage) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.gone_channels.contains(channel_id) {
            return Err(Error::ChatGone(format!("channel {channel_id}")));
        }
        let id = self.next("m");
        state.messages.insert(
            id.clone(),
            StoredMessage {
                channel_id: channel_id.to_string(),
                message: message.clone(),
            },
        );
        state.sends.push((channel_id.to_string(), message.clone()));
        Ok(id)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        message: &ChatMessage,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.gone_channels.contains(channel_id) {
            return Err(Error::ChatGone(format!("channel {channel_id}")));
        }
        let Some(stored) = state.messages.get_mut(message_id) else {
            return Err(Error::ChatGone(format!("message {message_id}")));
        };
        stored.message = message.clone();
        state
            .edits
            .push((channel_id.to_string(), message_id.to_string(), message.clone()));
        Ok(())
    }

    async fn get_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<Option<SentMessage>> {
        let state = self.state.lock().unwrap();
        if state.gone_channels.contains(channel_id) {
            return Ok(None);
        }
        Ok(state.messages.get(message_id).map(|stored| SentMessage {
            id: message_id.to_string(),
            content: stored.message.content.clone(),
            embed: stored.message.embed.clone(),
        }))
    }

    async fn create_thread(
        &self,
        _channel_id: &str,
        message_id: &str,
        name: &str,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let thread_id = self.next("t");
        state
            .channel_kinds
            .insert(thread_id.clone(), ChannelKind::Thread);
        state
            .threads
            .insert(message_id.to_string(), thread_id.clone());
        state
            .thread_names
            .insert(thread_id.clone(), name.to_string());
        Ok(thread_id)
    }

    async fn channel_kind(&self, channel_id: &str) -> Result<ChannelKind> {
        let state = self.state.lock().unwrap();
        if state.gone_channels.contains(channel_id) {
            return Err(Error::ChatGone(format!("channel {channel_id}")));
        }
        Ok(state
            .channel_kinds
            .get(channel_id)
            .copied()
            .unwrap_or(ChannelKind::Text))
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub kv: Arc<MemoryKvStore>,
    pub chat: Arc<RecordingChatClient>,
    pub dedup: Arc<DedupStore>,
    pub incidents: Arc<IncidentStore>,
    pub rules: Arc<ConfigService>,
    pub audit: Arc<AuditLog>,
    pub mirror: Arc<ChatMirror>,
    pub processor: Arc<Processor>,
    pub db: Arc<dyn Database>,
}

impl Harness {
    pub async fn audit_events(&self) -> Vec<incident_relay::store::AuditEvent> {
        self.db.list_audit_events(100).await.unwrap()
    }
}

pub fn start_time() -> DateTime<Utc> {
    "2025-06-01T00:00:00Z".parse().unwrap()
}

/// Wire the whole pipeline over in-memory stores, a SQLite `:memory:`
/// database, and a manual clock seeded with the given rules.
pub async fn harness(rules_json: serde_json::Value) -> Harness {
    let clock = Arc::new(ManualClock::new(start_time()));
    let clock_dyn: Arc<dyn Clock> = clock.clone();

    let kv = Arc::new(MemoryKvStore::new(clock_dyn.clone()));
    let kv_dyn: Arc<dyn KvStore> = kv.clone();

    let db: Arc<dyn Database> = Arc::new(SqliteDatabase::new(":memory:", 5).await.unwrap());
    db.init().await.unwrap();

    let rules = Arc::new(ConfigService::new(Some(db.clone()), None, clock_dyn.clone()));
    rules.push(rules_json).await.unwrap();

    let chat = Arc::new(RecordingChatClient::new());
    let chat_dyn: Arc<dyn ChatClient> = chat.clone();

    let dedup = Arc::new(DedupStore::new(kv_dyn.clone()));
    let incidents = Arc::new(IncidentStore::new(kv_dyn));
    let audit = Arc::new(AuditLog::new(Some(db.clone()), clock_dyn.clone()));

    let mirror = Arc::new(ChatMirror::new(
        chat_dyn.clone(),
        incidents.clone(),
        dedup.clone(),
        rules.clone(),
        audit.clone(),
        Some(db.clone()),
        clock_dyn.clone(),
    ));
    let processor = Arc::new(Processor::new(
        rules.clone(),
        dedup.clone(),
        incidents.clone(),
        mirror.clone(),
        audit.clone(),
        clock_dyn,
    ));

    Harness {
        clock,
        kv,
        chat,
        dedup,
        incidents,
        rules,
        audit,
        mirror,
        processor,
        db,
    }
}

pub fn firing_alert(alert_id: &str, rule_name: &str, severity: Severity) -> CanonicalAlert {
    CanonicalAlert {
        alert_id: alert_id.to_string(),
        resource: None,
        rule_name: rule_name.to_string(),
        status: AlertStatus::Firing,
        severity,
        title: rule_name.to_string(),
        description: "CPU usage above threshold".to_string(),
        fields: vec![("instance".to_string(), "host-1".to_string())],
        started_at: start_time(),
        resolved_at: None,
        channel_id: None,
        source: "grafana".to_string(),
    }
}

pub fn resolved_alert(alert_id: &str, rule_name: &str) -> CanonicalAlert {
    CanonicalAlert {
        status: AlertStatus::Resolved,
        ..firing_alert(alert_id, rule_name, Severity::Critical)
    }
}
