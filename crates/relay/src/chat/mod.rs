//! Chat-side surface: the narrow client trait the pipeline talks
//! through, the message/embed types, and the mirror that owns the
//! one-message-per-incident contract.

mod discord;
mod mirror;

pub use discord::DiscordClient;
pub use mirror::ChatMirror;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Hard limit on a single chat message body.
pub const MAX_MESSAGE_LEN: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    DirectMessage,
    Thread,
    Other,
}

impl ChannelKind {
    /// Incident messages only live in guild text channels or threads.
    pub fn is_postable(self) -> bool {
        matches!(self, ChannelKind::Text | ChannelKind::Thread)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub thumbnail_url: Option<String>,
}

/// Interactive controls attached to an incident message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Acknowledge,
    Resolve,
    Troubleshoot,
}

impl ButtonAction {
    pub fn custom_id(self) -> &'static str {
        match self {
            ButtonAction::Acknowledge => "ack",
            ButtonAction::Resolve => "resolve",
            ButtonAction::Troubleshoot => "troubleshoot",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ButtonAction::Acknowledge => "Acknowledge",
            ButtonAction::Resolve => "Resolve",
            ButtonAction::Troubleshoot => "Troubleshoot",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatMessage {
    pub content: Option<String>,
    pub embed: Option<Embed>,
    pub buttons: Vec<ButtonAction>,
}

impl ChatMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            embed: None,
            buttons: Vec::new(),
        }
    }
}

/// A message as read back from the chat API.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub id: String,
    pub content: Option<String>,
    pub embed: Option<Embed>,
}

/// The only interface the pipeline has to the chat gateway. The
/// production implementation is [`DiscordClient`]; tests substitute a
/// recording double.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Verify credentials at startup; failure is fatal.
    async fn validate_token(&self) -> Result<()>;
    /// Post a message, returning its id.
    async fn send_message(&self, channel_id: &str, message: &ChatMessage) -> Result<String>;
    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        message: &ChatMessage,
    ) -> Result<()>;
    /// Fetch a message; `Ok(None)` when the message or its channel is gone.
    async fn get_message(&self, channel_id: &str, message_id: &str)
        -> Result<Option<SentMessage>>;
    /// Start a public thread off a message, returning the thread id.
    async fn create_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        name: &str,
    ) -> Result<String>;
    async fn channel_kind(&self, channel_id: &str) -> Result<ChannelKind>;
}

/// Split markdown into chunks that fit a chat message, preferring line
/// boundaries. A single oversized line is hard-split.
pub fn chunk_markdown(content: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        let mut line = line.to_string();
        while line.chars().count() > max_len {
            let head: String = line.chars().take(max_len).collect();
            let rest: String = line.chars().skip(max_len).collect();
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.push(head);
            line = rest;
        }
        let needed = line.chars().count() + if current.is_empty() { 0 } else { 1 };
        if current.chars().count() + needed > max_len && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
