//! Discord REST implementation of [`ChatClient`].

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::chat::{ButtonAction, ChannelKind, ChatClient, ChatMessage, Embed, SentMessage};
use crate::metrics::CHAT_RATE_LIMITS_TOTAL;
use crate::{Error, Result};

const API_BASE: &str = "https://discord.com/api/v10";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Threads auto-archive after a day of inactivity.
const THREAD_AUTO_ARCHIVE_MINUTES: u32 = 1440;

pub struct DiscordClient {
    http: reqwest::Client,
    token: String,
}

impl DiscordClient {
    pub fn new(token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            token: token.to_string(),
        })
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn check(&self, response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            CHAT_RATE_LIMITS_TOTAL.inc();
            return Err(Error::Chat(format!("rate limited: {context}")));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(Error::ChatGone(context.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Chat(format!("{context}: {status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatClient for DiscordClient {
    async fn validate_token(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{API_BASE}/users/@me"))
            .header("Authorization", self.auth())
            .send()
            .await?;
        self.check(response, "validate token").await?;
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, message: &ChatMessage) -> Result<String> {
        debug!(component = "chat", channel_id, "Sending message");
        let response = self
            .http
            .post(format!("{API_BASE}/channels/{channel_id}/messages"))
            .header("Authorization", self.auth())
            .json(&WireMessage::from(message))
            .send()
            .await?;
        let response = self
            .check(response, &format!("send message to {channel_id}"))
            .await?;
        let message: MessageResponse = response.json().await?;
        Ok(message.id)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        message: &ChatMessage,
    ) -> Result<()> {
        debug!(component = "chat", channel_id, message_id, "Editing message");
        let response = self
            .http
            .patch(format!(
                "{API_BASE}/channels/{channel_id}/messages/{message_id}"
            ))
            .header("Authorization", self.auth())
            .json(&WireMessage::from(message))
            .send()
            .await?;
        self.check(response, &format!("edit message {message_id}"))
            .await?;
        Ok(())
    }

    async fn get_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<Option<SentMessage>> {
        let response = self
            .http
            .get(format!(
                "{API_BASE}/channels/{channel_id}/messages/{message_id}"
            ))
            .header("Authorization", self.auth())
            .send()
            .await?;
        let response = match self.check(response, &format!("get message {message_id}")).await {
            Ok(response) => response,
            Err(e) if e.is_gone() => return Ok(None),
            Err(e) => return Err(e),
        };
        let message: MessageResponse = response.json().await?;
        Ok(Some(SentMessage {
            id: message.id,
            content: if message.content.is_empty() {
                None
            } else {
                Some(message.content)
            },
            embed: message.embeds.into_iter().next().map(Embed::from),
        }))
    }

    async fn create_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        name: &str,
    ) -> Result<String> {
        let response = self
            .http
            .post(format!(
                "{API_BASE}/channels/{channel_id}/messages/{message_id}/threads"
            ))
            .header("Authorization", self.auth())
            .json(&serde_json::json!({
                "name": name,
                "auto_archive_duration": THREAD_AUTO_ARCHIVE_MINUTES,
            }))
            .send()
            .await?;
        let response = self
            .check(response, &format!("create thread on {message_id}"))
            .await?;
        let thread: ChannelResponse = response.json().await?;
        Ok(thread.id)
    }

    async fn channel_kind(&self, channel_id: &str) -> Result<ChannelKind> {
        let response = self
            .http
            .get(format!("{API_BASE}/channels/{channel_id}"))
            .header("Authorization", self.auth())
            .send()
            .await?;
        let response = self
            .check(response, &format!("get channel {channel_id}"))
            .await?;
        let channel: ChannelResponse = response.json().await?;
        // Channel type tags per the Discord API.
        Ok(match channel.kind {
            0 | 5 => ChannelKind::Text,
            1 | 3 => ChannelKind::DirectMessage,
            10 | 11 | 12 => ChannelKind::Thread,
            _ => ChannelKind::Other,
        })
    }
}

// Wire shapes for the Discord REST API.

#[derive(Serialize)]
struct WireMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    embeds: Vec<WireEmbed>,
    components: Vec<WireActionRow>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let components = if message.buttons.is_empty() {
            Vec::new()
        } else {
            vec![WireActionRow {
                kind: 1,
                components: message.buttons.iter().map(|b| WireButton::from(*b)).collect(),
            }]
        };
        Self {
            content: message.content.clone(),
            embeds: message.embed.iter().map(WireEmbed::from).collect(),
            components,
        }
    }
}

#[derive(Serialize)]
struct WireActionRow {
    #[serde(rename = "type")]
    kind: u8,
    components: Vec<WireButton>,
}

#[derive(Serialize)]
struct WireButton {
    #[serde(rename = "type")]
    kind: u8,
    style: u8,
    label: String,
    custom_id: String,
}

impl From<ButtonAction> for WireButton {
    fn from(action: ButtonAction) -> Self {
        let style = match action {
            ButtonAction::Acknowledge => 1,
            ButtonAction::Resolve => 3,
            ButtonAction::Troubleshoot => 2,
        };
        Self {
            kind: 2,
            style,
            label: action.label().to_string(),
            custom_id: action.custom_id().to_string(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireEmbed {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    color: u32,
    #[serde(default)]
    fields: Vec<WireField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thumbnail: Option<WireThumbnail>,
}

#[derive(Serialize, Deserialize)]
struct WireField {
    name: String,
    value: String,
    #[serde(default)]
    inline: bool,
}

#[derive(Serialize, Deserialize)]
struct WireThumbnail {
    url: String,
}

impl From<&Embed> for WireEmbed {
    fn from(embed: &Embed) -> Self {
        Self {
            title: embed.title.clone(),
            description: embed.description.clone(),
            color: embed.color,
            fields: embed
                .fields
                .iter()
                .map(|f| WireField {
                    name: f.name.clone(),
                    value: f.value.clone(),
                    inline: f.inline,
                })
                .collect(),
            thumbnail: embed
                .thumbnail_url
                .clone()
                .map(|url| WireThumbnail { url }),
        }
    }
}

impl From<WireEmbed> for Embed {
    fn from(wire: WireEmbed) -> Self {
        Self {
            title: wire.title,
            description: wire.description,
            color: wire.color,
            fields: wire
                .fields
                .into_iter()
                .map(|f| crate::chat::EmbedField {
                    name: f.name,
                    value: f.value,
                    inline: f.inline,
                })
                .collect(),
            thumbnail_url: wire.thumbnail.map(|t| t.url),
        }
    }
}

#[derive(Deserialize)]
struct MessageResponse {
    id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    embeds: Vec<WireEmbed>,
}

#[derive(Deserialize)]
struct ChannelResponse {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
}
