//! Discord adapter — REST v10.
//!
//! Messages cap at 2000 characters; longer finals are truncated to 1997
//! plus an ellipsis. Streaming edits the placeholder message no more than
//! once per two seconds to stay inside Discord's edit rate limit.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bh_domain::stream::{EventBody, StreamEvent};
use bh_domain::{Error, Result};
use serde_json::{json, Value};

use crate::adapter::{
    closed_stream_error, OutboundMessage, OutboundStream, Sender, StreamOptions, StreamSender,
};
use crate::descriptor::{
    copy_optional_keys, require_string_keys, Capabilities, ChannelType, ConfigMap, Descriptor,
};
use crate::text::truncate_with_ellipsis;
use crate::wire::{classify_status, from_reqwest};

const API_BASE: &str = "https://discord.com/api/v10";
pub const MAX_MESSAGE_LEN: usize = 2000;
pub const EDIT_INTERVAL: Duration = Duration::from_secs(2);
const PLACEHOLDER: &str = "Thinking…";

pub struct DiscordAdapter {
    http: reqwest::Client,
}

impl Default for DiscordAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscordAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub fn descriptor() -> Descriptor {
        Descriptor {
            channel_type: ChannelType::Discord,
            display_name: "Discord",
            capabilities: Capabilities {
                text: true,
                reply: true,
                attachments: true,
                streaming: true,
                block_streaming: false,
            },
            configless: false,
            target_spec: "channel id (numeric snowflake)",
            normalize_config: |raw| require_string_keys(raw, &["bot_token"]),
            normalize_user_config: |raw| {
                let mut canonical = require_string_keys(raw, &["user_id"])?;
                copy_optional_keys(raw, &mut canonical, &["username"]);
                Ok(canonical)
            },
            user_config_from_identity: |external_id, display_name| {
                let mut map = ConfigMap::new();
                map.insert("user_id".into(), Value::String(external_id.to_string()));
                if !display_name.is_empty() {
                    map.insert("username".into(), Value::String(display_name.to_string()));
                }
                map
            },
            normalize_target: |target| {
                let target = target.trim();
                if target.is_empty() || !target.chars().all(|c| c.is_ascii_digit()) {
                    return Err(Error::Validation(format!(
                        "discord target must be a numeric channel id, got {target:?}"
                    )));
                }
                Ok(target.to_string())
            },
        }
    }

    fn token(config: &ConfigMap) -> Result<&str> {
        config
            .get("bot_token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("discord config missing bot_token".into()))
    }

    /// POST a message; returns the created message id.
    async fn create_message(
        &self,
        token: &str,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<String> {
        let mut body = json!({ "content": content });
        if let Some(message_id) = reply_to {
            body["message_reference"] = json!({ "message_id": message_id });
        }
        let resp = self
            .http
            .post(format!("{API_BASE}/channels/{channel_id}/messages"))
            .header("Authorization", format!("Bot {token}"))
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status("discord", status, &body));
        }
        let created: Value = resp.json().await.map_err(from_reqwest)?;
        created
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Http("discord create response missing message id".into()))
    }

    async fn edit_message(
        &self,
        token: &str,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<()> {
        let resp = self
            .http
            .patch(format!(
                "{API_BASE}/channels/{channel_id}/messages/{message_id}"
            ))
            .header("Authorization", format!("Bot {token}"))
            .json(&json!({ "content": content }))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status("discord", status, &body));
        }
        Ok(())
    }
}

#[async_trait]
impl Sender for DiscordAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Discord
    }

    async fn send(&self, config: &ConfigMap, target: &str, msg: &OutboundMessage) -> Result<()> {
        let token = Self::token(config)?;
        let content = truncate_with_ellipsis(&msg.text, MAX_MESSAGE_LEN);
        self.create_message(token, target, &content, msg.reply_to.as_deref())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StreamSender for DiscordAdapter {
    async fn open_stream(
        &self,
        config: &ConfigMap,
        target: &str,
        options: StreamOptions,
    ) -> Result<Box<dyn OutboundStream>> {
        let token = Self::token(config)?.to_string();
        Ok(Box::new(DiscordStream {
            adapter: DiscordAdapter {
                http: self.http.clone(),
            },
            token,
            channel_id: target.to_string(),
            reply_to: options.reply_to,
            message_id: None,
            buffer: String::new(),
            last_edit: None,
            closed: false,
        }))
    }
}

/// Has the edit window elapsed since the last edit (if any)?
fn edit_window_elapsed(last_edit: Option<Instant>, now: Instant) -> bool {
    match last_edit {
        None => true,
        Some(at) => now.duration_since(at) >= EDIT_INTERVAL,
    }
}

struct DiscordStream {
    adapter: DiscordAdapter,
    token: String,
    channel_id: String,
    reply_to: Option<String>,
    message_id: Option<String>,
    buffer: String,
    last_edit: Option<Instant>,
    closed: bool,
}

impl DiscordStream {
    async fn ensure_placeholder(&mut self) -> Result<()> {
        if self.message_id.is_none() {
            let id = self
                .adapter
                .create_message(
                    &self.token,
                    &self.channel_id,
                    PLACEHOLDER,
                    self.reply_to.as_deref(),
                )
                .await?;
            self.message_id = Some(id);
            self.last_edit = Some(Instant::now());
        }
        Ok(())
    }

    async fn flush(&mut self, content: &str) -> Result<()> {
        let content = truncate_with_ellipsis(content, MAX_MESSAGE_LEN);
        match &self.message_id {
            Some(id) => {
                self.adapter
                    .edit_message(&self.token, &self.channel_id, id, &content)
                    .await?;
            }
            None => {
                let id = self
                    .adapter
                    .create_message(
                        &self.token,
                        &self.channel_id,
                        &content,
                        self.reply_to.as_deref(),
                    )
                    .await?;
                self.message_id = Some(id);
            }
        }
        self.last_edit = Some(Instant::now());
        Ok(())
    }
}

#[async_trait]
impl OutboundStream for DiscordStream {
    async fn push(&mut self, event: StreamEvent) -> Result<()> {
        if self.closed {
            return Err(closed_stream_error());
        }
        match event.body {
            EventBody::Status { ref state } if state == "started" => {
                self.ensure_placeholder().await
            }
            EventBody::TextDelta { delta } => {
                self.buffer.push_str(&delta);
                if edit_window_elapsed(self.last_edit, Instant::now()) && !self.buffer.is_empty() {
                    let snapshot = self.buffer.clone();
                    self.flush(&snapshot).await?;
                }
                Ok(())
            }
            EventBody::Final { content } => {
                let text = if content.is_empty() {
                    self.buffer.clone()
                } else {
                    content
                };
                self.flush(&text).await
            }
            EventBody::Error { message } => self.flush(&format!("Error: {message}")).await,
            // Phase/tool markers have no rich rendering on Discord.
            _ => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
