//! Feishu (Lark) adapter — open API.
//!
//! Auth is a tenant access token minted from app credentials and cached
//! until shortly before expiry. Feishu has no per-message text edit, so
//! streaming uses block updates: an interactive card is created up front
//! and patched wholesale at most once per second.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bh_domain::stream::{EventBody, StreamEvent};
use bh_domain::{Error, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::adapter::{
    closed_stream_error, OutboundMessage, OutboundStream, Sender, StreamOptions, StreamSender,
};
use crate::descriptor::{
    copy_optional_keys, require_string_keys, Capabilities, ChannelType, ConfigMap, Descriptor,
};
use crate::wire::{classify_status, from_reqwest};

const API_BASE: &str = "https://open.feishu.cn/open-apis";
pub const UPDATE_INTERVAL: Duration = Duration::from_secs(1);
const PLACEHOLDER: &str = "Thinking…";

/// Refresh the tenant token two minutes before Feishu expires it.
const TOKEN_SLACK: Duration = Duration::from_secs(120);

struct CachedToken {
    token: String,
    fetched_at: Instant,
    ttl: Duration,
}

pub struct FeishuAdapter {
    http: reqwest::Client,
    token_cache: Mutex<Option<CachedToken>>,
}

impl Default for FeishuAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FeishuAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            token_cache: Mutex::new(None),
        }
    }

    pub fn descriptor() -> Descriptor {
        Descriptor {
            channel_type: ChannelType::Feishu,
            display_name: "Feishu",
            capabilities: Capabilities {
                text: true,
                reply: true,
                attachments: true,
                streaming: false,
                block_streaming: true,
            },
            configless: false,
            target_spec: "chat id (oc_...)",
            normalize_config: |raw| require_string_keys(raw, &["app_id", "app_secret"]),
            normalize_user_config: |raw| {
                let mut canonical = require_string_keys(raw, &["user_id"])?;
                copy_optional_keys(raw, &mut canonical, &["name"]);
                Ok(canonical)
            },
            user_config_from_identity: |external_id, display_name| {
                let mut map = ConfigMap::new();
                map.insert("user_id".into(), Value::String(external_id.to_string()));
                if !display_name.is_empty() {
                    map.insert("name".into(), Value::String(display_name.to_string()));
                }
                map
            },
            normalize_target: |target| {
                let target = target.trim();
                if target.is_empty() {
                    Err(Error::Validation("empty feishu chat id".into()))
                } else {
                    Ok(target.to_string())
                }
            },
        }
    }

    async fn tenant_token(&self, config: &ConfigMap) -> Result<String> {
        if let Some(cached) = self.token_cache.lock().as_ref() {
            if cached.fetched_at.elapsed() + TOKEN_SLACK < cached.ttl {
                return Ok(cached.token.clone());
            }
        }

        let app_id = config
            .get("app_id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("feishu config missing app_id".into()))?;
        let app_secret = config
            .get("app_secret")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("feishu config missing app_secret".into()))?;

        let resp = self
            .http
            .post(format!("{API_BASE}/auth/v3/tenant_access_token/internal"))
            .json(&json!({ "app_id": app_id, "app_secret": app_secret }))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status("feishu", status, &body));
        }
        let envelope: Value = resp.json().await.map_err(from_reqwest)?;
        let token = envelope
            .get("tenant_access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Http(format!("feishu auth error: {envelope}")))?
            .to_string();
        let ttl = envelope
            .get("expire")
            .and_then(Value::as_u64)
            .unwrap_or(7200);

        *self.token_cache.lock() = Some(CachedToken {
            token: token.clone(),
            fetched_at: Instant::now(),
            ttl: Duration::from_secs(ttl),
        });
        Ok(token)
    }

    async fn api_post(&self, token: &str, path: &str, body: Value) -> Result<Value> {
        let resp = self
            .http
            .post(format!("{API_BASE}{path}"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        Self::unwrap_envelope(resp).await
    }

    async fn api_patch(&self, token: &str, path: &str, body: Value) -> Result<Value> {
        let resp = self
            .http
            .patch(format!("{API_BASE}{path}"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        Self::unwrap_envelope(resp).await
    }

    async fn unwrap_envelope(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status("feishu", status, &body));
        }
        let envelope: Value = resp.json().await.map_err(from_reqwest)?;
        if envelope.get("code").and_then(Value::as_i64).unwrap_or(0) != 0 {
            return Err(Error::Http(format!("feishu API error: {envelope}")));
        }
        Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
    }

    /// Create a text message; returns the platform message id.
    async fn send_text(
        &self,
        token: &str,
        chat_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<String> {
        let content = json!({ "text": text }).to_string();
        let data = match reply_to {
            Some(message_id) => {
                self.api_post(
                    token,
                    &format!("/im/v1/messages/{message_id}/reply"),
                    json!({ "msg_type": "text", "content": content }),
                )
                .await?
            }
            None => {
                self.api_post(
                    token,
                    "/im/v1/messages?receive_id_type=chat_id",
                    json!({ "receive_id": chat_id, "msg_type": "text", "content": content }),
                )
                .await?
            }
        };
        data.get("message_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Http("feishu create response missing message_id".into()))
    }

    /// Create the interactive card used for block streaming.
    async fn send_card(&self, token: &str, chat_id: &str, text: &str) -> Result<String> {
        let content = card_content(text).to_string();
        let data = self
            .api_post(
                token,
                "/im/v1/messages?receive_id_type=chat_id",
                json!({ "receive_id": chat_id, "msg_type": "interactive", "content": content }),
            )
            .await?;
        data.get("message_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Http("feishu card response missing message_id".into()))
    }

    async fn update_card(&self, token: &str, message_id: &str, text: &str) -> Result<()> {
        self.api_patch(
            token,
            &format!("/im/v1/messages/{message_id}"),
            json!({ "content": card_content(text).to_string() }),
        )
        .await?;
        Ok(())
    }
}

fn card_content(text: &str) -> Value {
    json!({
        "elements": [{ "tag": "markdown", "content": text }],
    })
}

#[async_trait]
impl Sender for FeishuAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Feishu
    }

    async fn send(&self, config: &ConfigMap, target: &str, msg: &OutboundMessage) -> Result<()> {
        let token = self.tenant_token(config).await?;
        self.send_text(&token, target, &msg.text, msg.reply_to.as_deref())
            .await?;
        for attachment in &msg.attachments {
            // Media bytes live behind the storage provider; deliver links.
            self.send_text(
                &token,
                target,
                &format!("{}: {}", attachment.name, attachment.url),
                None,
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StreamSender for FeishuAdapter {
    async fn open_stream(
        &self,
        config: &ConfigMap,
        target: &str,
        _options: StreamOptions,
    ) -> Result<Box<dyn OutboundStream>> {
        Ok(Box::new(FeishuStream {
            adapter: FeishuAdapter {
                http: self.http.clone(),
                token_cache: Mutex::new(None),
            },
            config: config.clone(),
            chat_id: target.to_string(),
            message_id: None,
            buffer: String::new(),
            last_update: None,
            closed: false,
        }))
    }
}

struct FeishuStream {
    adapter: FeishuAdapter,
    config: ConfigMap,
    chat_id: String,
    message_id: Option<String>,
    buffer: String,
    last_update: Option<Instant>,
    closed: bool,
}

impl FeishuStream {
    fn update_due(&self, now: Instant) -> bool {
        match self.last_update {
            None => true,
            Some(at) => now.duration_since(at) >= UPDATE_INTERVAL,
        }
    }

    async fn flush(&mut self, text: &str) -> Result<()> {
        let token = self.adapter.tenant_token(&self.config).await?;
        match &self.message_id {
            Some(id) => self.adapter.update_card(&token, id, text).await?,
            None => {
                let id = self.adapter.send_card(&token, &self.chat_id, text).await?;
                self.message_id = Some(id);
            }
        }
        self.last_update = Some(Instant::now());
        Ok(())
    }
}

#[async_trait]
impl OutboundStream for FeishuStream {
    async fn push(&mut self, event: StreamEvent) -> Result<()> {
        if self.closed {
            return Err(closed_stream_error());
        }
        match event.body {
            EventBody::Status { ref state } if state == "started" => {
                if self.message_id.is_none() {
                    self.flush(PLACEHOLDER).await?;
                }
                Ok(())
            }
            EventBody::TextDelta { delta } => {
                self.buffer.push_str(&delta);
                if self.update_due(Instant::now()) {
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
            _ => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_requires_app_credentials() {
        let d = FeishuAdapter::descriptor();
        assert!((d.normalize_config)(&json!({ "app_id": "a" })).is_err());
        let canonical =
            (d.normalize_config)(&json!({ "app_id": "a", "app_secret": "s" })).unwrap();
        assert_eq!(canonical["app_id"], json!("a"));
    }

    #[test]
    fn capabilities_advertise_block_streaming_only() {
        let d = FeishuAdapter::descriptor();
        assert!(!d.capabilities.streaming);
        assert!(d.capabilities.block_streaming);
        assert!(d.capabilities.reply);
    }

    #[test]
    fn card_content_wraps_markdown() {
        let card = card_content("hello **world**");
        assert_eq!(card["elements"][0]["tag"], "markdown");
        assert_eq!(card["elements"][0]["content"], "hello **world**");
    }
}
