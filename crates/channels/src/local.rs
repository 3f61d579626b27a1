//! Local CLI/Web transports.
//!
//! Both ride the in-process [`RouteHub`]: `send` publishes a final event
//! on the target route, and an opened stream forwards every pushed event
//! to the route's subscribers (the CLI REPL, the SSE endpoint). They are
//! configless — there is no platform to configure.

use std::sync::Arc;

use async_trait::async_trait;
use bh_domain::stream::StreamEvent;
use bh_domain::{Error, Result};
use serde_json::Value;

use crate::adapter::{
    closed_stream_error, OutboundMessage, OutboundStream, Sender, StreamOptions, StreamSender,
};
use crate::descriptor::{Capabilities, ChannelType, ConfigMap, Descriptor};
use crate::hub::RouteHub;

pub struct LocalAdapter {
    channel_type: ChannelType,
    hub: Arc<RouteHub>,
}

impl LocalAdapter {
    pub fn new(channel_type: ChannelType, hub: Arc<RouteHub>) -> Self {
        Self { channel_type, hub }
    }

    pub fn descriptor(channel_type: ChannelType) -> Descriptor {
        Descriptor {
            channel_type,
            display_name: match channel_type {
                ChannelType::Cli => "Local CLI",
                ChannelType::Web => "Web",
                other => other.as_str(),
            },
            capabilities: Capabilities {
                text: true,
                reply: false,
                attachments: false,
                streaming: true,
                block_streaming: false,
            },
            configless: true,
            target_spec: "route key (bot id)",
            normalize_config: |_raw| Ok(ConfigMap::new()),
            normalize_user_config: normalize_user_config,
            user_config_from_identity: |external_id, _display_name| {
                let mut map = ConfigMap::new();
                map.insert("external_id".into(), Value::String(external_id.to_string()));
                map
            },
            normalize_target: |target| {
                let target = target.trim();
                if target.is_empty() {
                    Err(Error::Validation("empty route key".into()))
                } else {
                    Ok(target.to_string())
                }
            },
        }
    }
}

fn normalize_user_config(raw: &Value) -> Result<ConfigMap> {
    let mut map = ConfigMap::new();
    if let Some(id) = raw.get("external_id").and_then(Value::as_str) {
        map.insert("external_id".into(), Value::String(id.trim().to_string()));
    }
    Ok(map)
}

#[async_trait]
impl Sender for LocalAdapter {
    fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    async fn send(&self, _config: &ConfigMap, target: &str, msg: &OutboundMessage) -> Result<()> {
        self.hub.publish(target, &msg.text);
        Ok(())
    }
}

#[async_trait]
impl StreamSender for LocalAdapter {
    async fn open_stream(
        &self,
        _config: &ConfigMap,
        target: &str,
        _options: StreamOptions,
    ) -> Result<Box<dyn OutboundStream>> {
        Ok(Box::new(LocalStream {
            hub: self.hub.clone(),
            route: target.to_string(),
            closed: false,
        }))
    }
}

/// Forwards pushes straight onto the hub route.
struct LocalStream {
    hub: Arc<RouteHub>,
    route: String,
    closed: bool,
}

#[async_trait]
impl OutboundStream for LocalStream {
    async fn push(&mut self, event: StreamEvent) -> Result<()> {
        if self.closed {
            return Err(closed_stream_error());
        }
        self.hub.publish_event(&self.route, event);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
