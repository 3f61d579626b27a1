//! Channel bindings — which platform account reaches which bot, and the
//! adapter config used to answer there.

use bh_channels::{ChannelRegistry, ChannelType, ConfigMap};
use bh_domain::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub channel: ChannelType,
    /// Canonical adapter config (bot token etc.), normalized at bind time.
    pub config: ConfigMap,
    /// Canonical user-config criteria identifying the bound platform
    /// account.
    pub user_config: ConfigMap,
    /// Default outbound target (chat id / route key).
    pub target: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct BindingStore {
    bindings: RwLock<Vec<ChannelBinding>>,
}

impl BindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a bot to a channel. Raw configs are normalized through the
    /// registry first; a second binding for the same (bot, channel) is a
    /// conflict.
    pub fn bind(
        &self,
        registry: &ChannelRegistry,
        bot_id: Uuid,
        channel: ChannelType,
        raw_config: &serde_json::Value,
        raw_user_config: &serde_json::Value,
        target: &str,
    ) -> Result<ChannelBinding> {
        let config = registry.normalize_config(channel, raw_config)?;
        let user_config = registry.normalize_user_config(channel, raw_user_config)?;
        let target = registry.normalize_target(channel, target)?;

        let mut bindings = self.bindings.write();
        if bindings
            .iter()
            .any(|b| b.bot_id == bot_id && b.channel == channel)
        {
            return Err(Error::Conflict(format!(
                "bot {bot_id} already bound to {channel}"
            )));
        }
        let binding = ChannelBinding {
            id: Uuid::new_v4(),
            bot_id,
            channel,
            config,
            user_config,
            target,
            created_at: Utc::now(),
        };
        bindings.push(binding.clone());
        tracing::info!(%bot_id, %channel, "channel binding created");
        Ok(binding)
    }

    /// Find the bot a raw inbound user-config addresses. The adapter's
    /// own matcher does the compare (case-insensitive handles).
    pub fn match_binding(
        &self,
        registry: &ChannelRegistry,
        channel: ChannelType,
        criteria: &ConfigMap,
    ) -> Result<ChannelBinding> {
        let sender = registry
            .sender(channel)
            .ok_or_else(|| Error::NotFound(format!("channel type {channel} not registered")))?;
        self.bindings
            .read()
            .iter()
            .find(|b| b.channel == channel && sender.matches_user_config(&b.user_config, criteria))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no {channel} binding matches")))
    }

    pub fn for_bot(&self, bot_id: Uuid) -> Vec<ChannelBinding> {
        self.bindings
            .read()
            .iter()
            .filter(|b| b.bot_id == bot_id)
            .cloned()
            .collect()
    }

    pub fn get(&self, bot_id: Uuid, channel: ChannelType) -> Result<ChannelBinding> {
        self.bindings
            .read()
            .iter()
            .find(|b| b.bot_id == bot_id && b.channel == channel)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("bot {bot_id} has no {channel} binding")))
    }

    /// Remove all bindings for a bot (deletion cascade).
    pub fn remove_bot(&self, bot_id: Uuid) {
        self.bindings.write().retain(|b| b.bot_id != bot_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bh_channels::hub::RouteHub;
    use bh_channels::local::LocalAdapter;
    use bh_channels::registry::{Registration, RegistryBuilder};
    use std::sync::Arc;

    fn registry_with_cli() -> ChannelRegistry {
        let hub = Arc::new(RouteHub::new());
        let adapter = Arc::new(LocalAdapter::new(ChannelType::Cli, hub));
        RegistryBuilder::new()
            .register(Registration {
                descriptor: LocalAdapter::descriptor(ChannelType::Cli),
                sender: adapter.clone(),
                stream_sender: Some(adapter),
                inbound: None,
                directory: None,
            })
            .unwrap()
            .build()
    }

    #[test]
    fn bind_then_match_round_trips() {
        let registry = registry_with_cli();
        let store = BindingStore::new();
        let bot_id = Uuid::new_v4();

        store
            .bind(
                &registry,
                bot_id,
                ChannelType::Cli,
                &serde_json::json!({}),
                &serde_json::json!({ "external_id": "local-user" }),
                "route-1",
            )
            .unwrap();

        let mut criteria = ConfigMap::new();
        criteria.insert("external_id".into(), serde_json::json!("local-user"));
        let matched = store
            .match_binding(&registry, ChannelType::Cli, &criteria)
            .unwrap();
        assert_eq!(matched.bot_id, bot_id);
    }

    #[test]
    fn duplicate_binding_is_conflict() {
        let registry = registry_with_cli();
        let store = BindingStore::new();
        let bot_id = Uuid::new_v4();

        let bind = |store: &BindingStore| {
            store.bind(
                &registry,
                bot_id,
                ChannelType::Cli,
                &serde_json::json!({}),
                &serde_json::json!({}),
                "route-1",
            )
        };
        bind(&store).unwrap();
        assert_eq!(
            bind(&store).unwrap_err().kind(),
            bh_domain::ErrorKind::Conflict
        );
    }

    #[test]
    fn no_match_is_not_found() {
        let registry = registry_with_cli();
        let store = BindingStore::new();
        let err = store
            .match_binding(&registry, ChannelType::Cli, &ConfigMap::new())
            .unwrap_err();
        assert_eq!(err.kind(), bh_domain::ErrorKind::NotFound);
    }

    #[test]
    fn remove_bot_cascades() {
        let registry = registry_with_cli();
        let store = BindingStore::new();
        let bot_id = Uuid::new_v4();
        store
            .bind(
                &registry,
                bot_id,
                ChannelType::Cli,
                &serde_json::json!({}),
                &serde_json::json!({}),
                "r",
            )
            .unwrap();
        store.remove_bot(bot_id);
        assert!(store.for_bot(bot_id).is_empty());
    }
}
