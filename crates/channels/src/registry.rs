//! The channel registry — one frozen table of adapters keyed by type.
//!
//! The composition root registers each adapter exactly once through
//! [`RegistryBuilder`]; a duplicate type is a fatal error that aborts
//! startup. After `build()` the registry is immutable, so lookups take no
//! lock.

use std::collections::HashMap;
use std::sync::Arc;

use bh_domain::{Error, Result};
use serde_json::Value;

use crate::adapter::{DirectoryAdapter, InboundSource, Sender, StreamSender};
use crate::descriptor::{ChannelType, ConfigMap, Descriptor};

/// Everything an adapter brings to the table: its descriptor, the
/// required sender, and whichever optional capabilities it implements.
pub struct Registration {
    pub descriptor: Descriptor,
    pub sender: Arc<dyn Sender>,
    pub stream_sender: Option<Arc<dyn StreamSender>>,
    pub inbound: Option<Arc<dyn InboundSource>>,
    pub directory: Option<Arc<dyn DirectoryAdapter>>,
}

#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<ChannelType, Registration>,
}

impl std::fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. A second registration for the same type is a
    /// programmer error and fails fatally.
    pub fn register(mut self, registration: Registration) -> Result<Self> {
        let channel_type = registration.descriptor.channel_type;
        if self.entries.contains_key(&channel_type) {
            return Err(Error::Fatal(format!(
                "channel type {channel_type} registered twice"
            )));
        }
        self.entries.insert(channel_type, registration);
        Ok(self)
    }

    pub fn build(self) -> ChannelRegistry {
        ChannelRegistry {
            entries: self.entries,
        }
    }
}

/// Read-only after startup; shared as `Arc<ChannelRegistry>`.
pub struct ChannelRegistry {
    entries: HashMap<ChannelType, Registration>,
}

impl ChannelRegistry {
    pub fn lookup(&self, channel_type: ChannelType) -> Option<&Descriptor> {
        self.entries.get(&channel_type).map(|r| &r.descriptor)
    }

    pub fn sender(&self, channel_type: ChannelType) -> Option<Arc<dyn Sender>> {
        self.entries.get(&channel_type).map(|r| r.sender.clone())
    }

    pub fn stream_sender(&self, channel_type: ChannelType) -> Option<Arc<dyn StreamSender>> {
        self.entries
            .get(&channel_type)
            .and_then(|r| r.stream_sender.clone())
    }

    pub fn directory_adapter(&self, channel_type: ChannelType) -> Option<Arc<dyn DirectoryAdapter>> {
        self.entries
            .get(&channel_type)
            .and_then(|r| r.directory.clone())
    }

    /// Adapters that run their own inbound loops, with their types.
    pub fn inbound_sources(&self) -> Vec<(ChannelType, Arc<dyn InboundSource>)> {
        self.entries
            .iter()
            .filter_map(|(ct, r)| r.inbound.clone().map(|i| (*ct, i)))
            .collect()
    }

    /// All registered channel types (the platform tags advertised to the
    /// system prompt).
    pub fn types(&self) -> Vec<ChannelType> {
        let mut types: Vec<ChannelType> = self.entries.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    fn descriptor(&self, channel_type: ChannelType) -> Result<&Descriptor> {
        self.lookup(channel_type)
            .ok_or_else(|| Error::NotFound(format!("channel type {channel_type} not registered")))
    }

    pub fn normalize_config(&self, channel_type: ChannelType, raw: &Value) -> Result<ConfigMap> {
        (self.descriptor(channel_type)?.normalize_config)(raw)
    }

    pub fn normalize_user_config(&self, channel_type: ChannelType, raw: &Value) -> Result<ConfigMap> {
        (self.descriptor(channel_type)?.normalize_user_config)(raw)
    }

    pub fn normalize_target(&self, channel_type: ChannelType, target: &str) -> Result<String> {
        (self.descriptor(channel_type)?.normalize_target)(target)
    }

    pub fn user_config_from_identity(
        &self,
        channel_type: ChannelType,
        external_id: &str,
        display_name: &str,
    ) -> Result<ConfigMap> {
        Ok((self.descriptor(channel_type)?.user_config_from_identity)(
            external_id,
            display_name,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalAdapter;
    use crate::hub::RouteHub;

    fn local_registration(channel_type: ChannelType) -> Registration {
        let hub = Arc::new(RouteHub::new());
        let adapter = Arc::new(LocalAdapter::new(channel_type, hub));
        Registration {
            descriptor: LocalAdapter::descriptor(channel_type),
            sender: adapter.clone(),
            stream_sender: Some(adapter),
            inbound: None,
            directory: None,
        }
    }

    #[test]
    fn register_and_lookup() {
        let registry = RegistryBuilder::new()
            .register(local_registration(ChannelType::Cli))
            .unwrap()
            .build();

        assert!(registry.lookup(ChannelType::Cli).is_some());
        assert!(registry.lookup(ChannelType::Discord).is_none());
        assert!(registry.sender(ChannelType::Cli).is_some());
        assert!(registry.stream_sender(ChannelType::Cli).is_some());
        assert!(registry.directory_adapter(ChannelType::Cli).is_none());
    }

    #[test]
    fn duplicate_registration_is_fatal() {
        let err = RegistryBuilder::new()
            .register(local_registration(ChannelType::Cli))
            .unwrap()
            .register(local_registration(ChannelType::Cli))
            .unwrap_err();
        assert_eq!(err.kind(), bh_domain::ErrorKind::Fatal);
    }

    #[test]
    fn normalize_on_unregistered_type_is_not_found() {
        let registry = RegistryBuilder::new().build();
        let err = registry
            .normalize_config(ChannelType::Telegram, &serde_json::json!({}))
            .unwrap_err();
        assert_eq!(err.kind(), bh_domain::ErrorKind::NotFound);
    }

    #[test]
    fn types_are_sorted_and_complete() {
        let registry = RegistryBuilder::new()
            .register(local_registration(ChannelType::Web))
            .unwrap()
            .register(local_registration(ChannelType::Cli))
            .unwrap()
            .build();
        assert_eq!(registry.types(), vec![ChannelType::Cli, ChannelType::Web]);
    }
}
