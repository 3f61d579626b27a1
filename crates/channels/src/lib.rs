//! Channel subsystem: the adapter registry, platform adapters, the local
//! route hub, and the cross-channel mirror.
//!
//! An adapter owns everything platform-specific — config shape, wire
//! protocol, length limits, edit throttling. The rest of the runtime sees
//! the capability traits in [`adapter`] and the frozen [`ChannelRegistry`].

pub mod adapter;
pub mod descriptor;
pub mod discord;
pub mod feishu;
pub mod hub;
pub mod local;
pub mod mirror;
pub mod registry;
pub mod sse;
pub mod telegram;
pub mod text;
pub(crate) mod wire;

pub use adapter::{
    Attachment, BufferedStream, DirectoryAdapter, DirectoryEntry, InboundEvent, InboundSource,
    OutboundMessage, OutboundStream, Sender, StreamOptions, StreamSender,
};
pub use descriptor::{Capabilities, ChannelType, ConfigMap, Descriptor};
pub use hub::{RouteHub, Subscription, HUB_BUFFER};
pub use mirror::{HubMirror, ObservedStream, StreamObserver};
pub use registry::{ChannelRegistry, RegistryBuilder};
