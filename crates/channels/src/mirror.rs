//! Cross-channel mirroring.
//!
//! An [`ObservedStream`] wraps any adapter stream and hands every pushed
//! event to its observers before the platform sees it. The stock observer,
//! [`HubMirror`], republishes into the local [`RouteHub`] stamped with the
//! source channel so CLI/Web subscribers watch turns running on external
//! platforms.

use std::sync::Arc;

use async_trait::async_trait;
use bh_domain::stream::StreamEvent;
use bh_domain::Result;

use crate::adapter::OutboundStream;
use crate::descriptor::ChannelType;
use crate::hub::RouteHub;

/// Sees every event an outbound stream pushes.
pub trait StreamObserver: Send + Sync {
    fn on_event(&self, source: ChannelType, event: &StreamEvent);
}

/// Mirrors events onto a hub route. The caller's event is cloned before
/// the `source_channel` stamp is added, so the original metadata is never
/// mutated.
pub struct HubMirror {
    hub: Arc<RouteHub>,
    route: String,
}

impl HubMirror {
    pub fn new(hub: Arc<RouteHub>, route: impl Into<String>) -> Self {
        Self {
            hub,
            route: route.into(),
        }
    }
}

impl StreamObserver for HubMirror {
    fn on_event(&self, source: ChannelType, event: &StreamEvent) {
        let stamped = event.with_metadata("source_channel", source.as_str().into());
        self.hub.publish_event(&self.route, stamped);
    }
}

/// An [`OutboundStream`] decorated with observers.
pub struct ObservedStream {
    inner: Box<dyn OutboundStream>,
    source: ChannelType,
    observers: Vec<Arc<dyn StreamObserver>>,
}

impl ObservedStream {
    pub fn new(
        inner: Box<dyn OutboundStream>,
        source: ChannelType,
        observers: Vec<Arc<dyn StreamObserver>>,
    ) -> Self {
        Self {
            inner,
            source,
            observers,
        }
    }
}

#[async_trait]
impl OutboundStream for ObservedStream {
    async fn push(&mut self, event: StreamEvent) -> Result<()> {
        for observer in &self.observers {
            observer.on_event(self.source, &event);
        }
        self.inner.push(event).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}
