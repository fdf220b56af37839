//! Subscription management against a WebSub hub and the intake of its
//! content deliveries.
//!
//! [`HubClient`] owns a handle to a [`HubEngine`] (the protocol collaborator)
//! and exposes only subscribe/unsubscribe by channel id. Every lease it
//! creates routes deliveries to the same [`Intake`], which decodes the payload
//! and hands the entry to the [`Forwarder`].

use crate::feed;
use crate::forwarder::Forwarder;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub mod websub;

pub use websub::WebSubEngine;

/// Public hub the feeds are published through.
pub const HUB_URL: &str = "http://pubsubhubbub.appspot.com";

const TOPIC_URL_PREFIX: &str = "https://www.youtube.com/xml/feeds/videos.xml?channel_id=";

/// Topic URL of a channel's update feed.
pub fn topic_url(channel_id: &str) -> String {
    format!("{TOPIC_URL_PREFIX}{channel_id}")
}

/// Receiver of content deliveries for a lease.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn deliver(&self, content_type: &str, body: &[u8]);
}

/// Hub protocol collaborator: lease bookkeeping, verification and transport.
#[async_trait]
pub trait HubEngine: Send + Sync {
    /// Create or replace the lease for `topic_url`.
    async fn subscribe(
        &self,
        hub_url: &str,
        topic_url: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<()>;

    /// Cancel the lease for `topic_url`. Unknown topics are a no-op.
    async fn unsubscribe(&self, topic_url: &str) -> Result<()>;
}

/// Subscription manager for channel ids.
pub struct HubClient {
    engine: Arc<dyn HubEngine>,
    handler: Arc<Intake>,
}

impl HubClient {
    pub fn new(engine: Arc<dyn HubEngine>, handler: Intake) -> Self {
        Self {
            engine,
            handler: Arc::new(handler),
        }
    }

    /// Ask the hub for updates of `channel_id`, overriding any existing lease.
    #[instrument(skip(self))]
    pub async fn subscribe(&self, channel_id: &str) -> Result<()> {
        let topic = topic_url(channel_id);
        self.engine
            .subscribe(HUB_URL, &topic, self.handler.clone())
            .await?;
        info!(%topic, "hub subscription requested");
        Ok(())
    }

    /// Cancel the lease for `channel_id`, if any.
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, channel_id: &str) -> Result<()> {
        let topic = topic_url(channel_id);
        self.engine.unsubscribe(&topic).await?;
        info!(%topic, "hub unsubscription requested");
        Ok(())
    }
}

/// What to do with a delivery that fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedPolicy {
    /// Forward a zero-valued entry.
    Forward,
    /// Log and drop it.
    Drop,
}

impl MalformedPolicy {
    pub fn from_forward_flag(forward: bool) -> Self {
        if forward {
            MalformedPolicy::Forward
        } else {
            MalformedPolicy::Drop
        }
    }
}

/// Delivery handler decoding feeds and pushing entries downstream.
pub struct Intake {
    forwarder: Forwarder,
    policy: MalformedPolicy,
}

impl Intake {
    pub fn new(forwarder: Forwarder, policy: MalformedPolicy) -> Self {
        Self { forwarder, policy }
    }
}

#[async_trait]
impl DeliveryHandler for Intake {
    async fn deliver(&self, content_type: &str, body: &[u8]) {
        if !is_feed_content_type(content_type) {
            debug!(content_type, "unexpected content type for feed delivery");
        }

        let entry = match feed::decode(body) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(
                    ?err,
                    payload = %String::from_utf8_lossy(body),
                    "failed to decode hub delivery"
                );
                if self.policy == MalformedPolicy::Drop {
                    return;
                }
                feed::Entry::default()
            }
        };

        if let Err(err) = self.forwarder.send(entry).await {
            warn!(?err, "dropping hub delivery");
        }
    }
}

fn is_feed_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    matches!(
        mime.as_str(),
        "application/atom+xml" | "application/xml" | "text/xml"
    )
}
