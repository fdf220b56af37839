//! Chat-level subscription operations spanning the row store and the hub.
//!
//! Hub leases are per channel while rows are per (chat, channel): a chat
//! leaving a channel deletes its link row, and the lease is cancelled only
//! once no chat is left on that channel.

use crate::db::{self, Channel, Chat, Pool};
use crate::hub::HubClient;
use anyhow::Result;
use tracing::{info, instrument, warn};

pub struct Watchlist {
    pool: Pool,
    hub: HubClient,
}

impl Watchlist {
    pub fn new(pool: Pool, hub: HubClient) -> Self {
        Self { pool, hub }
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &Pool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn subscribe(&self, chat: Chat, channel_id: &str) -> Result<()> {
        db::subscribe(&self.pool, &chat, &Channel::new(channel_id, "")).await?;
        self.hub.subscribe(channel_id).await?;
        Ok(())
    }

    /// Returns false when the chat was not subscribed.
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, chat_id: i64, channel_id: &str) -> Result<bool> {
        let removed = db::unsubscribe(&self.pool, chat_id, channel_id).await?;
        if db::count_subscribers(&self.pool, channel_id).await? == 0 {
            self.hub.unsubscribe(channel_id).await?;
        }
        Ok(removed)
    }

    pub async fn channels(&self, chat_id: i64) -> Result<Vec<Channel>> {
        Ok(db::get_subscribed_channels_by_chat_id(&self.pool, chat_id).await?)
    }

    /// Request a lease for every stored channel that still has subscribers.
    /// Returns how many requests the hub accepted.
    pub async fn resubscribe_all(&self) -> Result<usize> {
        let channels = db::get_subscribed_channels(&self.pool).await?;
        let mut accepted = 0;
        for channel in channels {
            if db::count_subscribers(&self.pool, &channel.id).await? == 0 {
                continue;
            }
            match self.hub.subscribe(&channel.id).await {
                Ok(()) => accepted += 1,
                Err(err) => warn!(?err, channel_id = %channel.id, "resubscribe failed"),
            }
        }
        info!(accepted, "resubscribed stored channels");
        Ok(accepted)
    }
}
