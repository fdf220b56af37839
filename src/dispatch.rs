//! Downstream consumer: fans each entry out to the subscribed chats, editing
//! the message already tracking the video instead of posting a duplicate.

use crate::db::{self, Monitoring, Pool, Video};
use crate::feed::Entry;
use crate::forwarder::EntryReceiver;
use crate::markdown::{bold, escape, inline_link};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, error, info, instrument, warn};

/// Chat platform client.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Post `text` (MarkdownV2) and return the new message id.
    async fn send(&self, chat_id: i64, text: &str) -> Result<i32>;

    async fn edit(&self, chat_id: i64, message_id: i32, text: &str) -> Result<()>;
}

/// Outcome of dispatching one entry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub sent: usize,
    pub edited: usize,
    pub failed: usize,
}

pub fn render(entry: &Entry) -> String {
    let source = if entry.author.is_empty() {
        &entry.channel_id
    } else {
        &entry.author
    };
    let link = if entry.link.is_empty() {
        format!("https://www.youtube.com/watch?v={}", entry.video_id)
    } else {
        entry.link.clone()
    };
    format!(
        "{}\n{}",
        bold(&escape(source)),
        inline_link(&escape(&entry.title), &link)
    )
}

/// Consume entries until every producer is gone.
pub async fn run(pool: Pool, messenger: &dyn Messenger, mut entries: EntryReceiver) {
    while let Some(entry) = entries.recv().await {
        match handle_entry(&pool, messenger, &entry).await {
            Ok(outcome) => debug!(video_id = %entry.video_id, ?outcome, "entry dispatched"),
            Err(err) => error!(?err, video_id = %entry.video_id, "failed to dispatch entry"),
        }
    }
    info!("entry stream closed; dispatcher stopping");
}

#[instrument(skip_all, fields(video_id = %entry.video_id, channel_id = %entry.channel_id))]
pub async fn handle_entry(pool: &Pool, messenger: &dyn Messenger, entry: &Entry) -> Result<Dispatched> {
    if entry.is_empty() {
        debug!("skipping empty entry");
        return Ok(Dispatched::default());
    }

    db::upsert_video(
        pool,
        &Video {
            id: entry.video_id.clone(),
            completed: false,
            title: entry.title.clone(),
            start_time: entry.published.map(|t| t.timestamp()).unwrap_or_default(),
            channel_id: entry.channel_id.clone(),
        },
    )
    .await?;
    if !entry.author.is_empty() {
        db::update_channel_title(pool, &entry.channel_id, &entry.author).await?;
    }

    let chats = db::get_subscribed_chats_by_channel_id(pool, &entry.channel_id).await?;
    let tracked: HashMap<i64, i32> = db::get_monitoring_messages_by_video_id(pool, &entry.video_id)
        .await?
        .into_iter()
        .map(|m| (m.chat_id, m.message_id))
        .collect();

    let text = render(entry);
    let mut outcome = Dispatched::default();
    for chat in chats {
        if let Some(&message_id) = tracked.get(&chat.id) {
            match messenger.edit(chat.id, message_id, &text).await {
                Ok(()) => {
                    outcome.edited += 1;
                    continue;
                }
                Err(err) => {
                    // The tracked message is gone or uneditable; post a fresh one.
                    warn!(?err, chat_id = chat.id, message_id, "edit failed; reposting");
                    db::delete_monitoring(pool, &entry.video_id, chat.id).await?;
                }
            }
        }

        match messenger.send(chat.id, &text).await {
            Ok(message_id) => {
                db::upsert_monitoring(
                    pool,
                    &Monitoring {
                        video_id: entry.video_id.clone(),
                        chat_id: chat.id,
                        message_id,
                    },
                )
                .await?;
                outcome.sent += 1;
            }
            Err(err) => {
                warn!(?err, chat_id = chat.id, "failed to send notification");
                outcome.failed += 1;
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_escapes_and_links() {
        let entry = Entry {
            video_id: "abc".into(),
            channel_id: "UC1".into(),
            title: "Part 2.5!".into(),
            link: "https://www.youtube.com/watch?v=abc".into(),
            author: "My_Channel".into(),
            ..Default::default()
        };
        assert_eq!(
            render(&entry),
            "*My\\_Channel*\n[Part 2\\.5\\!](https://www.youtube.com/watch?v=abc)"
        );
    }

    #[test]
    fn render_falls_back_to_ids() {
        let entry = Entry {
            video_id: "xyz".into(),
            channel_id: "UCfallback".into(),
            title: "t".into(),
            ..Default::default()
        };
        assert_eq!(
            render(&entry),
            "*UCfallback*\n[t](https://www.youtube.com/watch?v=xyz)"
        );
    }
}
