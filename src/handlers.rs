use crate::db::Chat;
use crate::watchlist::Watchlist;
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use teloxide::prelude::*;
use tracing::{info, instrument, warn};

static CHANNEL_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^UC[0-9A-Za-z_-]{22}$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Start,
    Ping,
    Subscribe(String),
    Unsubscribe(String),
    List,
    Unknown,
}

/// Parse a slash command, dropping any `@botname` suffix. Non-commands yield None.
fn parse_command(text: &str) -> Option<Command> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed.split_whitespace();
    let head = parts.next().unwrap_or_default();
    let name = head.split('@').next().unwrap_or_default();
    let arg = parts.next().unwrap_or_default().to_string();
    Some(match name {
        "/start" => Command::Start,
        "/ping" => Command::Ping,
        "/subscribe" => Command::Subscribe(arg),
        "/unsubscribe" => Command::Unsubscribe(arg),
        "/list" => Command::List,
        _ => Command::Unknown,
    })
}

fn valid_channel_id(id: &str) -> bool {
    CHANNEL_ID.is_match(id)
}

#[instrument(skip_all)]
pub async fn handle_update(
    bot: &Bot,
    watchlist: &Watchlist,
    admins: &[i64],
    msg: &Message,
) -> Result<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let user_id = msg.from().map(|u| u.id.0 as i64);
    if let Some(reply) = reply_to(watchlist, admins, msg.chat.id.0, user_id, text).await? {
        bot.send_message(msg.chat.id, reply).await?;
    }
    Ok(())
}

/// Run a chat command and build the plain-text reply, if any.
async fn reply_to(
    watchlist: &Watchlist,
    admins: &[i64],
    chat_id: i64,
    user_id: Option<i64>,
    text: &str,
) -> Result<Option<String>> {
    let Some(command) = parse_command(text) else {
        return Ok(None);
    };
    let is_admin = user_id.is_some_and(|id| admins.contains(&id));
    let allowed = admins.is_empty() || is_admin;

    let reply = match command {
        Command::Start => {
            "Send /subscribe <channel id> to receive new uploads here.".to_string()
        }
        Command::Ping => "PONG".to_string(),
        Command::Subscribe(_) | Command::Unsubscribe(_) if !allowed => {
            "Only bot admins can change subscriptions.".to_string()
        }
        Command::Subscribe(channel_id) => {
            if !valid_channel_id(&channel_id) {
                "Usage: /subscribe <channel id>".to_string()
            } else {
                match watchlist.subscribe(Chat::new(chat_id), &channel_id).await {
                    Ok(()) => {
                        info!(chat_id, %channel_id, "chat subscribed");
                        format!("Subscribed to {channel_id}.")
                    }
                    Err(err) => {
                        warn!(?err, chat_id, %channel_id, "subscribe failed");
                        format!("Failed to subscribe to {channel_id}, please retry.")
                    }
                }
            }
        }
        Command::Unsubscribe(channel_id) => {
            if !valid_channel_id(&channel_id) {
                "Usage: /unsubscribe <channel id>".to_string()
            } else {
                match watchlist.unsubscribe(chat_id, &channel_id).await {
                    Ok(true) => format!("Unsubscribed from {channel_id}."),
                    Ok(false) => format!("Not subscribed to {channel_id}."),
                    Err(err) => {
                        warn!(?err, chat_id, %channel_id, "unsubscribe failed");
                        format!("Failed to unsubscribe from {channel_id}, please retry.")
                    }
                }
            }
        }
        Command::List => {
            let channels = watchlist.channels(chat_id).await?;
            if channels.is_empty() {
                "No subscriptions.".to_string()
            } else {
                let lines: Vec<String> = channels
                    .iter()
                    .map(|c| {
                        if c.title.is_empty() {
                            format!("- {}", c.id)
                        } else {
                            format!("- {} ({})", c.title, c.id)
                        }
                    })
                    .collect();
                format!("Subscribed channels:\n{}", lines.join("\n"))
            }
        }
        Command::Unknown => "Unknown command.".to_string(),
    };
    Ok(Some(reply))
}
