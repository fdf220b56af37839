use super::model::{Channel, Chat, Monitoring, Video};
use super::query::{query_results, SqlArg};
use super::StoreError;
use crate::config;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{info, instrument};

pub type Pool = SqlitePool;
pub type Result<T> = std::result::Result<T, StoreError>;

/// Open the connection pool with bounded open/idle connections and a bounded
/// connection lifetime.
pub async fn init_pool(settings: &config::Database) -> Result<Pool> {
    ensure_parent_dir(&settings.url);
    let options = SqliteConnectOptions::from_str(&settings.url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .idle_timeout(settings.idle_timeout())
        .max_lifetime(settings.max_lifetime())
        .connect_with(options)
        .await?;
    info!(
        max = settings.max_connections,
        min = settings.min_connections,
        "database pool ready"
    );
    Ok(pool)
}

/// For file-backed SQLite URLs, make sure the parent directory exists.
fn ensure_parent_dir(url: &str) {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return;
    };
    if rest.starts_with(":memory") {
        return;
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let path = rest.split_once('?').map_or(rest, |(p, _)| p);
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
}

/// Create every table that does not exist yet.
pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Register the chat, the channel and the link between them.
///
/// New chat rows always start as non-admin; `chat.admin` is not written.
/// Three independent idempotent inserts, no transaction: a failure part-way
/// leaves the earlier rows in place and retrying the whole call is safe.
#[instrument(skip_all, fields(chat_id = chat.id, channel_id = %channel.id))]
pub async fn subscribe(pool: &Pool, chat: &Chat, channel: &Channel) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO chats (id, admin) VALUES (?, ?)")
        .bind(chat.id)
        .bind(false)
        .execute(pool)
        .await?;
    sqlx::query("INSERT OR IGNORE INTO channels (id, title) VALUES (?, ?)")
        .bind(&channel.id)
        .bind(&channel.title)
        .execute(pool)
        .await?;
    sqlx::query("INSERT OR IGNORE INTO subscribers (chat_id, channel_id) VALUES (?, ?)")
        .bind(chat.id)
        .bind(&channel.id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove the link row only. Returns whether a row was deleted.
#[instrument(skip_all, fields(chat_id = chat_id, channel_id = %channel_id))]
pub async fn unsubscribe(pool: &Pool, chat_id: i64, channel_id: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM subscribers WHERE chat_id = ? AND channel_id = ?")
        .bind(chat_id)
        .bind(channel_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn count_subscribers(pool: &Pool, channel_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscribers WHERE channel_id = ?")
        .bind(channel_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn update_channel_title(pool: &Pool, channel_id: &str, title: &str) -> Result<()> {
    sqlx::query("UPDATE channels SET title = ? WHERE id = ?")
        .bind(title)
        .bind(channel_id)
        .execute(pool)
        .await?;
    Ok(())
}

fn map_chat(row: &SqliteRow) -> std::result::Result<Chat, sqlx::Error> {
    Ok(Chat {
        id: row.try_get("id")?,
        admin: row.try_get("admin")?,
    })
}

fn map_channel(row: &SqliteRow) -> std::result::Result<Channel, sqlx::Error> {
    Ok(Channel {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
    })
}

fn map_monitoring(row: &SqliteRow) -> std::result::Result<Monitoring, sqlx::Error> {
    Ok(Monitoring {
        video_id: row.try_get("video_id")?,
        chat_id: row.try_get("chat_id")?,
        message_id: row.try_get("message_id")?,
    })
}

fn map_video(row: &SqliteRow) -> std::result::Result<Video, sqlx::Error> {
    Ok(Video {
        id: row.try_get("id")?,
        completed: row.try_get("completed")?,
        title: row.try_get("title")?,
        start_time: row.try_get("start_time")?,
        channel_id: row.try_get("channel_id")?,
    })
}

/// Every chat subscribed to `channel_id`.
#[instrument(skip_all)]
pub async fn get_subscribed_chats_by_channel_id(pool: &Pool, channel_id: &str) -> Result<Vec<Chat>> {
    let mut results = Vec::new();
    query_results(
        pool,
        &mut results,
        map_chat,
        "SELECT chats.id, chats.admin FROM chats \
         INNER JOIN subscribers ON chats.id = subscribers.chat_id \
         WHERE subscribers.channel_id = ?",
        &[SqlArg::Text(channel_id)],
    )
    .await?;
    Ok(results)
}

/// Every known channel, subscribed or not.
#[instrument(skip_all)]
pub async fn get_subscribed_channels(pool: &Pool) -> Result<Vec<Channel>> {
    let mut results = Vec::new();
    query_results(pool, &mut results, map_channel, "SELECT id, title FROM channels", &[]).await?;
    Ok(results)
}

/// Every channel `chat_id` is subscribed to.
#[instrument(skip_all)]
pub async fn get_subscribed_channels_by_chat_id(pool: &Pool, chat_id: i64) -> Result<Vec<Channel>> {
    let mut results = Vec::new();
    query_results(
        pool,
        &mut results,
        map_channel,
        "SELECT channels.id, channels.title FROM channels \
         INNER JOIN subscribers ON channels.id = subscribers.channel_id \
         WHERE subscribers.chat_id = ?",
        &[SqlArg::Int(chat_id)],
    )
    .await?;
    Ok(results)
}

/// Every (chat, message) pair currently tracking `video_id`.
#[instrument(skip_all)]
pub async fn get_monitoring_messages_by_video_id(
    pool: &Pool,
    video_id: &str,
) -> Result<Vec<Monitoring>> {
    let mut results = Vec::new();
    query_results(
        pool,
        &mut results,
        map_monitoring,
        "SELECT video_id, chat_id, message_id FROM monitoring WHERE video_id = ?",
        &[SqlArg::Text(video_id)],
    )
    .await?;
    Ok(results)
}

/// Record the message representing a video in a chat, replacing any earlier one.
#[instrument(skip_all)]
pub async fn upsert_monitoring(pool: &Pool, row: &Monitoring) -> Result<()> {
    sqlx::query(
        "INSERT INTO monitoring (video_id, chat_id, message_id) VALUES (?, ?, ?) \
         ON CONFLICT (video_id, chat_id) DO UPDATE SET message_id = excluded.message_id",
    )
    .bind(&row.video_id)
    .bind(row.chat_id)
    .bind(row.message_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn delete_monitoring(pool: &Pool, video_id: &str, chat_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM monitoring WHERE video_id = ? AND chat_id = ?")
        .bind(video_id)
        .bind(chat_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn upsert_video(pool: &Pool, video: &Video) -> Result<()> {
    sqlx::query(
        "INSERT INTO videos (id, completed, title, start_time, channel_id) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (id) DO UPDATE SET completed = excluded.completed, title = excluded.title, \
         start_time = excluded.start_time, channel_id = excluded.channel_id",
    )
    .bind(&video.id)
    .bind(video.completed)
    .bind(&video.title)
    .bind(video.start_time)
    .bind(&video.channel_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_video(pool: &Pool, video_id: &str) -> Result<Option<Video>> {
    let mut results = Vec::with_capacity(1);
    query_results(
        pool,
        &mut results,
        map_video,
        "SELECT id, completed, title, start_time, channel_id FROM videos WHERE id = ?",
        &[SqlArg::Text(video_id)],
    )
    .await?;
    Ok(results.pop())
}
