//! Persisted entities. These are plain values copied across component
//! boundaries; business logic lives in higher layers.

use serde::{Deserialize, Serialize};

/// A publishing source, keyed by its external channel id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub title: String,
}

/// A chat receiving notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub admin: bool,
}

/// Which outbound message currently represents a video in a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitoring {
    pub video_id: String,
    pub chat_id: i64,
    pub message_id: i32,
}

/// Cached video metadata. Not authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub completed: bool,
    pub title: String,
    /// Unix epoch seconds.
    pub start_time: i64,
    pub channel_id: String,
}

impl Channel {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

impl Chat {
    pub fn new(id: i64) -> Self {
        Self { id, admin: false }
    }
}
