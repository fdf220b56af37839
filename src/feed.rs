//! Decoding of hub content deliveries (Atom feed documents) into entries.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("payload is not an Atom feed")]
    NotAFeed,
    #[error("invalid timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        source: chrono::ParseError,
    },
}

/// One update item carried by a feed delivery.
///
/// `Default` is the zero value forwarded when a payload cannot be decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub video_id: String,
    pub channel_id: String,
    pub title: String,
    pub link: String,
    /// Display name of the publishing channel.
    pub author: String,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

impl Entry {
    /// Zero-valued entries carry nothing a consumer can act on.
    pub fn is_empty(&self) -> bool {
        self.video_id.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    VideoId,
    ChannelId,
    Title,
    AuthorName,
    Published,
    Updated,
}

/// Decode a feed document. A feed without an `<entry>` yields an empty entry.
pub fn decode(body: &[u8]) -> Result<Entry, DecodeError> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut entry = Entry::default();
    let mut seen_feed = false;
    let mut in_entry = false;
    let mut in_author = false;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"feed" => seen_feed = true,
                    b"entry" if seen_feed => in_entry = true,
                    b"author" if in_entry => in_author = true,
                    b"link" if in_entry => read_link(&e, &mut entry)?,
                    other if in_entry => field = entry_field(other, in_author),
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if in_entry && e.local_name().as_ref() == b"link" {
                    read_link(&e, &mut entry)?;
                }
            }
            Event::Text(t) => {
                if let Some(f) = field {
                    let text = t.unescape()?;
                    store_field(&mut entry, f, text.trim())?;
                }
            }
            Event::CData(t) => {
                if let Some(f) = field {
                    let text = String::from_utf8_lossy(&t);
                    store_field(&mut entry, f, text.trim())?;
                }
            }
            Event::End(e) => {
                field = None;
                match e.local_name().as_ref() {
                    b"author" => in_author = false,
                    // Deliveries carry a single entry.
                    b"entry" if in_entry => break,
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !seen_feed {
        return Err(DecodeError::NotAFeed);
    }
    Ok(entry)
}

fn entry_field(local_name: &[u8], in_author: bool) -> Option<Field> {
    match (local_name, in_author) {
        (b"name", true) => Some(Field::AuthorName),
        (_, true) => None,
        (b"videoId", _) => Some(Field::VideoId),
        (b"channelId", _) => Some(Field::ChannelId),
        (b"title", _) => Some(Field::Title),
        (b"published", _) => Some(Field::Published),
        (b"updated", _) => Some(Field::Updated),
        _ => None,
    }
}

fn store_field(entry: &mut Entry, field: Field, value: &str) -> Result<(), DecodeError> {
    match field {
        Field::VideoId => entry.video_id = value.to_string(),
        Field::ChannelId => entry.channel_id = value.to_string(),
        Field::Title => entry.title = value.to_string(),
        Field::AuthorName => entry.author = value.to_string(),
        Field::Published => entry.published = Some(parse_timestamp(value)?),
        Field::Updated => entry.updated = Some(parse_timestamp(value)?),
    }
    Ok(())
}

fn read_link(e: &BytesStart<'_>, entry: &mut Entry) -> Result<(), DecodeError> {
    let mut rel = None;
    let mut href = None;
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        match attr.key.local_name().as_ref() {
            b"rel" => rel = Some(attr.unescape_value()?.into_owned()),
            b"href" => href = Some(attr.unescape_value()?.into_owned()),
            _ => {}
        }
    }
    // A missing rel means "alternate".
    if matches!(rel.as_deref(), None | Some("alternate")) {
        if let Some(href) = href {
            entry.link = href;
        }
    }
    Ok(())
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|source| DecodeError::Timestamp {
            value: value.to_string(),
            source,
        })
}
