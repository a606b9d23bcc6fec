//! Mapping between Rocket.Chat REST records and normalized [`Message`]s.
//!
//! Everything here is pure: no I/O, no clock reads except for the locally
//! assigned event id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Message;

/// A message record as returned by `channels.history` / `groups.history`.
///
/// Only the fields the connector maps are typed; the full record is kept in
/// [`RemoteMessage::raw`] and travels with the event.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteMessage {
    /// Message id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Room id.
    pub rid: String,
    /// Message text. Absent or null on some system messages.
    #[serde(default)]
    pub msg: Option<String>,
    /// Creation time.
    pub ts: DateTime<Utc>,
    /// Author.
    pub u: RemoteUser,
    /// Last server-side update.
    #[serde(rename = "_updatedAt", default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Edit time, if the message was edited.
    #[serde(rename = "editedAt", default)]
    pub edited_at: Option<DateTime<Utc>>,
    /// Editor, if the message was edited.
    #[serde(rename = "editedBy", default)]
    pub edited_by: Option<RemoteUser>,
    /// Users mentioned in the message.
    #[serde(default)]
    pub mentions: Option<Vec<RemoteUser>>,
    /// Attachment blobs, untyped.
    #[serde(default)]
    pub attachments: Option<Vec<serde_json::Value>>,
    /// Sender alias override.
    #[serde(default)]
    pub alias: Option<String>,
    /// The record exactly as received.
    #[serde(skip)]
    pub raw: serde_json::Value,
}

/// User reference embedded in message records.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteUser {
    /// User id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Login name.
    pub username: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
}

impl RemoteMessage {
    /// Decode one history record, keeping the original JSON alongside.
    ///
    /// # Errors
    ///
    /// Returns an error when a mapped field is missing or malformed.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut record: RemoteMessage = serde_json::from_value(value.clone())?;
        record.raw = value;
        Ok(record)
    }
}

/// Body of `chat.postMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    /// Room id or `#channel` name.
    pub channel: String,
    /// Message text.
    pub text: String,
    /// Display-name override for the bot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Normalize a history record.
pub fn to_event(record: &RemoteMessage, connector: &str) -> Message {
    Message {
        event_id: Uuid::new_v4(),
        text: record.msg.clone().unwrap_or_default(),
        user: record.u.username.clone(),
        user_id: Some(record.u.id.clone()),
        target: record.rid.clone(),
        connector: connector.to_owned(),
        timestamp: record.ts,
        raw_event: Some(record.raw.clone()),
    }
}

/// Build the `chat.postMessage` payload for an outbound event.
///
/// Events without a target go to `default_target`.
pub fn to_outbound(event: &Message, default_target: &str, alias: Option<&str>) -> OutboundMessage {
    let channel = if event.target.trim().is_empty() {
        default_target
    } else {
        event.target.as_str()
    };
    OutboundMessage {
        channel: channel.to_owned(),
        text: event.text.clone(),
        alias: alias.map(str::to_owned),
    }
}

/// Put a history page in chronological order.
///
/// Rocket.Chat returns history newest first; the sort is stable so records
/// sharing a timestamp keep their relative order.
pub fn chronological(mut records: Vec<RemoteMessage>) -> Vec<RemoteMessage> {
    records.sort_by_key(|r| r.ts);
    records
}
