//! Normalized event types shared between the connector and the dispatch core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat message normalized out of a platform-native record.
///
/// Produced by the translator for inbound traffic and handed to the dispatch
/// core, which owns it from then on. The dispatch core builds replies with
/// [`Message::reply`] and passes them back to the connector's `respond`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Locally assigned identifier, unique per event.
    pub event_id: Uuid,
    /// Message body.
    pub text: String,
    /// Sender display handle (platform username).
    pub user: String,
    /// Platform-side sender identifier, when the record carried one.
    pub user_id: Option<String>,
    /// Room or channel the message belongs to; replies go back here.
    pub target: String,
    /// Name of the connector instance that produced (or should send) the event.
    pub connector: String,
    /// Platform timestamp of the message.
    pub timestamp: DateTime<Utc>,
    /// Untouched platform record, for handlers that need extra fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_event: Option<serde_json::Value>,
}

impl Message {
    /// Build an outbound message addressed to `target` via `connector`.
    pub fn new(
        text: impl Into<String>,
        user: impl Into<String>,
        target: impl Into<String>,
        connector: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            text: text.into(),
            user: user.into(),
            user_id: None,
            target: target.into(),
            connector: connector.into(),
            timestamp: Utc::now(),
            raw_event: None,
        }
    }

    /// Build a reply to this message: same room, same connector, new text.
    pub fn reply(&self, text: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            text: text.into(),
            user: self.user.clone(),
            user_id: self.user_id.clone(),
            target: self.target.clone(),
            connector: self.connector.clone(),
            timestamp: Utc::now(),
            raw_event: None,
        }
    }
}
