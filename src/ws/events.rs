//! Inbound channel events and the wire envelope.
//!
//! Every frame is a JSON envelope `{"event": "<kind>", "data": {...}}`. Frames are parsed here
//! into [`ChannelEvent`]; kinds this client does not know are logged and dropped, so a newer
//! server can add events without breaking older clients.

use std::str::FromStr as _;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::serde_as;
use strum_macros::{AsRefStr, Display, EnumString};

use super::traits::MessageParser;
use crate::Result;
use crate::serde_helpers::StringFromAny;

/// Names of the events a listener can subscribe to.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    NewMessage,
    MessageEdited,
    MessageDeleted,
    ReactionAdded,
    FileUploadProgress,
    ChatBlocked,
    ChatBlockedByOther,
    UserStatus,
}

impl EventKind {
    /// Every known kind, in wire-name order of declaration.
    pub const ALL: [Self; 8] = [
        Self::NewMessage,
        Self::MessageEdited,
        Self::MessageDeleted,
        Self::ReactionAdded,
        Self::FileUploadProgress,
        Self::ChatBlocked,
        Self::ChatBlockedByOther,
        Self::UserStatus,
    ];
}

/// A message posted to a chat the current user belongs to.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde_as(as = "Option<StringFromAny>")]
    pub message_id: Option<String>,
    #[serde_as(as = "Option<StringFromAny>")]
    pub chat_id: Option<String>,
    #[serde_as(as = "StringFromAny")]
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Text body; absent for attachment-only messages
    #[serde(default)]
    pub content: Option<String>,
}

#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEdited {
    #[serde_as(as = "StringFromAny")]
    pub message_id: String,
    #[serde_as(as = "Option<StringFromAny>")]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    #[serde_as(as = "StringFromAny")]
    pub message_id: String,
    #[serde_as(as = "Option<StringFromAny>")]
    pub chat_id: Option<String>,
}

#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionAdded {
    #[serde_as(as = "Option<StringFromAny>")]
    pub message_id: Option<String>,
    #[serde_as(as = "StringFromAny")]
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    pub emoji: String,
}

#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadProgress {
    #[serde_as(as = "StringFromAny")]
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    pub file_name: String,
    /// Percentage in `0..=100`
    pub progress: f64,
}

impl FileUploadProgress {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.progress >= 100.0
    }
}

/// Payload shared by `chat_blocked` and `chat_blocked_by_other`.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBlock {
    #[serde_as(as = "StringFromAny")]
    pub chat_id: String,
    #[serde_as(as = "Option<StringFromAny>")]
    pub blocked_by: Option<String>,
    #[serde(default)]
    pub blocker_name: Option<String>,
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
    Away,
    #[serde(other)]
    Unknown,
}

#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    #[serde_as(as = "StringFromAny")]
    pub user_id: String,
    pub status: Presence,
}

/// A validated inbound event.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    NewMessage(NewMessage),
    MessageEdited(MessageEdited),
    MessageDeleted(MessageDeleted),
    ReactionAdded(ReactionAdded),
    FileUploadProgress(FileUploadProgress),
    ChatBlocked(ChatBlock),
    ChatBlockedByOther(ChatBlock),
    UserStatus(UserStatus),
}

impl ChannelEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::MessageEdited(_) => EventKind::MessageEdited,
            Self::MessageDeleted(_) => EventKind::MessageDeleted,
            Self::ReactionAdded(_) => EventKind::ReactionAdded,
            Self::FileUploadProgress(_) => EventKind::FileUploadProgress,
            Self::ChatBlocked(_) => EventKind::ChatBlocked,
            Self::ChatBlockedByOther(_) => EventKind::ChatBlockedByOther,
            Self::UserStatus(_) => EventKind::UserStatus,
        }
    }

    /// Decode a known `kind` from its raw `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` does not match the payload shape for `kind`.
    pub fn from_parts(kind: EventKind, data: Value) -> Result<Self> {
        Ok(match kind {
            EventKind::NewMessage => Self::NewMessage(decode(data)?),
            EventKind::MessageEdited => Self::MessageEdited(decode(data)?),
            EventKind::MessageDeleted => Self::MessageDeleted(decode(data)?),
            EventKind::ReactionAdded => Self::ReactionAdded(decode(data)?),
            EventKind::FileUploadProgress => Self::FileUploadProgress(decode(data)?),
            EventKind::ChatBlocked => Self::ChatBlocked(decode(data)?),
            EventKind::ChatBlockedByOther => Self::ChatBlockedByOther(decode(data)?),
            EventKind::UserStatus => Self::UserStatus(decode(data)?),
        })
    }
}

// Required by the `MessageParser` bound. Decodes a full envelope.
impl<'de> Deserialize<'de> for ChannelEvent {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let envelope = Envelope::deserialize(deserializer)?;
        let kind = EventKind::from_str(&envelope.event).map_err(|_e| {
            serde::de::Error::custom(format!("unknown event kind `{}`", envelope.event))
        })?;
        Self::from_parts(kind, envelope.data).map_err(serde::de::Error::custom)
    }
}

fn decode<T: DeserializeOwned>(data: Value) -> Result<T> {
    Ok(serde_json::from_value(data)?)
}

/// Inbound wire envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Outbound wire envelope, see [`ChannelManager::emit`](super::ChannelManager::emit).
#[derive(Debug, Serialize)]
pub(crate) struct OutboundEvent<'payload, T: Serialize + ?Sized> {
    pub event: &'payload str,
    pub data: &'payload T,
}

/// Parses envelopes into [`ChannelEvent`]s, dropping unknown kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventParser;

impl MessageParser<ChannelEvent> for EventParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<ChannelEvent>> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        let Ok(kind) = EventKind::from_str(&envelope.event) else {
            #[cfg(feature = "tracing")]
            tracing::debug!(event = %envelope.event, "Dropping unknown channel event");
            return Ok(Vec::new());
        };

        Ok(vec![ChannelEvent::from_parts(kind, envelope.data)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(frame: &str) -> crate::Result<Vec<ChannelEvent>> {
        EventParser.parse(frame.as_bytes())
    }

    #[test]
    fn event_kinds_use_wire_names() {
        assert_eq!(EventKind::ChatBlockedByOther.to_string(), "chat_blocked_by_other");
        assert_eq!(EventKind::FileUploadProgress.as_ref(), "file_upload_progress");
        assert_eq!(
            EventKind::from_str("user_status").unwrap(),
            EventKind::UserStatus
        );
    }

    #[test]
    fn new_message_accepts_numeric_sender() {
        let events = parse(
            r#"{"event":"new_message","data":{"chatId":"c1","senderId":7,"senderName":"Ana","content":"hi"}}"#,
        )
        .unwrap();

        let [ChannelEvent::NewMessage(message)] = events.as_slice() else {
            panic!("unexpected events: {events:?}");
        };
        assert_eq!(message.sender_id, "7");
        assert_eq!(message.sender_name.as_deref(), Some("Ana"));
        assert_eq!(message.chat_id.as_deref(), Some("c1"));
    }

    #[test]
    fn unknown_kinds_are_dropped() {
        let events = parse(r#"{"event":"typing","data":{"userId":"u2"}}"#).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        parse(r#"{"event":"reaction_added","data":{"emoji":"+1"}}"#).unwrap_err();
        parse("not json").unwrap_err();
    }

    #[test]
    fn unrecognized_presence_maps_to_unknown() {
        let events =
            parse(r#"{"event":"user_status","data":{"userId":"u1","status":"busy"}}"#).unwrap();
        assert_eq!(
            events,
            vec![ChannelEvent::UserStatus(UserStatus {
                user_id: "u1".to_owned(),
                status: Presence::Unknown,
            })]
        );
    }

    #[test]
    fn upload_completes_at_one_hundred() {
        let events = parse(
            r#"{"event":"file_upload_progress","data":{"userId":"u1","fileName":"a.png","progress":100}}"#,
        )
        .unwrap();
        let [ChannelEvent::FileUploadProgress(upload)] = events.as_slice() else {
            panic!("unexpected events: {events:?}");
        };
        assert!(upload.is_complete());
    }

    #[test]
    fn channel_event_deserializes_from_envelope() {
        let event: ChannelEvent = serde_json::from_str(
            r#"{"event":"chat_blocked","data":{"chatId":"c9","blockedBy":"u3"}}"#,
        )
        .unwrap();
        assert_eq!(event.kind(), EventKind::ChatBlocked);
    }

    #[test]
    fn outbound_envelope_shape() {
        let frame = serde_json::to_value(OutboundEvent {
            event: "typing",
            data: &serde_json::json!({"chatId": "c1"}),
        })
        .unwrap();
        assert_eq!(
            frame,
            serde_json::json!({"event": "typing", "data": {"chatId": "c1"}})
        );
    }
}
