//! Message records as the backend serializes them.
//!
//! History responses and real-time payloads use the same loosely typed
//! shape: ids may arrive as numbers or strings, flags as booleans or 0/1,
//! and several fields have more than one spelling.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de;
use serde::Deserialize;

use super::{ConversationId, Message, MessageId, ProfilePatch, SenderIdentity};
use crate::composer::codec;

fn opt_u64<'de, D: de::Deserializer<'de>>(d: D) -> std::result::Result<Option<u64>, D::Error> {
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<u64>;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("u64, stringified u64 or null")
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v))
        }
        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
            u64::try_from(v).map(Some).map_err(E::custom)
        }
        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
            if v.is_empty() {
                return Ok(None);
            }
            v.parse().map(Some).map_err(E::custom)
        }
        fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }
    }
    d.deserialize_any(Visitor)
}

fn flex_bool<'de, D: de::Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = bool;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("bool, 0/1 or null")
        }
        fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<bool, E> {
            Ok(v)
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<bool, E> {
            Ok(v != 0)
        }
        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<bool, E> {
            Ok(v != 0)
        }
        fn visit_unit<E: de::Error>(self) -> std::result::Result<bool, E> {
            Ok(false)
        }
        fn visit_none<E: de::Error>(self) -> std::result::Result<bool, E> {
            Ok(false)
        }
    }
    d.deserialize_any(Visitor)
}

/// One message as sent by the backend (history row or real-time payload).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageRecord {
    #[serde(default, rename = "message_ID", deserialize_with = "opt_u64")]
    pub message_id: Option<u64>,
    #[serde(default, alias = "channel_ID", alias = "channelId", deserialize_with = "opt_u64")]
    pub channel: Option<u64>,
    #[serde(default, rename = "sender_ID", alias = "sender_user_id", deserialize_with = "opt_u64")]
    pub sender_id: Option<u64>,
    #[serde(default, rename = "receiver_ID", alias = "receiver_user_id", deserialize_with = "opt_u64")]
    pub receiver_id: Option<u64>,
    #[serde(default, rename = "user_ID", deserialize_with = "opt_u64")]
    pub user_id: Option<u64>,
    #[serde(default, rename = "student_ID", deserialize_with = "opt_u64")]
    pub student_id: Option<u64>,
    #[serde(default, rename = "staff_ID", deserialize_with = "opt_u64")]
    pub staff_id: Option<u64>,
    #[serde(default, rename = "message_content", alias = "content")]
    pub content: Option<String>,
    #[serde(default, rename = "message_timestamp", alias = "timestamp")]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "flex_bool")]
    pub is_edited: bool,
    #[serde(default, deserialize_with = "flex_bool")]
    pub is_deleted: bool,
    #[serde(default, alias = "client_nonce")]
    pub nonce: Option<uuid::Uuid>,
    #[serde(default, alias = "sender_name")]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "avatar_url")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl MessageRecord {
    /// Conversation the record belongs to: a channel, or the sender/receiver pair.
    pub fn conversation(&self) -> Option<ConversationId> {
        if let Some(channel) = self.channel {
            return Some(ConversationId::Channel(channel));
        }
        match (self.sender_id, self.receiver_id) {
            (Some(a), Some(b)) => Some(ConversationId::direct(a, b)),
            _ => None,
        }
    }

    pub fn sender(&self) -> SenderIdentity {
        SenderIdentity {
            user_id: self.user_id.or(self.sender_id),
            student_id: self.student_id,
            staff_id: self.staff_id,
            is_staff: self.staff_id.is_some(),
        }
    }

    /// Profile fields the sender attached to the message.
    pub fn profile_hints(&self) -> ProfilePatch {
        ProfilePatch {
            name: self.name.clone(),
            username: self.username.clone(),
            avatar: self.avatar.clone(),
            status: self.status.as_deref().and_then(|s| s.parse().ok()),
        }
    }

    /// Decode into a view message. `fallback` is used when the record does
    /// not say which conversation it belongs to.
    pub fn into_message(self, fallback: Option<ConversationId>) -> Option<Message> {
        let conversation = self.conversation().or(fallback)?;
        let sender = self.sender();
        let mut message = Message {
            id: self.message_id.map(MessageId),
            nonce: self.nonce,
            conversation,
            sender,
            body: codec::decode(self.content.as_deref().unwrap_or_default()),
            created_at: self
                .timestamp
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
            edited: self.is_edited,
            deleted: false,
            seq: 0,
        };
        if self.is_deleted {
            message.soft_delete();
        }
        Some(message)
    }
}

/// Parse the timestamp formats the backend emits: RFC 3339, RFC 2822
/// (`Mon, 01 Jan 2024 10:00:00 GMT`), or a naive UTC datetime.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
