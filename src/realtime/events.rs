//! Typed real-time events and outgoing emits

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use super::frame::{DEFAULT_NAMESPACE, DIRECT_NAMESPACE};
use crate::composer::codec;
use crate::models::{
    ConversationId, Message, MessageBody, MessageId, MessageRecord, PresenceStatus, ProfilePatch,
    SenderIdentity,
};

pub const RECEIVE_MESSAGE: &str = "receive_message";
pub const MESSAGE_UPDATED: &str = "message_updated";
pub const MESSAGE_DELETED: &str = "message_deleted";
pub const RECEIVE_PRIVATE_MESSAGE: &str = "receive_private_message";
pub const PRIVATE_MESSAGE_UPDATED: &str = "private_message_updated";
pub const PRIVATE_MESSAGE_DELETED: &str = "private_message_deleted";
pub const STATUS_CHANGED: &str = "status_changed";
pub const AVATAR_CHANGED: &str = "avatar_changed";

pub const SEND_MESSAGE: &str = "send_message";
pub const EDIT_MESSAGE: &str = "edit_message";
pub const DELETE_MESSAGE: &str = "delete_message";
pub const SEND_PRIVATE_MESSAGE: &str = "send_private_message";
pub const SET_STATUS: &str = "set_status";

/// Which conversations an edit or delete applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScope {
    Conversation(ConversationId),
    /// Direct-message mutation that did not name its pair.
    AnyDirect,
}

impl EventScope {
    pub fn matches(&self, conversation: ConversationId) -> bool {
        match self {
            Self::Conversation(c) => *c == conversation,
            Self::AnyDirect => conversation.is_direct(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    NewMessage {
        message: Message,
        hints: ProfilePatch,
    },
    MessageEdited {
        scope: EventScope,
        id: MessageId,
        body: MessageBody,
        edited: bool,
    },
    MessageDeleted {
        scope: EventScope,
        id: MessageId,
    },
    PresenceChanged {
        user_id: u64,
        status: PresenceStatus,
    },
    AvatarChanged {
        user_id: u64,
        avatar: Option<String>,
        status: Option<PresenceStatus>,
    },
}

#[derive(Deserialize)]
struct MutationPayload {
    #[serde(flatten)]
    record: MessageRecord,
    #[serde(default)]
    new_content: Option<String>,
}

#[derive(Deserialize)]
struct PresencePayload {
    #[serde(rename = "user_ID", alias = "user_id")]
    user_id: u64,
    #[serde(default)]
    status: Option<PresenceStatus>,
    #[serde(default, alias = "avatar_url", alias = "profile_picture")]
    avatar: Option<String>,
}

fn scope_of(record: &MessageRecord, direct: bool) -> Option<EventScope> {
    match record.conversation() {
        Some(c) => Some(EventScope::Conversation(c)),
        None if direct => Some(EventScope::AnyDirect),
        None => None,
    }
}

/// Parse a Socket.IO event into a typed event.
///
/// Returns `Ok(None)` for events this client does not handle.
pub fn parse_event(name: &str, data: Value) -> Result<Option<RealtimeEvent>> {
    let event = match name {
        RECEIVE_MESSAGE | RECEIVE_PRIVATE_MESSAGE => {
            let record: MessageRecord =
                serde_json::from_value(data).context("Malformed message payload")?;
            let hints = record.profile_hints();
            let message = record
                .into_message(None)
                .context("Message payload names no conversation")?;
            RealtimeEvent::NewMessage { message, hints }
        }
        MESSAGE_UPDATED | PRIVATE_MESSAGE_UPDATED => {
            let payload: MutationPayload =
                serde_json::from_value(data).context("Malformed edit payload")?;
            let id = payload.record.message_id.context("Edit without message id")?;
            let scope = scope_of(&payload.record, name == PRIVATE_MESSAGE_UPDATED)
                .context("Edit payload names no conversation")?;
            let content = payload
                .new_content
                .or(payload.record.content)
                .unwrap_or_default();
            RealtimeEvent::MessageEdited {
                scope,
                id: MessageId(id),
                body: codec::decode(&content),
                edited: payload.record.is_edited || name == MESSAGE_UPDATED,
            }
        }
        MESSAGE_DELETED | PRIVATE_MESSAGE_DELETED => {
            let record: MessageRecord =
                serde_json::from_value(data).context("Malformed delete payload")?;
            let id = record.message_id.context("Delete without message id")?;
            let scope = scope_of(&record, name == PRIVATE_MESSAGE_DELETED)
                .context("Delete payload names no conversation")?;
            RealtimeEvent::MessageDeleted {
                scope,
                id: MessageId(id),
            }
        }
        STATUS_CHANGED => {
            let payload: PresencePayload =
                serde_json::from_value(data).context("Malformed status payload")?;
            RealtimeEvent::PresenceChanged {
                user_id: payload.user_id,
                status: payload.status.context("Status event without status")?,
            }
        }
        AVATAR_CHANGED => {
            let payload: PresencePayload =
                serde_json::from_value(data).context("Malformed avatar payload")?;
            RealtimeEvent::AvatarChanged {
                user_id: payload.user_id,
                avatar: payload.avatar,
                status: payload.status,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// One outgoing Socket.IO emit.
#[derive(Debug, Clone, PartialEq)]
pub struct Emit {
    pub namespace: &'static str,
    pub name: &'static str,
    pub data: Value,
}

impl Emit {
    /// Channel message. `content` is the wire-encoded body.
    pub fn send_message(
        channel: u64,
        sender: &SenderIdentity,
        content: &str,
        nonce: uuid::Uuid,
    ) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE,
            name: SEND_MESSAGE,
            data: json!({
                "content": content,
                "channel": channel,
                "student_ID": sender.student_id,
                "staff_ID": sender.staff_id,
                "user_ID": sender.user_id,
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "client_nonce": nonce,
            }),
        }
    }

    pub fn edit_message(channel: u64, id: MessageId, content: &str) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE,
            name: EDIT_MESSAGE,
            data: json!({ "message_ID": id, "new_content": content, "channelId": channel }),
        }
    }

    pub fn delete_message(channel: u64, id: MessageId) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE,
            name: DELETE_MESSAGE,
            data: json!({ "message_ID": id, "channelId": channel }),
        }
    }

    /// Relay a stored direct message to the peer.
    pub fn send_private_message(
        id: Option<MessageId>,
        sender: u64,
        receiver: u64,
        content: &str,
        timestamp: Option<&str>,
    ) -> Self {
        Self {
            namespace: DIRECT_NAMESPACE,
            name: SEND_PRIVATE_MESSAGE,
            data: json!({
                "message_ID": id,
                "sender_ID": sender,
                "receiver_ID": receiver,
                "message_content": content,
                "message_timestamp": timestamp,
            }),
        }
    }

    pub fn set_status(user_id: u64, status: PresenceStatus) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE,
            name: SET_STATUS,
            data: json!({ "user_ID": user_id, "status": status }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttachmentKind;

    #[test]
    fn test_parse_channel_message() {
        let event = parse_event(
            RECEIVE_MESSAGE,
            json!({
                "message_ID": 12, "channel": 5, "student_ID": 7, "staff_ID": null,
                "content": "hello||file:image|/u/x.png|x.png", "username": "sam_lee",
                "timestamp": "2024-03-01T09:30:00Z"
            }),
        )
        .unwrap()
        .unwrap();
        match event {
            RealtimeEvent::NewMessage { message, hints } => {
                assert_eq!(message.conversation, ConversationId::Channel(5));
                assert_eq!(message.id, Some(MessageId(12)));
                assert_eq!(message.body.attachments[0].kind, AttachmentKind::Image);
                assert_eq!(hints.username.as_deref(), Some("sam_lee"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_private_message_uses_pair() {
        let event = parse_event(
            RECEIVE_PRIVATE_MESSAGE,
            json!({"message_ID": 3, "sender_user_id": 9, "receiver_user_id": 2, "message_content": "hi"}),
        )
        .unwrap()
        .unwrap();
        match event {
            RealtimeEvent::NewMessage { message, .. } => {
                assert_eq!(message.conversation, ConversationId::direct(2, 9));
                assert_eq!(message.sender.user_id, Some(9));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_edit_scopes() {
        let channel = parse_event(
            MESSAGE_UPDATED,
            json!({"message_ID": 4, "new_content": "fixed", "channelId": "5"}),
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            channel,
            RealtimeEvent::MessageEdited {
                scope: EventScope::Conversation(ConversationId::Channel(5)),
                id: MessageId(4),
                body: MessageBody::text("fixed"),
                edited: true,
            }
        );

        let direct = parse_event(
            PRIVATE_MESSAGE_UPDATED,
            json!({"message_ID": 4, "new_content": "x", "is_edited": true}),
        )
        .unwrap()
        .unwrap();
        match direct {
            RealtimeEvent::MessageEdited { scope, .. } => {
                assert_eq!(scope, EventScope::AnyDirect);
                assert!(scope.matches(ConversationId::direct(1, 2)));
                assert!(!scope.matches(ConversationId::Channel(1)));
            }
            other => panic!("unexpected {:?}", other),
        }

        // A channel edit must say which channel.
        assert!(parse_event(MESSAGE_UPDATED, json!({"message_ID": 4})).is_err());
    }

    #[test]
    fn test_parse_delete_and_presence() {
        assert_eq!(
            parse_event(MESSAGE_DELETED, json!({"message_ID": 8, "channel_ID": 5}))
                .unwrap()
                .unwrap(),
            RealtimeEvent::MessageDeleted {
                scope: EventScope::Conversation(ConversationId::Channel(5)),
                id: MessageId(8),
            }
        );
        assert_eq!(
            parse_event(STATUS_CHANGED, json!({"user_ID": 3, "status": "dnd"}))
                .unwrap()
                .unwrap(),
            RealtimeEvent::PresenceChanged {
                user_id: 3,
                status: PresenceStatus::DoNotDisturb,
            }
        );
    }

    #[test]
    fn test_unknown_event_ignored() {
        assert!(parse_event("group_formation_results", json!({}))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_emit_payloads() {
        let emit = Emit::set_status(3, PresenceStatus::Away);
        assert_eq!(emit.name, SET_STATUS);
        assert_eq!(emit.data, json!({"user_ID": 3, "status": "away"}));

        let emit = Emit::edit_message(5, MessageId(9), "new");
        assert_eq!(emit.data["channelId"], json!(5));
        assert_eq!(emit.data["message_ID"], json!(9));
    }
}
