//! Message-related models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ConversationId, SenderIdentity};

/// Text shown in place of a soft-deleted message.
pub const DELETED_PLACEHOLDER: &str = "[deleted]";

/// Server-assigned message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attachment kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Other,
}

impl AttachmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Other => "other",
        }
    }

    /// Classify by MIME type; anything under `image/` is an image.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else {
            Self::Other
        }
    }
}

/// Uploaded file referenced by a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub url: String,
    pub filename: String,
}

/// Structured message content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    /// One-line preview: the text, or a summary of the attachments.
    pub fn preview(&self) -> String {
        let text = self.text.trim();
        if !text.is_empty() {
            return text.lines().next().unwrap_or_default().to_string();
        }
        match self.attachments.as_slice() {
            [] => String::new(),
            [one] if one.kind == AttachmentKind::Image => "Sent an image".to_string(),
            [one] => format!("Sent {}", one.filename),
            many => format!("Sent {} attachments", many.len()),
        }
    }
}

/// A message in a conversation view.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Server id; `None` while a local send is unconfirmed.
    pub id: Option<MessageId>,
    /// Client nonce of a locally composed message.
    pub nonce: Option<Uuid>,
    pub conversation: ConversationId,
    pub sender: SenderIdentity,
    pub body: MessageBody,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
    pub deleted: bool,
    /// Arrival order within the view; insertion keeps the list sorted by it.
    pub seq: u64,
}

impl Message {
    /// Replace the content with the placeholder and mark deleted.
    ///
    /// Idempotent: a second call leaves the message unchanged.
    pub fn soft_delete(&mut self) {
        self.body = MessageBody::text(DELETED_PLACEHOLDER);
        self.deleted = true;
    }

    /// Apply an edit. Returns false (and changes nothing) for deleted messages.
    pub fn apply_edit(&mut self, body: MessageBody, edited: bool) -> bool {
        if self.deleted {
            return false;
        }
        self.body = body;
        self.edited = edited;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message {
            id: Some(MessageId(1)),
            nonce: None,
            conversation: ConversationId::Channel(5),
            sender: SenderIdentity::unified(1),
            body: MessageBody::text("hello"),
            created_at: Utc::now(),
            edited: false,
            deleted: false,
            seq: 0,
        }
    }

    #[test]
    fn test_soft_delete_idempotent() {
        let mut msg = sample();
        msg.soft_delete();
        let once = msg.clone();
        msg.soft_delete();
        assert_eq!(msg, once);
        assert!(msg.deleted);
        assert_eq!(msg.body.text, DELETED_PLACEHOLDER);
    }

    #[test]
    fn test_edit_after_delete_ignored() {
        let mut msg = sample();
        msg.soft_delete();
        assert!(!msg.apply_edit(MessageBody::text("back"), true));
        assert_eq!(msg.body.text, DELETED_PLACEHOLDER);
        assert!(!msg.edited);
    }

    #[test]
    fn test_preview() {
        assert_eq!(MessageBody::text("  hi\nthere").preview(), "hi");
        let body = MessageBody {
            text: String::new(),
            attachments: vec![Attachment {
                kind: AttachmentKind::Other,
                url: "/u/b.pdf".into(),
                filename: "b.pdf".into(),
            }],
        };
        assert_eq!(body.preview(), "Sent b.pdf");
    }
}
