//! Plain-text formatting for the terminal session and one-shot commands.

use chrono::Local;

use crate::models::{ConversationId, Message};
use crate::notifications::{NotificationItem, Toast};
use crate::presence::UserDirectory;

/// `#5` for channels, `@Name` for direct conversations.
pub fn conversation_label(
    conversation: ConversationId,
    me: Option<u64>,
    directory: &UserDirectory,
) -> String {
    match conversation {
        ConversationId::Channel(id) => format!("#{}", id),
        ConversationId::Direct(key) => {
            let Some(peer) = me.and_then(|me| key.peer_of(me)) else {
                return conversation.to_string();
            };
            let profile = directory.resolve(&crate::models::SenderIdentity::unified(peer));
            if profile.known {
                format!("@{}", profile.display_name)
            } else {
                format!("@{}", peer)
            }
        }
    }
}

/// One message, plus one indented line per attachment.
pub fn format_message(message: &Message, directory: &UserDirectory, highlighted: bool) -> String {
    let sender = directory.resolve(&message.sender).display_name;
    let id = match message.id {
        Some(id) => format!("#{}", id),
        None => "sending".to_string(),
    };
    let time = message.created_at.with_timezone(&Local).format("%H:%M");
    let marker = if highlighted { ">> " } else { "" };

    let mut out = format!("{}[{} {}] {}: {}", marker, time, id, sender, message.body.text);
    if message.edited && !message.deleted {
        out.push_str(" (edited)");
    }
    for attachment in &message.body.attachments {
        let url = if attachment.url.is_empty() {
            "uploading..."
        } else {
            attachment.url.as_str()
        };
        out.push_str(&format!(
            "\n    [{}] {} {}",
            attachment.kind.as_str(),
            attachment.filename,
            url
        ));
    }
    out
}

pub fn format_toast(index: usize, toast: &Toast) -> String {
    format!(
        "[{}] {} in {}: {}{}",
        index,
        toast.sender_name,
        toast.conversation_id,
        toast.preview_text,
        if toast.sticky { " (pinned)" } else { "" }
    )
}

pub fn format_item(item: &NotificationItem) -> String {
    let time = item.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    let unread = if item.unread_count > 0 {
        format!(" ({} unread)", item.unread_count)
    } else {
        String::new()
    };
    format!(
        "{}{}\n  [{}] {}: {}",
        item.conversation_id, unread, time, item.sender_name, item.preview_text
    )
}
