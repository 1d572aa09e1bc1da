//! Message history, direct-message mutations and uploads

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;

use super::client::{file_part, ApiClient};
use crate::composer::StagedFile;
use crate::models::{
    Attachment, ConversationId, Message, MessageId, MessageRecord, ProfilePatch,
};

/// History row plus the profile fields it carried.
pub struct HistoryEntry {
    pub message: Message,
    pub hints: ProfilePatch,
}

/// Fetch the full history of a conversation, oldest first.
///
/// Direct history is requested from the point of view of `me`.
pub async fn fetch_history(
    client: &ApiClient,
    conversation: ConversationId,
    me: Option<u64>,
) -> Result<Vec<HistoryEntry>> {
    let path = match conversation {
        ConversationId::Channel(id) => format!("channels/{}/messages", id),
        ConversationId::Direct(key) => {
            let (low, high) = key.participants();
            let (user, target) = match me {
                Some(me) if me == high => (high, low),
                _ => (low, high),
            };
            format!(
                "private_messages?user_id={}&target_user_id={}",
                user, target
            )
        }
    };

    let records: Vec<MessageRecord> = client
        .get(&path)
        .await?
        .json()
        .await
        .context("Failed to parse message history")?;

    let mut entries: Vec<HistoryEntry> = records
        .into_iter()
        .filter_map(|record| {
            let hints = record.profile_hints();
            record
                .into_message(Some(conversation))
                .map(|message| HistoryEntry { message, hints })
        })
        .collect();
    entries.sort_by_key(|e| e.message.created_at);

    tracing::debug!("Loaded {} messages for {}", entries.len(), conversation);
    Ok(entries)
}

#[derive(Deserialize)]
struct UploadResponse {
    filepath: String,
}

/// Upload one staged file; returns the attachment pointing at the stored copy.
pub async fn upload(client: &ApiClient, file: &StagedFile) -> Result<Attachment> {
    let part = file_part(&file.path, &file.name, &file.mime).await?;
    let form = reqwest::multipart::Form::new().part("file", part);

    let resp: UploadResponse = client
        .post_form("uploads", form)
        .await?
        .json()
        .await
        .context("Failed to parse upload response")?;

    tracing::info!("Uploaded {} -> {}", file.name, resp.filepath);
    Ok(Attachment {
        kind: file.kind(),
        url: resp.filepath,
        filename: file.name.clone(),
    })
}

/// Upload every staged file in order. A failed upload is logged and skipped.
pub async fn upload_all(client: &ApiClient, files: &[StagedFile]) -> Vec<Attachment> {
    let mut uploaded = Vec::with_capacity(files.len());
    for file in files {
        match upload(client, file).await {
            Ok(attachment) => uploaded.push(attachment),
            Err(e) => tracing::warn!("Upload failed for {}: {:#}", file.name, e),
        }
    }
    uploaded
}

/// Persist a direct message. Returns the stored record (with its server id).
pub async fn send_direct(
    client: &ApiClient,
    sender: u64,
    receiver: u64,
    content: &str,
) -> Result<MessageRecord> {
    let form = reqwest::multipart::Form::new()
        .text("content", content.to_string())
        .text("sender_user_id", sender.to_string())
        .text("receiver_user_id", receiver.to_string());

    let mut record: MessageRecord = client
        .post_form("send_private_message", form)
        .await?
        .json()
        .await
        .context("Failed to parse send response")?;

    record.sender_id.get_or_insert(sender);
    record.receiver_id.get_or_insert(receiver);
    if record.content.is_none() {
        record.content = Some(content.to_string());
    }
    Ok(record)
}

pub async fn edit_direct(client: &ApiClient, id: MessageId, content: &str) -> Result<()> {
    client
        .patch(
            &format!("private_messages/{}", id),
            &json!({ "content": content }),
        )
        .await?;
    Ok(())
}

pub async fn delete_direct(client: &ApiClient, id: MessageId) -> Result<()> {
    client.delete(&format!("private_messages/{}", id)).await?;
    Ok(())
}
