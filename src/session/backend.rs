//! Async backend: runs network work for the session loop.
//!
//! Uses an mpsc channel pair. The session sends `BackendCommand` values, and
//! a background tokio task executes each one in its own task and sends
//! `BackendResponse` values back. Results carry enough context (epoch,
//! nonce, message id) for the session to drop the ones that are stale.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::client::ApiClient;
use crate::api::{self, Directory, HistoryEntry};
use crate::composer::{codec, Outgoing};
use crate::models::{
    ConversationId, MessageBody, MessageId, PresenceStatus, ProfilePatch, SenderIdentity,
};
use crate::realtime::{Emit, RealtimeHandle};
use crate::reconciler::{Delivery, ProfileLookup};

/// Commands sent from the session loop to the backend.
pub enum BackendCommand {
    LoadHistory {
        conversation: ConversationId,
        epoch: u64,
    },
    LoadDirectory,
    FetchProfile(ProfileLookup),
    Send {
        conversation: ConversationId,
        nonce: Uuid,
        outgoing: Outgoing,
    },
    Edit {
        conversation: ConversationId,
        id: MessageId,
        body: MessageBody,
    },
    Delete {
        conversation: ConversationId,
        id: MessageId,
    },
    SetStatus(PresenceStatus),
}

/// What the server made of a send.
#[derive(Debug)]
pub struct SendReceipt {
    /// Known right away for direct messages; channel sends learn it from the echo.
    pub id: Option<MessageId>,
    /// Body as sent, with uploaded attachment URLs.
    pub body: MessageBody,
}

/// Responses from the backend to the session loop.
pub enum BackendResponse {
    History {
        epoch: u64,
        result: Result<Vec<HistoryEntry>>,
    },
    Directory(Directory),
    Profile {
        lookup: ProfileLookup,
        result: Result<ProfilePatch>,
    },
    Sent {
        nonce: Uuid,
        result: Result<SendReceipt>,
    },
    Edited {
        id: MessageId,
        result: Result<Delivery>,
    },
    Deleted {
        conversation: ConversationId,
        id: MessageId,
        result: Result<Delivery>,
    },
    StatusSet {
        status: PresenceStatus,
        result: Result<()>,
    },
}

/// Handle for interacting with the backend from the session side.
pub struct Backend {
    cmd_tx: mpsc::UnboundedSender<BackendCommand>,
    resp_rx: mpsc::UnboundedReceiver<BackendResponse>,
}

/// Shared by every command task.
struct Shared {
    client: ApiClient,
    realtime: RealtimeHandle,
    me: SenderIdentity,
}

impl Backend {
    /// Start the backend. Spawns a tokio task that processes commands.
    pub fn start(client: ApiClient, realtime: RealtimeHandle, me: SenderIdentity) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();

        let ctx = Arc::new(Shared {
            client,
            realtime,
            me,
        });
        tokio::spawn(backend_loop(ctx, cmd_rx, resp_tx));

        Self { cmd_tx, resp_rx }
    }

    /// Send a command to the backend (non-blocking).
    pub fn send(&self, cmd: BackendCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::error!("Backend channel closed -- command dropped");
        }
    }

    /// Receive a response from the backend.
    ///
    /// Returns `None` only when the backend channel is permanently closed.
    /// Designed to be used inside `tokio::select!`.
    pub async fn recv(&mut self) -> Option<BackendResponse> {
        self.resp_rx.recv().await
    }
}

/// Background loop that processes commands.
async fn backend_loop(
    ctx: Arc<Shared>,
    mut cmd_rx: mpsc::UnboundedReceiver<BackendCommand>,
    resp_tx: mpsc::UnboundedSender<BackendResponse>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        let ctx = Arc::clone(&ctx);
        let resp_tx = resp_tx.clone();

        // Spawn each command as a separate task so we don't block the loop.
        tokio::spawn(async move {
            let resp = match cmd {
                BackendCommand::LoadHistory {
                    conversation,
                    epoch,
                } => BackendResponse::History {
                    epoch,
                    result: api::fetch_history(&ctx.client, conversation, ctx.me.user_id).await,
                },
                BackendCommand::LoadDirectory => {
                    BackendResponse::Directory(api::fetch_directory(&ctx.client).await)
                }
                BackendCommand::FetchProfile(lookup) => BackendResponse::Profile {
                    lookup,
                    result: api::fetch_profile(&ctx.client, lookup.identity).await,
                },
                BackendCommand::Send {
                    conversation,
                    nonce,
                    outgoing,
                } => BackendResponse::Sent {
                    nonce,
                    result: send(&ctx, conversation, nonce, outgoing).await,
                },
                BackendCommand::Edit {
                    conversation,
                    id,
                    body,
                } => BackendResponse::Edited {
                    id,
                    result: edit(&ctx, conversation, id, &body).await,
                },
                BackendCommand::Delete { conversation, id } => BackendResponse::Deleted {
                    conversation,
                    id,
                    result: delete(&ctx, conversation, id).await,
                },
                BackendCommand::SetStatus(status) => BackendResponse::StatusSet {
                    status,
                    result: set_status(&ctx, status).await,
                },
            };
            let _ = resp_tx.send(resp);
        });
    }
}

fn local_user(ctx: &Shared) -> Result<u64> {
    ctx.me
        .user_id
        .context("No local user id configured")
}

async fn send(
    ctx: &Shared,
    conversation: ConversationId,
    nonce: Uuid,
    outgoing: Outgoing,
) -> Result<SendReceipt> {
    let attachments = api::upload_all(&ctx.client, &outgoing.files).await;
    if outgoing.text.is_empty() && attachments.is_empty() {
        anyhow::bail!("Nothing was sent: every upload failed");
    }
    // Consuming the outgoing message releases the file previews.
    let body = outgoing.into_body(attachments);
    let content = codec::encode(&body)?;

    match conversation {
        ConversationId::Channel(channel) => {
            ctx.realtime
                .emit(Emit::send_message(channel, &ctx.me, &content, nonce))?;
            Ok(SendReceipt { id: None, body })
        }
        ConversationId::Direct(key) => {
            let me = local_user(ctx)?;
            let peer = key
                .peer_of(me)
                .context("Not a participant of this conversation")?;
            let record = api::send_direct(&ctx.client, me, peer, &content).await?;
            let id = record.message_id.map(MessageId);
            if let Err(e) = ctx.realtime.emit(Emit::send_private_message(
                id,
                me,
                peer,
                &content,
                record.timestamp.as_deref(),
            )) {
                tracing::warn!("Could not relay direct message: {:#}", e);
            }
            Ok(SendReceipt { id, body })
        }
    }
}

async fn edit(
    ctx: &Shared,
    conversation: ConversationId,
    id: MessageId,
    body: &MessageBody,
) -> Result<Delivery> {
    let content = codec::encode(body)?;
    match conversation {
        ConversationId::Channel(channel) => {
            ctx.realtime
                .emit(Emit::edit_message(channel, id, &content))?;
            Ok(Delivery::AwaitingEvent)
        }
        ConversationId::Direct(_) => {
            api::edit_direct(&ctx.client, id, &content).await?;
            Ok(Delivery::Acknowledged)
        }
    }
}

/// Channel mutations have no reply; the broadcast event confirms them.
async fn delete(ctx: &Shared, conversation: ConversationId, id: MessageId) -> Result<Delivery> {
    match conversation {
        ConversationId::Channel(channel) => {
            ctx.realtime.emit(Emit::delete_message(channel, id))?;
            Ok(Delivery::AwaitingEvent)
        }
        ConversationId::Direct(_) => {
            api::delete_direct(&ctx.client, id).await?;
            Ok(Delivery::Acknowledged)
        }
    }
}

async fn set_status(ctx: &Shared, status: PresenceStatus) -> Result<()> {
    let me = local_user(ctx)?;
    api::update_status(&ctx.client, me, status).await?;
    if let Err(e) = ctx.realtime.emit(Emit::set_status(me, status)) {
        tracing::warn!("Could not broadcast status: {:#}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};
    use url::Url;

    fn start(me: SenderIdentity) -> (Backend, mpsc::UnboundedReceiver<Emit>) {
        let (realtime, emits) = RealtimeHandle::detached();
        // Nothing listens here; tests only take paths that stay off the network.
        let client = ApiClient::new(Url::parse("http://127.0.0.1:9").unwrap());
        (Backend::start(client, realtime, me), emits)
    }

    #[tokio::test]
    async fn test_channel_send_emits_with_nonce() {
        let (mut backend, mut emits) = start(SenderIdentity::unified(1));
        let nonce = Uuid::new_v4();
        backend.send(BackendCommand::Send {
            conversation: ConversationId::Channel(5),
            nonce,
            outgoing: Outgoing {
                text: "hello".into(),
                files: Vec::new(),
            },
        });

        match backend.recv().await.unwrap() {
            BackendResponse::Sent { nonce: sent, result } => {
                assert_eq!(sent, nonce);
                let receipt = assert_ok!(result);
                assert_eq!(receipt.id, None);
                assert_eq!(receipt.body.text, "hello");
            }
            _ => panic!("expected a send response"),
        }

        let emit = emits.recv().await.unwrap();
        assert_eq!(emit.name, "send_message");
        assert_eq!(emit.data["channel"], json!(5));
        assert_eq!(emit.data["user_ID"], json!(1));
        assert_eq!(emit.data["client_nonce"], json!(nonce));
    }

    #[tokio::test]
    async fn test_channel_edit_and_delete_emit() {
        let (mut backend, mut emits) = start(SenderIdentity::unified(1));
        backend.send(BackendCommand::Edit {
            conversation: ConversationId::Channel(5),
            id: MessageId(9),
            body: MessageBody::text("fixed"),
        });
        match backend.recv().await.unwrap() {
            BackendResponse::Edited { id, result } => {
                assert_eq!(id, MessageId(9));
                assert_eq!(assert_ok!(result), Delivery::AwaitingEvent);
            }
            _ => panic!("expected an edit response"),
        }
        let emit = emits.recv().await.unwrap();
        assert_eq!(emit.name, "edit_message");
        assert_eq!(emit.data["new_content"], json!("fixed"));

        backend.send(BackendCommand::Delete {
            conversation: ConversationId::Channel(5),
            id: MessageId(9),
        });
        match backend.recv().await.unwrap() {
            BackendResponse::Deleted {
                conversation,
                result,
                ..
            } => {
                assert_eq!(conversation, ConversationId::Channel(5));
                assert_eq!(assert_ok!(result), Delivery::AwaitingEvent);
            }
            _ => panic!("expected a delete response"),
        }
        assert_eq!(emits.recv().await.unwrap().name, "delete_message");
    }

    #[tokio::test]
    async fn test_status_needs_local_user() {
        let (mut backend, _emits) = start(SenderIdentity::student(30));
        backend.send(BackendCommand::SetStatus(PresenceStatus::Away));
        match backend.recv().await.unwrap() {
            BackendResponse::StatusSet { status, result } => {
                assert_eq!(status, PresenceStatus::Away);
                assert_err!(result);
            }
            _ => panic!("expected a status response"),
        }
    }
}
