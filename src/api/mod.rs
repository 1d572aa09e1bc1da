//! API client module for the GroupTech backend
//!
//! The functions at this level are the one-shot CLI commands; the
//! submodules hold the requests themselves.

pub mod client;
mod messages;
mod users;

use std::path::PathBuf;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::composer::{codec, Composer, LocalFile, PreviewRegistry};
use crate::config::Config;
use crate::models::{ConversationId, Identity, MessageId, PresenceStatus, Route};
use crate::presence::{title_case_username, UserDirectory};
use crate::realtime::{self, socket, Emit};
use crate::session::render;
use client::ApiClient;

pub use messages::{
    delete_direct, edit_direct, fetch_history, send_direct, upload_all, HistoryEntry,
};
pub use users::{fetch_directory, fetch_profile, update_status, Directory};

fn resolve(config: &Config, route: Route) -> Result<(u64, ConversationId)> {
    let me = config.require_user_id()?;
    let conversation = route
        .resolve(Some(me))
        .context("Cannot resolve conversation")?;
    Ok((me, conversation))
}

/// Show the local user's profile
pub async fn whoami(config: &Config) -> Result<()> {
    let me = config.require_user_id()?;
    let client = ApiClient::from_config(config)?;
    let profile = fetch_profile(&client, Identity::Unified(me)).await?;

    println!();
    println!(
        "Name:         {}",
        profile
            .name
            .as_deref()
            .or(config.user.name.as_deref())
            .unwrap_or("(none)")
    );
    println!(
        "Username:     {}",
        profile.username.as_deref().unwrap_or("(none)")
    );
    println!(
        "Status:       {}",
        profile.status.map_or("(unknown)", |s| s.as_str())
    );
    println!("Avatar:       {}", profile.avatar.as_deref().unwrap_or("(none)"));
    println!("ID:           {}", me);
    if let (Some(role), Some(id)) = (config.user.role, config.user.role_id) {
        println!("Role:         {:?} {}", role, id);
    }
    Ok(())
}

/// List everyone in the unified directory
pub async fn list_users(config: &Config) -> Result<()> {
    let client = ApiClient::from_config(config)?;
    let directory = fetch_directory(&client).await;

    println!("\nUsers:");
    println!("{:-<60}", "");
    if directory.users.is_empty() {
        println!("  (no users found)");
    }
    for user in &directory.users {
        let name = user
            .profile
            .name
            .clone()
            .or_else(|| user.profile.username.as_deref().map(title_case_username))
            .unwrap_or_else(|| "(unnamed)".to_string());
        let status = user.profile.status.map_or("unknown", |s| s.as_str());
        println!("{:<30} {:<10} dm_{}", name, status, user.user_id);
    }
    Ok(())
}

/// Print the last `limit` messages of a conversation
pub async fn read_messages(config: &Config, route: Route, limit: usize) -> Result<()> {
    let (me, conversation) = resolve(config, route)?;
    let client = ApiClient::from_config(config)?;

    let (history, dir) = futures::join!(
        fetch_history(&client, conversation, Some(me)),
        fetch_directory(&client)
    );
    let history = history?;

    let mut directory = UserDirectory::new();
    directory.ingest_directory(&dir.users, &dir.students, &dir.staff);
    for entry in &history {
        directory.note_sender(&entry.message.sender, &entry.hints);
    }

    if history.is_empty() {
        println!("(no messages)");
        return Ok(());
    }
    let skip = history.len().saturating_sub(limit);
    for entry in &history[skip..] {
        println!("{}", render::format_message(&entry.message, &directory, false));
    }
    Ok(())
}

/// Send a message, uploading any attached files first
pub async fn send_message(
    config: &Config,
    route: Route,
    text: &str,
    files: &[PathBuf],
) -> Result<()> {
    let (me, conversation) = resolve(config, route)?;
    let client = ApiClient::from_config(config)?;

    let mut composer = Composer::new(PreviewRegistry::new());
    for path in files {
        composer.stage(LocalFile::from_path(path)?);
    }
    composer.text = text.to_string();
    let outgoing = composer.take()?;

    let attachments = upload_all(&client, &outgoing.files).await;
    anyhow::ensure!(
        attachments.len() == outgoing.files.len(),
        "{} of {} uploads failed; message not sent",
        outgoing.files.len() - attachments.len(),
        outgoing.files.len()
    );
    let body = outgoing.into_body(attachments);
    let content = codec::encode(&body)?;
    let url = socket::socket_url(&config.realtime_base()?, Some(me))?;

    match conversation {
        ConversationId::Channel(channel) => {
            let sender = config.sender_identity();
            let emit = Emit::send_message(channel, &sender, &content, Uuid::new_v4());
            realtime::emit_once(&url, emit).await?;
        }
        ConversationId::Direct(key) => {
            let peer = key
                .peer_of(me)
                .context("You are not a participant of this conversation")?;
            let record = send_direct(&client, me, peer, &content).await?;
            let emit = Emit::send_private_message(
                record.message_id.map(MessageId),
                me,
                peer,
                &content,
                record.timestamp.as_deref(),
            );
            if let Err(e) = realtime::emit_once(&url, emit).await {
                tracing::warn!("Stored, but could not notify the recipient: {:#}", e);
            }
        }
    }

    println!("Message sent.");
    Ok(())
}

/// Set the local user's status on the backend and broadcast it
pub async fn set_status(config: &Config, status: PresenceStatus) -> Result<()> {
    let me = config.require_user_id()?;
    let client = ApiClient::from_config(config)?;
    update_status(&client, me, status).await?;

    let url = socket::socket_url(&config.realtime_base()?, Some(me))?;
    if let Err(e) = realtime::emit_once(&url, Emit::set_status(me, status)).await {
        tracing::warn!("Status saved, but could not broadcast it: {:#}", e);
    }

    println!("Status set to: {}", status);
    Ok(())
}
