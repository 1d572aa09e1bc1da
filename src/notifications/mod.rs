//! Notification store: unread summaries per conversation, toasts and mute.
//!
//! All mutation goes through one reducer. Whenever the
//! persisted part of the state (items and mute flag) changes, a snapshot is
//! written to the [`StateStore`]. Hydration at construction does not write.

mod storage;

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthChar;

use crate::models::{ConversationId, MessageId, PresenceStatus};

pub use storage::{FileStore, StateStore};

#[cfg(test)]
pub use storage::MemoryStore;

/// Storage key of the persisted snapshot.
pub const STATE_KEY: &str = "notifications_state";

/// Display width previews are cut to.
const PREVIEW_WIDTH: usize = 80;

/// Unread summary for one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationItem {
    pub conversation_id: ConversationId,
    pub last_message_id: Option<MessageId>,
    pub preview_text: String,
    pub sender_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub unread_count: u32,
}

/// Transient popup for a message that arrived off-screen.
#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub id: String,
    pub conversation_id: ConversationId,
    pub message_id: Option<MessageId>,
    pub preview_text: String,
    pub sender_name: String,
    pub avatar_url: Option<String>,
    pub sticky: bool,
    pub expires_at: Instant,
}

/// A delivered message the user has not seen.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub conversation_id: ConversationId,
    pub message_id: Option<MessageId>,
    pub preview_text: String,
    pub sender_name: String,
    pub avatar_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub sticky: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteReason {
    Manual,
    /// Driven by the local user's presence status.
    Presence,
}

#[derive(Debug, Clone)]
pub struct ToastSettings {
    pub transient: Duration,
    pub sticky: Duration,
    pub max_visible: usize,
}

impl Default for ToastSettings {
    fn default() -> Self {
        Self {
            transient: Duration::from_secs(6),
            sticky: Duration::from_secs(15),
            max_visible: 3,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    items: Vec<NotificationItem>,
    #[serde(default)]
    muted: bool,
}

enum Action {
    AddOrUpdate(NotificationEvent, Instant),
    ClearConversation(ConversationId),
    MarkRead(ConversationId),
    DismissToast(String),
    ExpireToasts(Instant),
    SetMuted(bool),
    ResolveSender {
        conversation: ConversationId,
        message: Option<MessageId>,
        name: String,
        avatar: Option<String>,
    },
}

pub struct NotificationStore {
    items: Vec<NotificationItem>,
    toasts: Vec<Toast>,
    muted: bool,
    focused: Option<ConversationId>,
    /// Manual mute value remembered while do-not-disturb forces mute on.
    prior_manual_mute: Option<bool>,
    settings: ToastSettings,
    storage: Box<dyn StateStore + Send>,
}

impl NotificationStore {
    /// Build the store from its persisted snapshot.
    ///
    /// A missing or malformed snapshot yields an empty store. Nothing is
    /// written until the state first changes.
    pub fn open(storage: Box<dyn StateStore + Send>, settings: ToastSettings) -> Self {
        let snapshot = match storage.load() {
            Ok(Some(raw)) => serde_json::from_str::<Snapshot>(&raw).unwrap_or_else(|e| {
                tracing::warn!("Discarding malformed notification state: {}", e);
                Snapshot::default()
            }),
            Ok(None) => Snapshot::default(),
            Err(e) => {
                tracing::warn!("Could not load notification state: {:#}", e);
                Snapshot::default()
            }
        };

        tracing::debug!(
            "Hydrated {} notification(s), muted={}",
            snapshot.items.len(),
            snapshot.muted
        );

        Self {
            items: snapshot.items,
            toasts: Vec::new(),
            muted: snapshot.muted,
            focused: None,
            prior_manual_mute: None,
            settings,
            storage,
        }
    }

    pub fn items(&self) -> &[NotificationItem] {
        &self.items
    }

    pub fn item(&self, conversation: ConversationId) -> Option<&NotificationItem> {
        self.items
            .iter()
            .find(|n| n.conversation_id == conversation)
    }

    /// Items newest first, as listed in the notifications panel.
    pub fn items_by_recency(&self) -> Vec<&NotificationItem> {
        let mut items: Vec<&NotificationItem> = self.items.iter().collect();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        items
    }

    pub fn total_unread(&self) -> u32 {
        self.items.iter().map(|n| n.unread_count).sum()
    }

    pub fn toasts(&self) -> &[Toast] {
        &self.toasts
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn focused(&self) -> Option<ConversationId> {
        self.focused
    }

    /// Record an unseen message. Returns false if the conversation is focused
    /// (the user is looking at it, so nothing is recorded).
    pub fn add_or_update(&mut self, event: NotificationEvent) -> bool {
        self.add_or_update_at(event, Instant::now())
    }

    pub fn add_or_update_at(&mut self, event: NotificationEvent, now: Instant) -> bool {
        if self.focused == Some(event.conversation_id) {
            return false;
        }
        self.dispatch(Action::AddOrUpdate(event, now));
        true
    }

    pub fn clear_conversation(&mut self, conversation: ConversationId) {
        self.dispatch(Action::ClearConversation(conversation));
    }

    pub fn mark_read(&mut self, conversation: ConversationId) {
        self.dispatch(Action::MarkRead(conversation));
    }

    pub fn dismiss_toast(&mut self, id: &str) {
        self.dispatch(Action::DismissToast(id.to_string()));
    }

    pub fn expire_toasts(&mut self, now: Instant) {
        self.dispatch(Action::ExpireToasts(now));
    }

    /// Set the mute flag.
    ///
    /// While do-not-disturb holds mute on, a manual change only updates the
    /// value that is restored when the status changes back.
    pub fn set_muted(&mut self, muted: bool, reason: MuteReason) {
        if reason == MuteReason::Manual {
            if let Some(prior) = self.prior_manual_mute.as_mut() {
                tracing::info!("Mute held by do-not-disturb; will restore to {}", muted);
                *prior = muted;
                return;
            }
        }
        self.dispatch(Action::SetMuted(muted));
    }

    /// Follow the local user's presence: entering do-not-disturb forces mute
    /// on, leaving it restores the manual value from before.
    pub fn apply_local_status(&mut self, status: PresenceStatus) {
        let dnd = status == PresenceStatus::DoNotDisturb;
        match (dnd, self.prior_manual_mute) {
            (true, None) => {
                self.prior_manual_mute = Some(self.muted);
                self.set_muted(true, MuteReason::Presence);
            }
            (false, Some(prior)) => {
                self.prior_manual_mute = None;
                self.set_muted(prior, MuteReason::Presence);
            }
            _ => {}
        }
    }

    /// Fill in a sender resolved after the notification was recorded.
    ///
    /// Only the item whose latest message is still `message` is renamed,
    /// along with its toast. Returns true if anything changed.
    pub fn resolve_sender(
        &mut self,
        conversation: ConversationId,
        message: Option<MessageId>,
        name: &str,
        avatar: Option<&str>,
    ) -> bool {
        let before = (self.items.clone(), self.toasts.clone());
        self.dispatch(Action::ResolveSender {
            conversation,
            message,
            name: name.to_string(),
            avatar: avatar.map(str::to_string),
        });
        before.0 != self.items || before.1 != self.toasts
    }

    /// Mark a conversation as the one on screen; it is read from now on.
    pub fn focus(&mut self, conversation: ConversationId) {
        self.focused = Some(conversation);
        self.mark_read(conversation);
    }

    pub fn blur(&mut self) {
        self.focused = None;
    }

    fn dispatch(&mut self, action: Action) {
        let before = (self.items.clone(), self.muted);
        self.reduce(action);
        if before.0 != self.items || before.1 != self.muted {
            self.persist();
        }
    }

    fn reduce(&mut self, action: Action) {
        match action {
            Action::AddOrUpdate(event, now) => {
                let preview_text = truncate_preview(&event.preview_text, PREVIEW_WIDTH);
                match self
                    .items
                    .iter_mut()
                    .find(|n| n.conversation_id == event.conversation_id)
                {
                    Some(item) => {
                        item.last_message_id = event.message_id;
                        item.preview_text = preview_text.clone();
                        item.sender_name = event.sender_name.clone();
                        item.timestamp = event.timestamp;
                        if event.avatar_url.is_some() {
                            item.avatar_url = event.avatar_url.clone();
                        }
                        item.unread_count += 1;
                    }
                    None => self.items.push(NotificationItem {
                        conversation_id: event.conversation_id,
                        last_message_id: event.message_id,
                        preview_text: preview_text.clone(),
                        sender_name: event.sender_name.clone(),
                        avatar_url: event.avatar_url.clone(),
                        timestamp: event.timestamp,
                        unread_count: 1,
                    }),
                }

                if !self.muted {
                    self.push_toast(event, preview_text, now);
                }
            }
            Action::ClearConversation(id) => {
                self.items.retain(|n| n.conversation_id != id);
            }
            Action::MarkRead(id) => {
                if let Some(item) = self.items.iter_mut().find(|n| n.conversation_id == id) {
                    item.unread_count = 0;
                }
            }
            Action::DismissToast(id) => {
                self.toasts.retain(|t| t.id != id);
            }
            Action::ExpireToasts(now) => {
                self.toasts.retain(|t| t.expires_at > now);
            }
            Action::SetMuted(muted) => {
                self.muted = muted;
            }
            Action::ResolveSender {
                conversation,
                message,
                name,
                avatar,
            } => {
                if let Some(item) = self.items.iter_mut().find(|n| {
                    n.conversation_id == conversation && n.last_message_id == message
                }) {
                    item.sender_name = name.clone();
                    if avatar.is_some() {
                        item.avatar_url = avatar.clone();
                    }
                }
                for toast in self.toasts.iter_mut().filter(|t| {
                    t.conversation_id == conversation && t.message_id == message
                }) {
                    toast.sender_name = name.clone();
                    if avatar.is_some() {
                        toast.avatar_url = avatar.clone();
                    }
                }
            }
        }
    }

    fn push_toast(&mut self, event: NotificationEvent, preview_text: String, now: Instant) {
        let id = format!(
            "toast_{}_{}",
            event.conversation_id,
            event
                .message_id
                .map(|m| m.to_string())
                .unwrap_or_else(|| event.timestamp.timestamp_millis().to_string())
        );
        let ttl = if event.sticky {
            self.settings.sticky
        } else {
            self.settings.transient
        };

        self.toasts.retain(|t| t.id != id);
        self.toasts.push(Toast {
            id,
            conversation_id: event.conversation_id,
            message_id: event.message_id,
            preview_text,
            sender_name: event.sender_name,
            avatar_url: event.avatar_url,
            sticky: event.sticky,
            expires_at: now + ttl,
        });

        let excess = self
            .toasts
            .len()
            .saturating_sub(self.settings.max_visible.max(1));
        self.toasts.drain(..excess);
    }

    fn persist(&mut self) {
        let snapshot = Snapshot {
            items: self.items.clone(),
            muted: self.muted,
        };
        let result = serde_json::to_string(&snapshot)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.storage.save(&json));
        if let Err(e) = result {
            tracing::warn!("Failed to persist notification state: {:#}", e);
        }
    }
}

/// Cut `text` to at most `width` display columns, marking the cut with `…`.
pub fn truncate_preview(text: &str, width: usize) -> String {
    let text = text.trim();
    let mut used = 0;
    let mut out = String::new();
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > width {
            // Make room for the ellipsis.
            while used + 1 > width {
                match out.pop() {
                    Some(c) => used -= c.width().unwrap_or(0),
                    None => break,
                }
            }
            out.push('…');
            return out;
        }
        used += w;
        out.push(ch);
    }
    out
}
