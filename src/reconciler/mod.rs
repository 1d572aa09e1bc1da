//! Real-time reconciler for the open conversation.
//!
//! Owns the message list of the conversation being viewed and folds history
//! loads, socket events, profile lookups and local sends into it. Messages
//! for other conversations are handed to the notification store.
//!
//! Every message gets an arrival sequence number when it reaches the view;
//! the list is kept sorted by it, so a message parked while its sender's
//! profile is fetched still lands where it arrived. Each `open` bumps the
//! view epoch, and results tagged with an older epoch are dropped.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{ConversationId, Identity, Message, MessageBody, MessageId, ProfilePatch, SenderIdentity};
use crate::notifications::{NotificationEvent, NotificationStore};
use crate::presence::UserDirectory;
use crate::realtime::{EventScope, RealtimeEvent};

/// How long a jumped-to message stays highlighted by default.
pub const DEFAULT_HIGHLIGHT: Duration = Duration::from_secs(2);

/// How long a socket edit waits for its broadcast before it is reverted.
pub const EDIT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

/// How far an edit or delete request got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Stored by the server (REST response).
    Acknowledged,
    /// Emitted on the socket; the broadcast event is the confirmation.
    AwaitingEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    /// No conversation open.
    Idle,
    /// History requested, not yet applied.
    Loading,
    Live,
}

/// What is waiting on a profile fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupTarget {
    /// Senders of a history load, shown under the placeholder meanwhile.
    History,
    /// A live message parked under its arrival seq.
    Parked(u64),
    /// An off-screen notification recorded under the placeholder name.
    Notification {
        conversation: ConversationId,
        message: Option<MessageId>,
    },
}

/// A profile fetch the session should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileLookup {
    /// View epoch; not checked for notification lookups.
    pub epoch: u64,
    pub target: LookupTarget,
    pub identity: Identity,
}

/// Network work requested by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    FetchProfile(ProfileLookup),
    /// Reload history of the open conversation.
    Reload {
        conversation: ConversationId,
        epoch: u64,
    },
}

/// What changed in the view since the last `take_changes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    /// The whole list was replaced and is ready to show.
    Reset,
    Inserted(u64),
    Updated(u64),
    Removed(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpOutcome {
    Highlighted,
    /// Applied once the message is loaded.
    Deferred,
    /// The target conversation is not the open one.
    NotOpen,
}

/// State of a message from before an unconfirmed local edit.
#[derive(Debug, Clone)]
struct EditSnapshot {
    body: MessageBody,
    edited: bool,
    /// Set once the edit went out on the socket.
    deadline: Option<Instant>,
}

pub struct ConversationView {
    conversation: ConversationId,
    epoch: u64,
    state: ViewState,
    messages: Vec<Message>,
    /// Messages waiting for a sender profile, keyed by arrival seq.
    awaiting_profile: BTreeMap<u64, Message>,
    next_seq: u64,
    reload_pending: bool,
    edit_snapshots: HashMap<MessageId, EditSnapshot>,
    scroll_target: Option<MessageId>,
    highlight: Option<(MessageId, Instant)>,
    pending_jump: Option<MessageId>,
    changes: Vec<ViewChange>,
}

impl ConversationView {
    fn new(conversation: ConversationId, epoch: u64) -> Self {
        Self {
            conversation,
            epoch,
            state: ViewState::Loading,
            messages: Vec::new(),
            awaiting_profile: BTreeMap::new(),
            next_seq: 0,
            reload_pending: false,
            edit_snapshots: HashMap::new(),
            scroll_target: None,
            highlight: None,
            pending_jump: None,
            changes: Vec::new(),
        }
    }

    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    /// Displayed messages in arrival order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == Some(id))
    }

    pub fn by_seq(&self, seq: u64) -> Option<&Message> {
        self.messages
            .binary_search_by_key(&seq, |m| m.seq)
            .ok()
            .map(|i| &self.messages[i])
    }

    pub fn scroll_target(&self) -> Option<MessageId> {
        self.scroll_target
    }

    /// Highlighted message, if the highlight has not expired at `now`.
    pub fn highlighted(&self, now: Instant) -> Option<MessageId> {
        self.highlight
            .filter(|(_, until)| now < *until)
            .map(|(id, _)| id)
    }

    fn bump(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn contains_id(&self, id: MessageId) -> bool {
        self.messages.iter().any(|m| m.id == Some(id))
            || self.awaiting_profile.values().any(|m| m.id == Some(id))
    }

    fn find_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        if let Some(pos) = self.messages.iter().position(|m| m.id == Some(id)) {
            return Some(&mut self.messages[pos]);
        }
        self.awaiting_profile
            .values_mut()
            .find(|m| m.id == Some(id))
    }

    fn insert(&mut self, message: Message, highlight_for: Duration, now: Instant) {
        let seq = message.seq;
        let id = message.id;
        let pos = self.messages.partition_point(|m| m.seq < seq);
        self.messages.insert(pos, message);
        self.changes.push(ViewChange::Inserted(seq));
        if id.is_some() && id == self.pending_jump {
            self.apply_jump(highlight_for, now);
        }
    }

    fn apply_jump(&mut self, highlight_for: Duration, now: Instant) -> bool {
        let Some(id) = self.pending_jump else {
            return false;
        };
        if self.message(id).is_none() {
            return false;
        }
        self.pending_jump = None;
        self.scroll_target = Some(id);
        self.highlight = Some((id, now + highlight_for));
        true
    }

    /// The unconfirmed local message an incoming echo refers to.
    fn local_echo_of(&mut self, echo: &Message) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| {
            m.id.is_none()
                && match echo.nonce {
                    Some(nonce) => m.nonce == Some(nonce),
                    None => m.sender.same_user(&echo.sender) && m.body.text == echo.body.text,
                }
        })
    }

    fn restore_edit(&mut self, id: MessageId) -> bool {
        let Some(snapshot) = self.edit_snapshots.remove(&id) else {
            return false;
        };
        match self.find_mut(id) {
            Some(message) if !message.deleted => {
                message.body = snapshot.body;
                message.edited = snapshot.edited;
                let seq = message.seq;
                self.changes.push(ViewChange::Updated(seq));
                true
            }
            _ => false,
        }
    }

    fn request_reload(&mut self) -> Option<Followup> {
        if self.reload_pending {
            return None;
        }
        self.reload_pending = true;
        Some(Followup::Reload {
            conversation: self.conversation,
            epoch: self.epoch,
        })
    }
}

pub struct Reconciler {
    me: SenderIdentity,
    view: Option<ConversationView>,
    next_epoch: u64,
    highlight_for: Duration,
}

impl Reconciler {
    pub fn new(me: SenderIdentity, highlight_for: Duration) -> Self {
        Self {
            me,
            view: None,
            next_epoch: 0,
            highlight_for,
        }
    }

    pub fn me(&self) -> &SenderIdentity {
        &self.me
    }

    pub fn view(&self) -> Option<&ConversationView> {
        self.view.as_ref()
    }

    pub fn state(&self) -> ViewState {
        self.view.as_ref().map_or(ViewState::Idle, |v| v.state)
    }

    /// Changes accumulated since the last call.
    pub fn take_changes(&mut self) -> Vec<ViewChange> {
        self.view
            .as_mut()
            .map(|v| std::mem::take(&mut v.changes))
            .unwrap_or_default()
    }

    /// Open a conversation, discarding the previous view. Returns the new
    /// epoch, which the history load must carry.
    pub fn open(&mut self, conversation: ConversationId, notifications: &mut NotificationStore) -> u64 {
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        self.view = Some(ConversationView::new(conversation, epoch));
        notifications.focus(conversation);
        tracing::debug!("Opened {} (epoch {})", conversation, epoch);
        epoch
    }

    pub fn close(&mut self, notifications: &mut NotificationStore) {
        if let Some(view) = self.view.take() {
            tracing::debug!("Closed {}", view.conversation);
            notifications.blur();
        }
    }

    /// Apply a history load.
    ///
    /// Messages that reached the view while loading and are not part of the
    /// history, along with unconfirmed local sends, are kept after it.
    /// Returns the profile lookups the history needs; empty when the load was
    /// stale and ignored. The list is shown right away, and rows of senders
    /// still being fetched are updated when their lookup completes.
    pub fn finish_loading(
        &mut self,
        epoch: u64,
        history: Vec<Message>,
        directory: &mut UserDirectory,
        now: Instant,
    ) -> Vec<Followup> {
        let highlight_for = self.highlight_for;
        let Some(view) = self.view.as_mut().filter(|v| v.epoch == epoch) else {
            tracing::debug!("Dropping stale history load (epoch {})", epoch);
            return Vec::new();
        };

        let history_ids: HashSet<MessageId> = history.iter().filter_map(|m| m.id).collect();
        let mut carried: Vec<Message> = view
            .messages
            .drain(..)
            .chain(std::mem::take(&mut view.awaiting_profile).into_values())
            .filter(|m| m.id.map_or(true, |id| !history_ids.contains(&id)))
            .collect();
        carried.sort_by_key(|m| m.seq);

        let mut seen = HashSet::new();
        let mut lookups = Vec::new();
        let mut wanted = HashSet::new();
        for mut message in history {
            if let Some(id) = message.id {
                if !seen.insert(id) {
                    continue;
                }
            }
            directory.observe(&message.sender);
            if let Some(identity) = directory.needs_lookup(&message.sender) {
                if wanted.insert(identity) {
                    lookups.push(Followup::FetchProfile(ProfileLookup {
                        epoch,
                        target: LookupTarget::History,
                        identity,
                    }));
                }
            }
            message.seq = view.bump();
            view.messages.push(message);
        }
        for mut message in carried {
            message.seq = view.bump();
            view.messages.push(message);
        }

        view.state = ViewState::Live;
        view.reload_pending = false;
        view.changes.clear();
        view.changes.push(ViewChange::Reset);

        if view.pending_jump.is_some() && !view.apply_jump(highlight_for, now) {
            if let Some(id) = view.pending_jump.take() {
                tracing::warn!("Message {} not found in {}", id, view.conversation);
            }
        }

        tracing::debug!(
            "{} live with {} messages",
            view.conversation,
            view.messages.len()
        );
        lookups
    }

    /// Leave the loading state without history (the load failed).
    pub fn loading_failed(&mut self, epoch: u64) {
        if let Some(view) = self.view.as_mut().filter(|v| v.epoch == epoch) {
            view.state = ViewState::Live;
            view.reload_pending = false;
            view.changes.push(ViewChange::Reset);
        }
    }

    /// Fold a real-time event into the view, the directory or the
    /// notification store.
    pub fn handle_event(
        &mut self,
        event: RealtimeEvent,
        directory: &mut UserDirectory,
        notifications: &mut NotificationStore,
        now: Instant,
    ) -> Option<Followup> {
        match event {
            RealtimeEvent::NewMessage { message, hints } => {
                self.on_new_message(message, hints, directory, notifications, now)
            }
            RealtimeEvent::MessageEdited {
                scope,
                id,
                body,
                edited,
            } => self.on_edit(scope, id, body, edited),
            RealtimeEvent::MessageDeleted { scope, id } => self.on_delete(scope, id),
            RealtimeEvent::PresenceChanged { user_id, status } => {
                directory.apply_presence_event(user_id, status);
                if self.me.user_id == Some(user_id) {
                    notifications.apply_local_status(status);
                }
                None
            }
            RealtimeEvent::AvatarChanged {
                user_id,
                avatar,
                status,
            } => {
                match (&avatar, status) {
                    (Some(url), _) => directory.apply_avatar_event(user_id, url, status),
                    (None, Some(status)) => directory.apply_presence_event(user_id, status),
                    (None, None) => {}
                }
                if let (Some(status), true) = (status, self.me.user_id == Some(user_id)) {
                    notifications.apply_local_status(status);
                }
                None
            }
        }
    }

    fn on_new_message(
        &mut self,
        mut message: Message,
        hints: ProfilePatch,
        directory: &mut UserDirectory,
        notifications: &mut NotificationStore,
        now: Instant,
    ) -> Option<Followup> {
        directory.note_sender(&message.sender, &hints);
        let from_me = message.sender.same_user(&self.me);
        let highlight_for = self.highlight_for;

        let view = match self.view.as_mut() {
            Some(view) if view.conversation == message.conversation => view,
            _ => {
                if from_me {
                    return None;
                }
                let profile = directory.resolve(&message.sender);
                let recorded = notifications.add_or_update_at(
                    NotificationEvent {
                        conversation_id: message.conversation,
                        message_id: message.id,
                        preview_text: message.body.preview(),
                        sender_name: profile.display_name,
                        avatar_url: profile.avatar,
                        timestamp: message.created_at,
                        sticky: message.conversation.is_direct(),
                    },
                    now,
                );
                let identity = directory.needs_lookup(&message.sender).filter(|_| recorded)?;
                return Some(Followup::FetchProfile(ProfileLookup {
                    epoch: 0,
                    target: LookupTarget::Notification {
                        conversation: message.conversation,
                        message: message.id,
                    },
                    identity,
                }));
            }
        };

        if let Some(id) = message.id {
            if view.contains_id(id) {
                tracing::debug!("Ignoring duplicate message {}", id);
                return None;
            }
        }

        if from_me {
            if let Some(local) = view.local_echo_of(&message) {
                local.id = message.id;
                local.created_at = message.created_at;
                local.body = message.body;
                let seq = local.seq;
                view.changes.push(ViewChange::Updated(seq));
                return None;
            }
        }

        message.seq = view.bump();
        if let Some(identity) = directory.needs_lookup(&message.sender) {
            let lookup = ProfileLookup {
                epoch: view.epoch,
                target: LookupTarget::Parked(message.seq),
                identity,
            };
            view.awaiting_profile.insert(message.seq, message);
            return Some(Followup::FetchProfile(lookup));
        }
        view.insert(message, highlight_for, now);
        None
    }

    fn on_edit(
        &mut self,
        scope: EventScope,
        id: MessageId,
        body: MessageBody,
        edited: bool,
    ) -> Option<Followup> {
        let view = self.view.as_mut().filter(|v| scope.matches(v.conversation))?;
        // The server's version supersedes any local edit in flight.
        view.edit_snapshots.remove(&id);
        let live = view.state == ViewState::Live;
        match view.find_mut(id) {
            Some(message) => {
                if message.apply_edit(body, edited) {
                    let seq = message.seq;
                    view.changes.push(ViewChange::Updated(seq));
                } else {
                    tracing::debug!("Ignoring edit of deleted message {}", id);
                }
                None
            }
            None if live => view.request_reload(),
            None => None,
        }
    }

    fn on_delete(&mut self, scope: EventScope, id: MessageId) -> Option<Followup> {
        let view = self.view.as_mut().filter(|v| scope.matches(v.conversation))?;
        view.edit_snapshots.remove(&id);
        let live = view.state == ViewState::Live;
        match view.find_mut(id) {
            Some(message) => {
                if !message.deleted {
                    message.soft_delete();
                    let seq = message.seq;
                    view.changes.push(ViewChange::Updated(seq));
                }
                None
            }
            None if live => view.request_reload(),
            None => None,
        }
    }

    /// Apply a finished profile lookup. `patch` is `None` when the fetch
    /// failed; a parked message is shown anyway under the placeholder name.
    pub fn complete_lookup(
        &mut self,
        lookup: ProfileLookup,
        patch: Option<ProfilePatch>,
        directory: &mut UserDirectory,
        notifications: &mut NotificationStore,
        now: Instant,
    ) -> bool {
        if let Some(patch) = &patch {
            directory.merge(lookup.identity, patch);
        }

        if let LookupTarget::Notification {
            conversation,
            message,
        } = lookup.target
        {
            let profile = directory.resolve(&SenderIdentity::from(lookup.identity));
            return profile.known
                && notifications.resolve_sender(
                    conversation,
                    message,
                    &profile.display_name,
                    profile.avatar.as_deref(),
                );
        }

        let highlight_for = self.highlight_for;
        let Some(view) = self.view.as_mut().filter(|v| v.epoch == lookup.epoch) else {
            tracing::debug!("Dropping stale lookup for {}", lookup.identity);
            return false;
        };

        match lookup.target {
            LookupTarget::Parked(seq) => match view.awaiting_profile.remove(&seq) {
                Some(message) => {
                    view.insert(message, highlight_for, now);
                    true
                }
                None => false,
            },
            LookupTarget::History => {
                if patch.is_some() {
                    let renamed: Vec<u64> = view
                        .messages
                        .iter()
                        .filter(|m| m.sender.identities().contains(&lookup.identity))
                        .map(|m| m.seq)
                        .collect();
                    view.changes
                        .extend(renamed.into_iter().map(ViewChange::Updated));
                }
                true
            }
            LookupTarget::Notification { .. } => false,
        }
    }

    /// Show a locally composed message before the server confirms it.
    /// Returns its client nonce, or `None` when no conversation is open.
    pub fn push_local(&mut self, body: MessageBody, now: DateTime<Utc>) -> Option<Uuid> {
        let highlight_for = self.highlight_for;
        let sender = self.me;
        let view = self.view.as_mut()?;
        let nonce = Uuid::new_v4();
        let message = Message {
            id: None,
            nonce: Some(nonce),
            conversation: view.conversation,
            sender,
            body,
            created_at: now,
            edited: false,
            deleted: false,
            seq: view.bump(),
        };
        view.insert(message, highlight_for, Instant::now());
        Some(nonce)
    }

    /// The server stored a local send under `id`. `body` replaces the local
    /// copy when given (attachments now carry their uploaded URLs).
    pub fn confirm_local(&mut self, nonce: Uuid, id: MessageId, body: Option<MessageBody>) -> bool {
        let Some(view) = self.view.as_mut() else {
            return false;
        };
        let Some(pos) = view
            .messages
            .iter()
            .position(|m| m.nonce == Some(nonce) && m.id.is_none())
        else {
            return false;
        };

        if view.contains_id(id) {
            // The echo got here first and was shown on its own.
            let removed = view.messages.remove(pos);
            view.changes.push(ViewChange::Removed(removed.seq));
            return true;
        }

        let message = &mut view.messages[pos];
        message.id = Some(id);
        if let Some(body) = body {
            message.body = body;
        }
        view.changes.push(ViewChange::Updated(message.seq));
        true
    }

    /// Replace the body of a local send that is still unconfirmed.
    pub fn update_local(&mut self, nonce: Uuid, body: MessageBody) -> bool {
        let Some(view) = self.view.as_mut() else {
            return false;
        };
        match view
            .messages
            .iter_mut()
            .find(|m| m.nonce == Some(nonce) && m.id.is_none())
        {
            Some(message) => {
                message.body = body;
                view.changes.push(ViewChange::Updated(message.seq));
                true
            }
            None => false,
        }
    }

    /// Drop the optimistic entry of a send that failed.
    pub fn fail_local(&mut self, nonce: Uuid) -> bool {
        let Some(view) = self.view.as_mut() else {
            return false;
        };
        match view
            .messages
            .iter()
            .position(|m| m.nonce == Some(nonce) && m.id.is_none())
        {
            Some(pos) => {
                let removed = view.messages.remove(pos);
                view.changes.push(ViewChange::Removed(removed.seq));
                true
            }
            None => false,
        }
    }

    /// Apply a local edit optimistically. Returns false when the message is
    /// not loaded or is deleted.
    pub fn begin_edit(&mut self, id: MessageId, body: MessageBody) -> bool {
        let Some(view) = self.view.as_mut() else {
            return false;
        };
        let Some(pos) = view.messages.iter().position(|m| m.id == Some(id)) else {
            return false;
        };
        let message = &mut view.messages[pos];
        if message.deleted {
            return false;
        }
        view.edit_snapshots.entry(id).or_insert_with(|| EditSnapshot {
            body: message.body.clone(),
            edited: message.edited,
            deadline: None,
        });
        message.apply_edit(body, true);
        view.changes.push(ViewChange::Updated(message.seq));
        true
    }

    /// A local edit request went through. Socket edits stay revertible
    /// until their broadcast arrives or `EDIT_CONFIRM_TIMEOUT` passes.
    pub fn edit_sent(&mut self, id: MessageId, delivery: Delivery, now: Instant) {
        let Some(view) = self.view.as_mut() else {
            return;
        };
        match delivery {
            Delivery::Acknowledged => {
                view.edit_snapshots.remove(&id);
            }
            Delivery::AwaitingEvent => {
                if let Some(snapshot) = view.edit_snapshots.get_mut(&id) {
                    snapshot.deadline = Some(now + EDIT_CONFIRM_TIMEOUT);
                }
            }
        }
    }

    /// The server rejected a local edit: restore the previous body.
    pub fn rollback_edit(&mut self, id: MessageId) -> bool {
        self.view.as_mut().map_or(false, |v| v.restore_edit(id))
    }

    /// A local delete request went through. Socket deletes are applied by
    /// their broadcast event, not here.
    pub fn delete_sent(&mut self, conversation: ConversationId, id: MessageId, delivery: Delivery) -> bool {
        match delivery {
            Delivery::Acknowledged => self.apply_delete(conversation, id),
            Delivery::AwaitingEvent => false,
        }
    }

    /// Apply an acknowledged delete. Idempotent.
    pub fn apply_delete(&mut self, conversation: ConversationId, id: MessageId) -> bool {
        let Some(view) = self.view.as_mut().filter(|v| v.conversation == conversation) else {
            return false;
        };
        view.edit_snapshots.remove(&id);
        match view.find_mut(id) {
            Some(message) if !message.deleted => {
                message.soft_delete();
                let seq = message.seq;
                view.changes.push(ViewChange::Updated(seq));
                true
            }
            _ => false,
        }
    }

    /// Scroll to and highlight a message of the open conversation.
    pub fn jump_to(&mut self, conversation: ConversationId, id: MessageId, now: Instant) -> JumpOutcome {
        let highlight_for = self.highlight_for;
        let Some(view) = self.view.as_mut().filter(|v| v.conversation == conversation) else {
            return JumpOutcome::NotOpen;
        };
        view.pending_jump = Some(id);
        if view.state == ViewState::Live && view.apply_jump(highlight_for, now) {
            JumpOutcome::Highlighted
        } else {
            JumpOutcome::Deferred
        }
    }

    /// Expire the highlight and revert socket edits nobody confirmed.
    /// Returns true if anything changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(view) = self.view.as_mut() else {
            return false;
        };
        let mut changed = false;
        if matches!(view.highlight, Some((_, until)) if now >= until) {
            view.highlight = None;
            changed = true;
        }

        let expired: Vec<MessageId> = view
            .edit_snapshots
            .iter()
            .filter(|(_, s)| s.deadline.map_or(false, |d| now >= d))
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            tracing::warn!("Edit of #{} was not confirmed; reverting", id);
            changed |= view.restore_edit(id);
        }
        changed
    }
}
