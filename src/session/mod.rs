//! Interactive session
//!
//! A line-oriented client: one open conversation, live updates from the
//! real-time socket, toasts for everything else. The loop owns every piece
//! of client state and handles one input at a time; network work goes to
//! the backend and comes back as responses.

mod backend;
pub mod input;
pub mod render;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time;

use crate::api::client::ApiClient;
use crate::composer::{Composer, LocalFile, PreviewRegistry};
use crate::config::Config;
use crate::models::{
    Attachment, ConversationId, Identity, MessageBody, MessageId, ProfilePatch, Route,
};
use crate::notifications::{FileStore, MuteReason, NotificationStore, STATE_KEY};
use crate::presence::UserDirectory;
use crate::realtime::{self, socket, RealtimeEvent};
use crate::reconciler::{Followup, JumpOutcome, Reconciler, ViewChange};

use backend::{Backend, BackendCommand, BackendResponse};
use input::Input;

/// How often toasts and highlights are expired.
const TICK: Duration = Duration::from_millis(250);

/// Navigation requests, from user input or from a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Open a route, optionally scrolling to a message once loaded.
    Select {
        route: Route,
        message: Option<MessageId>,
    },
    /// Open a conversation at a message (notification click-through).
    Jump {
        conversation: ConversationId,
        message: MessageId,
    },
    Close,
}

struct Session {
    me: u64,
    directory: UserDirectory,
    notifications: NotificationStore,
    reconciler: Reconciler,
    composer: Composer,
    backend: Backend,
    commands: mpsc::UnboundedSender<Command>,
    /// Delete waiting for `/confirm`.
    pending_delete: Option<(ConversationId, MessageId)>,
    /// Epoch whose full history has been printed.
    shown_epoch: Option<u64>,
    /// Toasts already printed.
    announced: HashSet<String>,
    should_exit: bool,
}

/// Open the persisted notification state.
pub fn open_notifications(config: &Config) -> Result<NotificationStore> {
    let storage = FileStore::new(config.data_dir()?, STATE_KEY);
    Ok(NotificationStore::open(
        Box::new(storage),
        config.toast_settings(),
    ))
}

/// Run the interactive session until `/quit`, end of input or Ctrl-C.
pub async fn run(config: Config, initial: Option<Route>) -> Result<()> {
    let me = config.require_user_id()?;
    let client = ApiClient::from_config(&config)?;
    let notifications = open_notifications(&config)?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let url = socket::socket_url(&config.realtime_base()?, Some(me))?;
    let (realtime, realtime_task) = realtime::spawn(url, events_tx);

    let identity = config.sender_identity();
    let mut directory = UserDirectory::new();
    directory.observe(&identity);
    if let Some(name) = &config.user.name {
        directory.merge(
            Identity::Unified(me),
            &ProfilePatch {
                name: Some(name.clone()),
                ..ProfilePatch::default()
            },
        );
    }

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    let mut session = Session {
        me,
        directory,
        notifications,
        reconciler: Reconciler::new(identity, config.highlight()),
        composer: Composer::new(PreviewRegistry::new()),
        backend: Backend::start(client, realtime, identity),
        commands: cmd_tx,
        pending_delete: None,
        shown_epoch: None,
        announced: HashSet::new(),
        should_exit: false,
    };
    session.backend.send(BackendCommand::LoadDirectory);

    println!("Signed in as user {}. Type /help for commands.", me);
    let unread = session.notifications.total_unread();
    if unread > 0 {
        println!("{} unread message(s). /notifications to list them.", unread);
    }
    if let Some(route) = initial {
        session.navigate(Command::Select {
            route,
            message: None,
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = time::interval(TICK);

    while !session.should_exit {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => session.handle_line(&line),
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read input: {}", e);
                    break;
                }
            },
            Some(event) = events_rx.recv() => session.handle_event(event),
            Some(resp) = session.backend.recv() => session.handle_response(resp),
            Some(cmd) = cmd_rx.recv() => session.navigate(cmd),
            _ = ticker.tick() => session.tick(),
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
        }
        session.render();
    }

    session.reconciler.close(&mut session.notifications);
    realtime_task.abort();
    Ok(())
}

impl Session {
    fn handle_line(&mut self, line: &str) {
        match input::parse(line) {
            Ok(Some(input)) => self.handle_input(input),
            Ok(None) => {}
            Err(e) => println!("{}", e),
        }
    }

    fn handle_input(&mut self, input: Input) {
        match input {
            Input::Send(text) => self.send(text),
            Input::Open(route) => self.dispatch(Command::Select {
                route,
                message: None,
            }),
            Input::Jump(route, message) => self.dispatch(Command::Select {
                route,
                message: Some(message),
            }),
            Input::Close => self.dispatch(Command::Close),
            Input::Attach(path) => match LocalFile::from_path(&path) {
                Ok(file) => {
                    let name = file.name.clone();
                    if self.composer.stage(file) {
                        println!("Attached {}", name);
                    } else {
                        println!("{} is already attached", name);
                    }
                }
                Err(e) => println!("Cannot attach: {:#}", e),
            },
            Input::Unattach(n) => {
                if !self.composer.remove(n - 1) {
                    println!("No attachment {}", n);
                }
            }
            Input::Files => {
                if self.composer.staged().is_empty() {
                    println!("(no attachments)");
                }
                for (i, file) in self.composer.staged().iter().enumerate() {
                    println!(
                        "  {}. {} ({}, {} bytes){}",
                        i + 1,
                        file.name,
                        file.mime,
                        file.size,
                        if file.has_preview() { " [preview]" } else { "" }
                    );
                }
            }
            Input::Edit(id, text) => self.edit(id, text),
            Input::Delete(id) => self.request_delete(id),
            Input::Confirm => match self.pending_delete.take() {
                Some((conversation, id)) => {
                    self.backend
                        .send(BackendCommand::Delete { conversation, id });
                }
                None => println!("Nothing to confirm"),
            },
            Input::Cancel => {
                if self.pending_delete.take().is_some() {
                    println!("Delete cancelled");
                }
            }
            Input::Notifications => {
                let items = self.notifications.items_by_recency();
                if items.is_empty() {
                    println!("(no notifications)");
                }
                for item in items {
                    println!("{}", render::format_item(item));
                }
            }
            Input::Read(route) => {
                if let Some(conversation) = self.resolve(route) {
                    self.notifications.mark_read(conversation);
                }
            }
            Input::Clear(route) => {
                if let Some(conversation) = self.resolve(route) {
                    self.notifications.clear_conversation(conversation);
                }
            }
            Input::Toasts => {
                if self.notifications.toasts().is_empty() {
                    println!("(no toasts)");
                }
                for (i, toast) in self.notifications.toasts().iter().enumerate() {
                    println!("{}", render::format_toast(i + 1, toast));
                }
            }
            Input::OpenToast(n) => {
                let Some(toast) = self.notifications.toasts().get(n - 1).cloned() else {
                    println!("No toast {}", n);
                    return;
                };
                self.notifications.dismiss_toast(&toast.id);
                self.dispatch(match toast.message_id {
                    Some(message) => Command::Jump {
                        conversation: toast.conversation_id,
                        message,
                    },
                    None => Command::Select {
                        route: Route::Conversation(toast.conversation_id),
                        message: None,
                    },
                });
            }
            Input::Dismiss(n) => match self.notifications.toasts().get(n - 1) {
                Some(toast) => {
                    let id = toast.id.clone();
                    self.notifications.dismiss_toast(&id);
                }
                None => println!("No toast {}", n),
            },
            Input::Mute(muted) => {
                self.notifications.set_muted(muted, MuteReason::Manual);
                println!(
                    "Notifications {}",
                    if self.notifications.is_muted() { "muted" } else { "unmuted" }
                );
            }
            Input::Status(status) => self.backend.send(BackendCommand::SetStatus(status)),
            Input::Help => println!("{}", input::HELP),
            Input::Quit => self.should_exit = true,
        }
    }

    fn dispatch(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::error!("Command channel closed -- {:?} dropped", command);
        }
    }

    fn resolve(&self, route: Route) -> Option<ConversationId> {
        let conversation = route.resolve(Some(self.me));
        if conversation.is_none() {
            println!("Cannot resolve conversation");
        }
        conversation
    }

    fn open_conversation(&self) -> Option<ConversationId> {
        let conversation = self.reconciler.view().map(|v| v.conversation());
        if conversation.is_none() {
            println!("No conversation open. Use /open <route> first.");
        }
        conversation
    }

    fn label(&self, conversation: ConversationId) -> String {
        render::conversation_label(conversation, Some(self.me), &self.directory)
    }

    fn navigate(&mut self, command: Command) {
        let (conversation, message) = match command {
            Command::Close => {
                self.pending_delete = None;
                self.reconciler.close(&mut self.notifications);
                println!("Closed conversation");
                return;
            }
            Command::Jump {
                conversation,
                message,
            } => (conversation, Some(message)),
            Command::Select { route, message } => match self.resolve(route) {
                Some(conversation) => (conversation, message),
                None => return,
            },
        };

        let already_open = self
            .reconciler
            .view()
            .map_or(false, |v| v.conversation() == conversation);
        if !already_open {
            self.pending_delete = None;
            let epoch = self.reconciler.open(conversation, &mut self.notifications);
            println!("Opening {}...", self.label(conversation));
            self.backend.send(BackendCommand::LoadHistory {
                conversation,
                epoch,
            });
        }

        if let Some(id) = message {
            match self.reconciler.jump_to(conversation, id, Instant::now()) {
                JumpOutcome::Highlighted => self.show_jump(id),
                JumpOutcome::Deferred => tracing::debug!("Jump to {} waits for history", id),
                JumpOutcome::NotOpen => {}
            }
        }
    }

    fn show_jump(&self, id: MessageId) {
        let Some(view) = self.reconciler.view() else {
            return;
        };
        if let Some(message) = view.message(id) {
            println!(
                "{}",
                render::format_message(message, &self.directory, true)
            );
        }
    }

    fn send(&mut self, text: String) {
        let Some(conversation) = self.open_conversation() else {
            return;
        };
        self.composer.text = text;
        let outgoing = match self.composer.take() {
            Ok(outgoing) => outgoing,
            Err(e) => {
                println!("{}", e);
                return;
            }
        };

        // Attachments show as uploading until the server has them.
        let optimistic = MessageBody {
            text: outgoing.text.clone(),
            attachments: outgoing
                .files
                .iter()
                .map(|f| Attachment {
                    kind: f.kind(),
                    url: String::new(),
                    filename: f.name.clone(),
                })
                .collect(),
        };
        let Some(nonce) = self.reconciler.push_local(optimistic, Utc::now()) else {
            return;
        };
        self.backend.send(BackendCommand::Send {
            conversation,
            nonce,
            outgoing,
        });
    }

    fn own_message(&self, id: MessageId) -> Option<&crate::models::Message> {
        let message = self.reconciler.view()?.message(id);
        match message {
            None => println!("Message #{} is not loaded", id),
            Some(m) if m.deleted => println!("Message #{} is deleted", id),
            Some(m) if !m.sender.same_user(self.reconciler.me()) => {
                println!("Message #{} was not sent by you", id)
            }
            Some(m) => return Some(m),
        }
        None
    }

    fn edit(&mut self, id: MessageId, text: String) {
        let Some(conversation) = self.open_conversation() else {
            return;
        };
        let Some(message) = self.own_message(id) else {
            return;
        };
        let body = MessageBody {
            text,
            attachments: message.body.attachments.clone(),
        };
        if self.reconciler.begin_edit(id, body.clone()) {
            self.backend.send(BackendCommand::Edit {
                conversation,
                id,
                body,
            });
        }
    }

    fn request_delete(&mut self, id: MessageId) {
        let Some(conversation) = self.open_conversation() else {
            return;
        };
        if self.own_message(id).is_none() {
            return;
        }
        self.pending_delete = Some((conversation, id));
        println!("Delete message #{}? /confirm or /cancel", id);
    }

    fn handle_event(&mut self, event: RealtimeEvent) {
        let followup = self.reconciler.handle_event(
            event,
            &mut self.directory,
            &mut self.notifications,
            Instant::now(),
        );
        if let Some(followup) = followup {
            self.follow(followup);
        }
    }

    fn follow(&self, followup: Followup) {
        match followup {
            Followup::FetchProfile(lookup) => {
                self.backend.send(BackendCommand::FetchProfile(lookup))
            }
            Followup::Reload {
                conversation,
                epoch,
            } => {
                tracing::debug!("Reloading {}", conversation);
                self.backend.send(BackendCommand::LoadHistory {
                    conversation,
                    epoch,
                });
            }
        }
    }

    fn handle_response(&mut self, resp: BackendResponse) {
        let now = Instant::now();
        match resp {
            BackendResponse::History { epoch, result } => match result {
                Ok(entries) => {
                    let messages: Vec<_> = entries
                        .into_iter()
                        .map(|entry| {
                            self.directory
                                .note_sender(&entry.message.sender, &entry.hints);
                            entry.message
                        })
                        .collect();
                    let followups =
                        self.reconciler
                            .finish_loading(epoch, messages, &mut self.directory, now);
                    for followup in followups {
                        self.follow(followup);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to load history: {:#}", e);
                    self.reconciler.loading_failed(epoch);
                }
            },
            BackendResponse::Directory(dir) => {
                self.directory
                    .ingest_directory(&dir.users, &dir.students, &dir.staff);
            }
            BackendResponse::Profile { lookup, result } => {
                let patch = match result {
                    Ok(patch) => Some(patch),
                    Err(e) => {
                        tracing::warn!("Profile lookup for {} failed: {:#}", lookup.identity, e);
                        None
                    }
                };
                self.reconciler.complete_lookup(
                    lookup,
                    patch,
                    &mut self.directory,
                    &mut self.notifications,
                    now,
                );
            }
            BackendResponse::Sent { nonce, result } => match result {
                Ok(receipt) => match receipt.id {
                    Some(id) => {
                        self.reconciler.confirm_local(nonce, id, Some(receipt.body));
                    }
                    None => {
                        self.reconciler.update_local(nonce, receipt.body);
                    }
                },
                Err(e) => {
                    println!("Send failed: {:#}", e);
                    self.reconciler.fail_local(nonce);
                }
            },
            BackendResponse::Edited { id, result } => match result {
                Ok(delivery) => self.reconciler.edit_sent(id, delivery, now),
                Err(e) => {
                    println!("Edit of #{} failed: {:#}", id, e);
                    self.reconciler.rollback_edit(id);
                }
            },
            BackendResponse::Deleted {
                conversation,
                id,
                result,
            } => match result {
                Ok(delivery) => {
                    if !self.reconciler.delete_sent(conversation, id, delivery) {
                        tracing::debug!("Delete of #{} sent, waiting for the server", id);
                    }
                }
                Err(e) => println!("Delete of #{} failed: {:#}", id, e),
            },
            BackendResponse::StatusSet { status, result } => match result {
                Ok(()) => {
                    self.directory.apply_presence_event(self.me, status);
                    self.notifications.apply_local_status(status);
                    println!("Status set to {}", status);
                }
                Err(e) => println!("Could not set status: {:#}", e),
            },
        }
    }

    fn tick(&mut self) {
        let now = Instant::now();
        self.notifications.expire_toasts(now);
        self.reconciler.tick(now);
    }

    /// Print view changes and new toasts.
    fn render(&mut self) {
        let changes = self.reconciler.take_changes();
        if let Some(view) = self.reconciler.view() {
            let now = Instant::now();
            let highlighted = view.highlighted(now);
            let print = |seq: u64, prefix: &str| {
                if let Some(message) = view.by_seq(seq) {
                    let marked = highlighted.is_some() && highlighted == message.id;
                    println!(
                        "{}{}",
                        prefix,
                        render::format_message(message, &self.directory, marked)
                    );
                }
            };

            if changes.contains(&ViewChange::Reset) {
                println!("--- {} ---", self.label(view.conversation()));
                if view.messages().is_empty() {
                    println!("(no messages)");
                }
                for message in view.messages() {
                    print(message.seq, "");
                }
                self.shown_epoch = Some(view.epoch());
            } else if self.shown_epoch == Some(view.epoch()) {
                for change in changes {
                    match change {
                        ViewChange::Inserted(seq) => print(seq, ""),
                        ViewChange::Updated(seq) => print(seq, "~ "),
                        ViewChange::Removed(seq) => tracing::debug!("Entry {} removed", seq),
                        ViewChange::Reset => {}
                    }
                }
            }
        }

        let toasts = self.notifications.toasts();
        for (i, toast) in toasts.iter().enumerate() {
            if self.announced.insert(toast.id.clone()) {
                println!("* {}", render::format_toast(i + 1, toast));
            }
        }
        self.announced
            .retain(|id| toasts.iter().any(|t| &t.id == id));
    }
}
