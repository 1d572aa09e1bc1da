//! Line input for the interactive session.
//!
//! Plain lines are messages; lines starting with `/` are commands. A
//! leading `//` sends a message that starts with a slash.

use std::path::PathBuf;

use crate::models::{MessageId, PresenceStatus, Route};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send(String),
    Open(Route),
    Close,
    Attach(PathBuf),
    /// Remove a staged file by 1-based position.
    Unattach(usize),
    Files,
    Edit(MessageId, String),
    Delete(MessageId),
    Confirm,
    Cancel,
    Jump(Route, MessageId),
    Notifications,
    Read(Route),
    Clear(Route),
    Toasts,
    /// Open the conversation of a toast by 1-based position.
    OpenToast(usize),
    Dismiss(usize),
    Mute(bool),
    Status(PresenceStatus),
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  <text>                   send a message to the open conversation
  /open <route>            open a channel (5) or direct conversation (dm_1_2, dm_7)
  /close                   close the open conversation
  /attach <path>           stage a file for the next message
  /remove <n>              unstage file n
  /files                   list staged files
  /edit <id> <text>        edit a message
  /delete <id>             delete a message (asks for /confirm)
  /confirm, /cancel        answer a pending delete
  /jump <route> <id>       open a conversation at a message
  /notifications           list unread conversations
  /read <route>            mark a conversation read
  /clear <route>           drop a conversation's notification
  /toasts                  list visible toasts
  /toast <n>               open toast n
  /dismiss <n>             dismiss toast n
  /mute on|off             mute or unmute toasts
  /status <status>         online, away, dnd, invisible, offline
  /help, /quit";

fn route(arg: &str) -> Result<Route, String> {
    let arg = arg.trim();
    if arg.is_empty() {
        return Err("missing conversation".to_string());
    }
    arg.parse()
}

fn message_id(arg: &str) -> Result<MessageId, String> {
    arg.trim()
        .parse()
        .map(MessageId)
        .map_err(|_| format!("invalid message id: {:?}", arg.trim()))
}

fn position(arg: &str) -> Result<usize, String> {
    match arg.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("expected a position starting at 1, got {:?}", arg.trim())),
    }
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    if line.trim().is_empty() {
        return Ok(None);
    }
    if let Some(escaped) = line.strip_prefix("//") {
        return Ok(Some(Input::Send(format!("/{}", escaped))));
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(Input::Send(line.to_string())));
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .unwrap_or((command, ""));
    let rest = rest.trim();

    let input = match name {
        "open" | "o" => Input::Open(route(rest)?),
        "close" => Input::Close,
        "attach" | "a" => {
            if rest.is_empty() {
                return Err("missing file path".to_string());
            }
            Input::Attach(PathBuf::from(rest))
        }
        "remove" => Input::Unattach(position(rest)?),
        "files" => Input::Files,
        "edit" | "e" => {
            let (id, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let text = text.trim();
            if text.is_empty() {
                return Err("usage: /edit <id> <text>".to_string());
            }
            Input::Edit(message_id(id)?, text.to_string())
        }
        "delete" | "d" => Input::Delete(message_id(rest)?),
        "confirm" | "y" => Input::Confirm,
        "cancel" | "n" => Input::Cancel,
        "jump" | "j" => {
            let (conv, id) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: /jump <route> <id>".to_string())?;
            Input::Jump(route(conv)?, message_id(id)?)
        }
        "notifications" | "inbox" => Input::Notifications,
        "read" => Input::Read(route(rest)?),
        "clear" => Input::Clear(route(rest)?),
        "toasts" => Input::Toasts,
        "toast" => Input::OpenToast(position(rest)?),
        "dismiss" => Input::Dismiss(position(rest)?),
        "mute" => match rest {
            "" | "on" => Input::Mute(true),
            "off" => Input::Mute(false),
            other => return Err(format!("expected on or off, got {:?}", other)),
        },
        "unmute" => Input::Mute(false),
        "status" => Input::Status(rest.parse()?),
        "help" | "h" | "?" => Input::Help,
        "quit" | "q" | "exit" => Input::Quit,
        other => return Err(format!("unknown command /{} (try /help)", other)),
    };
    Ok(Some(input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConversationId;

    #[test]
    fn test_plain_text_and_escape() {
        assert_eq!(parse("hello").unwrap(), Some(Input::Send("hello".into())));
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(
            parse("//shrug").unwrap(),
            Some(Input::Send("/shrug".into()))
        );
    }

    #[test]
    fn test_open_routes() {
        assert_eq!(
            parse("/open 5").unwrap(),
            Some(Input::Open(Route::Conversation(ConversationId::Channel(5))))
        );
        assert_eq!(
            parse("/open dm_2_1").unwrap(),
            Some(Input::Open(Route::Conversation(ConversationId::direct(1, 2))))
        );
        assert!(parse("/open").is_err());
    }

    #[test]
    fn test_edit_delete_jump() {
        assert_eq!(
            parse("/edit 12 fixed the typo").unwrap(),
            Some(Input::Edit(MessageId(12), "fixed the typo".into()))
        );
        assert!(parse("/edit 12").is_err());
        assert!(parse("/edit x new").is_err());
        assert_eq!(parse("/delete 4").unwrap(), Some(Input::Delete(MessageId(4))));
        assert_eq!(
            parse("/jump 5 40").unwrap(),
            Some(Input::Jump(
                Route::Conversation(ConversationId::Channel(5)),
                MessageId(40)
            ))
        );
    }

    #[test]
    fn test_mute_status_and_positions() {
        assert_eq!(parse("/mute").unwrap(), Some(Input::Mute(true)));
        assert_eq!(parse("/mute off").unwrap(), Some(Input::Mute(false)));
        assert!(parse("/mute maybe").is_err());
        assert_eq!(
            parse("/status dnd").unwrap(),
            Some(Input::Status(PresenceStatus::DoNotDisturb))
        );
        assert!(parse("/status asleep").is_err());
        assert_eq!(parse("/remove 2").unwrap(), Some(Input::Unattach(2)));
        assert!(parse("/remove 0").is_err());
        assert!(parse("/frobnicate").is_err());
    }
}
