//! Conversation addressing: channels and direct-message pairs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reserved prefix that marks a direct-message key in textual ids.
pub const DIRECT_PREFIX: &str = "dm_";

/// Direct-message key for a pair of participants.
///
/// The pair is stored sorted, so `DirectKey::new(a, b) == DirectKey::new(b, a)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirectKey {
    low: u64,
    high: u64,
}

impl DirectKey {
    pub fn new(a: u64, b: u64) -> Self {
        Self {
            low: a.min(b),
            high: a.max(b),
        }
    }

    /// The participant that is not `me`, if `me` is part of this pair.
    pub fn peer_of(&self, me: u64) -> Option<u64> {
        if self.low == me {
            Some(self.high)
        } else if self.high == me {
            Some(self.low)
        } else {
            None
        }
    }

    pub fn participants(&self) -> (u64, u64) {
        (self.low, self.high)
    }
}

/// Canonical identifier of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConversationId {
    Channel(u64),
    Direct(DirectKey),
}

impl ConversationId {
    pub fn direct(a: u64, b: u64) -> Self {
        Self::Direct(DirectKey::new(a, b))
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct(_))
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(id) => write!(f, "{}", id),
            Self::Direct(key) => write!(f, "{}{}_{}", DIRECT_PREFIX, key.low, key.high),
        }
    }
}

impl FromStr for ConversationId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Route::from_str(s)? {
            Route::Conversation(id) => Ok(id),
            Route::DirectWith(peer) => Err(format!(
                "'{}' names only one participant (dm_{}); a conversation id needs both",
                s, peer
            )),
        }
    }
}

impl TryFrom<String> for ConversationId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.to_string()
    }
}

/// Navigation target as typed by a user or carried by a notification click.
///
/// `dm_<a>_<b>` is a full direct key, `dm_<peer>` is a direct conversation
/// between the local user and `peer`, and a bare number is a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Conversation(ConversationId),
    DirectWith(u64),
}

impl Route {
    /// Resolve to a conversation id, given the local user's unified id.
    pub fn resolve(self, me: Option<u64>) -> Option<ConversationId> {
        match self {
            Route::Conversation(id) => Some(id),
            Route::DirectWith(peer) => me.map(|me| ConversationId::direct(me, peer)),
        }
    }
}

impl FromStr for Route {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse_id = |part: &str| {
            part.parse::<u64>()
                .map_err(|_| format!("Invalid conversation id: '{}'", s))
        };

        match s.strip_prefix(DIRECT_PREFIX) {
            Some(rest) => match rest.split_once('_') {
                Some((a, b)) => Ok(Route::Conversation(ConversationId::direct(
                    parse_id(a)?,
                    parse_id(b)?,
                ))),
                None => Ok(Route::DirectWith(parse_id(rest)?)),
            },
            None => Ok(Route::Conversation(ConversationId::Channel(parse_id(s)?))),
        }
    }
}
