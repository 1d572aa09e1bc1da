//! Data models for GroupTech entities

mod conversation;
mod message;
mod record;
mod user;

pub use conversation::*;
pub use message::*;
pub use record::*;
pub use user::*;
