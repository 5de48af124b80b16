//! Database schemas for Chisel
//!
//! Defines MongoDB document structures for users, emote sets, and roles.

mod emote_set;
mod role;
mod user;

pub use emote_set::{ActiveEmote, EmoteSetDoc, EMOTE_SET_COLLECTION};
pub use role::{RoleDoc, ROLE_COLLECTION};
pub use user::{ConnectionPlatform, UserConnection, UserDoc, UserEditor, USER_COLLECTION};
