//! Caller-facing mutation entry points

pub mod user;

pub use user::{ConnectionUpdate, ListItemAction, UserOps};
