//! User document schema
//!
//! A user owns an ordered list of platform connections, a set of role
//! references and an editor-grant table.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::auth::EditorPermission;
use crate::db::mongo::IntoIndexes;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UserDoc {
    /// Stable identifier, never changes after creation
    #[serde(rename = "_id")]
    pub id: ObjectId,

    /// Login name (lowercase, unique)
    pub username: String,

    /// Name shown to other users
    #[serde(default)]
    pub display_name: String,

    /// Roles held by this user
    #[serde(default)]
    pub role_ids: Vec<ObjectId>,

    /// Linked platform accounts, in link order
    #[serde(default)]
    pub connections: Vec<UserConnection>,

    /// Users allowed to act on this user's behalf
    #[serde(default)]
    pub editors: Vec<UserEditor>,
}

impl UserDoc {
    pub fn new(username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            id: ObjectId::new(),
            display_name: username.clone(),
            username,
            role_ids: Vec::new(),
            connections: Vec::new(),
            editors: Vec::new(),
        }
    }

    /// Find a connection by id, returning it with its index
    pub fn connection(&self, id: &str) -> Option<(usize, &UserConnection)> {
        self.connections
            .iter()
            .enumerate()
            .find(|(_, c)| c.id == id)
    }

    /// Find the editor grant held by `editor_id`
    pub fn editor(&self, editor_id: ObjectId) -> Option<&UserEditor> {
        self.editors.iter().find(|e| e.id == editor_id)
    }

    pub fn has_role(&self, role_id: ObjectId) -> bool {
        self.role_ids.contains(&role_id)
    }
}

/// Platform a connection was linked from
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionPlatform {
    Twitch,
    Youtube,
    Discord,
    Kick,
}

/// A linked platform account nested in a user
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UserConnection {
    /// Platform-side account id, unique within the parent user
    pub id: String,

    pub platform: ConnectionPlatform,

    /// Platform-side account name
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_at: Option<DateTime>,

    /// Emote set active on this connection's channel
    #[serde(default)]
    pub emote_set_id: Option<ObjectId>,
}

impl UserConnection {
    pub fn new(id: impl Into<String>, platform: ConnectionPlatform) -> Self {
        Self {
            id: id.into(),
            platform,
            username: String::new(),
            display_name: String::new(),
            linked_at: Some(DateTime::now()),
            emote_set_id: None,
        }
    }
}

/// Editor grant: `id` may act on this user within `permissions`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UserEditor {
    pub id: ObjectId,

    pub permissions: EditorPermission,

    #[serde(default = "default_true")]
    pub visible: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime>,
}

fn default_true() -> bool {
    true
}

impl UserEditor {
    pub fn new(id: ObjectId, permissions: EditorPermission) -> Self {
        Self {
            id,
            permissions,
            visible: true,
            added_at: Some(DateTime::now()),
        }
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "username": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("username_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "connections.id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("connections_id_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "editors.id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("editors_id_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}
