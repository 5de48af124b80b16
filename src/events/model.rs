//! Public projections of stored documents
//!
//! Change records carry these instead of raw documents: identifiers are hex
//! strings, timestamps are unix milliseconds, and internal fields are left out.

use serde::{Deserialize, Serialize};

use crate::auth::Actor;
use crate::db::schemas::{ActiveEmote, ConnectionPlatform, EmoteSetDoc, UserConnection, UserDoc};

/// Kind of object a change record describes
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectKind {
    User,
    EmoteSet,
}

/// Minimal user reference (the acting user of a change)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UserPartialModel {
    pub id: String,
    pub username: String,
    pub display_name: String,
}

impl From<&Actor> for UserPartialModel {
    fn from(actor: &Actor) -> Self {
        Self {
            id: actor.id.to_hex(),
            username: actor.username.clone(),
            display_name: actor.display_name.clone(),
        }
    }
}

impl From<&UserDoc> for UserPartialModel {
    fn from(user: &UserDoc) -> Self {
        Self {
            id: user.id.to_hex(),
            username: user.username.clone(),
            display_name: user.display_name.clone(),
        }
    }
}

/// Full user projection
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UserModel {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub role_ids: Vec<String>,
    pub connections: Vec<UserConnectionModel>,
}

impl From<&UserDoc> for UserModel {
    fn from(user: &UserDoc) -> Self {
        Self {
            id: user.id.to_hex(),
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            role_ids: user.role_ids.iter().map(|id| id.to_hex()).collect(),
            connections: user
                .connections
                .iter()
                .map(UserConnectionModel::from)
                .collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UserConnectionModel {
    pub id: String,
    pub platform: ConnectionPlatform,
    pub username: String,
    pub display_name: String,
    pub linked_at: Option<i64>,
    pub emote_set_id: Option<String>,
    /// Resolved set, only attached where the caller loaded it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emote_set: Option<EmoteSetModel>,
}

impl UserConnectionModel {
    pub fn with_emote_set(mut self, set: Option<&EmoteSetDoc>) -> Self {
        self.emote_set = set.map(|s| EmoteSetModel::from(s).redacted());
        self
    }
}

impl From<&UserConnection> for UserConnectionModel {
    fn from(conn: &UserConnection) -> Self {
        Self {
            id: conn.id.clone(),
            platform: conn.platform,
            username: conn.username.clone(),
            display_name: conn.display_name.clone(),
            linked_at: conn.linked_at.map(|t| t.timestamp_millis()),
            emote_set_id: conn.emote_set_id.map(|id| id.to_hex()),
            emote_set: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EmoteSetModel {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub capacity: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotes: Option<Vec<ActiveEmoteModel>>,
}

impl EmoteSetModel {
    /// Drop the emote list
    pub fn redacted(mut self) -> Self {
        self.emotes = None;
        self
    }
}

impl From<&EmoteSetDoc> for EmoteSetModel {
    fn from(set: &EmoteSetDoc) -> Self {
        Self {
            id: set.id.to_hex(),
            name: set.name.clone(),
            owner_id: set.owner_id.to_hex(),
            capacity: set.capacity,
            emotes: Some(set.emotes.iter().map(ActiveEmoteModel::from).collect()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActiveEmoteModel {
    pub id: String,
    pub name: String,
    pub actor_id: Option<String>,
}

impl From<&ActiveEmote> for ActiveEmoteModel {
    fn from(emote: &ActiveEmote) -> Self {
        Self {
            id: emote.id.to_hex(),
            name: emote.name.clone(),
            actor_id: emote.actor_id.map(|id| id.to_hex()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;

    #[test]
    fn test_connection_model_keeps_unset_set_as_null() {
        let conn = UserConnection::new("tw", ConnectionPlatform::Twitch);
        let value = serde_json::to_value(UserConnectionModel::from(&conn)).unwrap();
        assert!(value["emote_set_id"].is_null());
        assert!(value.get("emote_set").is_none());
    }

    #[test]
    fn test_attached_set_is_redacted() {
        let mut set = EmoteSetDoc::new("main", ObjectId::new());
        set.emotes.push(ActiveEmote {
            id: ObjectId::new(),
            name: "PogChamp".into(),
            actor_id: None,
            timestamp: None,
        });
        let conn = UserConnection::new("tw", ConnectionPlatform::Twitch);
        let model = UserConnectionModel::from(&conn).with_emote_set(Some(&set));

        let attached = model.emote_set.unwrap();
        assert_eq!(attached.id, set.id.to_hex());
        assert!(attached.emotes.is_none());
    }
}
