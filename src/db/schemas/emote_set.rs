//! Emote set document schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;

/// Collection name for emote sets
pub const EMOTE_SET_COLLECTION: &str = "emote_sets";

/// Emote set document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EmoteSetDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub name: String,

    /// User that owns this set
    pub owner_id: ObjectId,

    #[serde(default)]
    pub capacity: i32,

    /// Emote bindings. Can be large; never included in change events.
    #[serde(default)]
    pub emotes: Vec<ActiveEmote>,
}

impl EmoteSetDoc {
    pub fn new(name: impl Into<String>, owner_id: ObjectId) -> Self {
        Self {
            id: ObjectId::new(),
            name: name.into(),
            owner_id,
            capacity: 1000,
            emotes: Vec::new(),
        }
    }
}

/// An emote bound into a set under a (possibly aliased) name
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActiveEmote {
    pub id: ObjectId,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<ObjectId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime>,
}

impl IntoIndexes for EmoteSetDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "owner_id": 1 },
            Some(
                IndexOptions::builder()
                    .name("owner_id_index".to_string())
                    .build(),
            ),
        )]
    }
}
