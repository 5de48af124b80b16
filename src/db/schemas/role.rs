//! Role document schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::auth::RolePermission;
use crate::db::mongo::IntoIndexes;

/// Collection name for roles
pub const ROLE_COLLECTION: &str = "roles";

/// Named permission bitset referenced by users
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RoleDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub name: String,

    /// Higher positions outrank lower ones
    #[serde(default)]
    pub position: i32,

    #[serde(default)]
    pub allowed: RolePermission,

    #[serde(default)]
    pub denied: RolePermission,
}

impl RoleDoc {
    pub fn new(name: impl Into<String>, position: i32, allowed: RolePermission) -> Self {
        Self {
            id: ObjectId::new(),
            name: name.into(),
            position,
            allowed,
            denied: RolePermission::NONE,
        }
    }
}

impl IntoIndexes for RoleDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "position": -1 },
            Some(
                IndexOptions::builder()
                    .name("position_index".to_string())
                    .build(),
            ),
        )]
    }
}
