//! Store boundary
//!
//! One conditional "update and return the post-image" write per mutation, plus
//! the point reads the mutation paths need.

use bson::{oid::ObjectId, Document};

use crate::db::schemas::{EmoteSetDoc, RoleDoc, UserDoc};
use crate::mutate::UpdateDescription;
use crate::types::Result;

/// Storage backend for entities the mutation core reads and writes
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    /// Load a user by id
    async fn find_user(&self, id: ObjectId) -> Result<Option<UserDoc>>;

    /// Load an emote set by id
    async fn find_emote_set(&self, id: ObjectId) -> Result<Option<EmoteSetDoc>>;

    /// Load every role whose id is in `ids`; unknown ids are skipped
    async fn find_roles(&self, ids: &[ObjectId]) -> Result<Vec<RoleDoc>>;

    /// Atomically apply `update` to the single user matching the equality
    /// `filter` and return the post-image. `Ok(None)` means nothing matched
    /// and nothing was written.
    async fn find_one_and_update_user(
        &self,
        filter: Document,
        update: &UpdateDescription,
    ) -> Result<Option<UserDoc>>;
}
