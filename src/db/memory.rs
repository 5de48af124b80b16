//! In-process entity store
//!
//! Keeps users as raw BSON documents so conditional updates go through the
//! same path engine and equality-filter semantics as the MongoDB store.

use bson::{oid::ObjectId, Document};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::db::schemas::{EmoteSetDoc, RoleDoc, UserDoc};
use crate::db::store::EntityStore;
use crate::mutate::update::matches_filter;
use crate::mutate::UpdateDescription;
use crate::types::Result;

/// Memory-backed entity store
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<ObjectId, Document>>,
    emote_sets: RwLock<HashMap<ObjectId, EmoteSetDoc>>,
    roles: RwLock<HashMap<ObjectId, RoleDoc>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user
    pub async fn insert_user(&self, user: &UserDoc) -> Result<()> {
        let doc = bson::to_document(user)?;
        self.users.write().await.insert(user.id, doc);
        Ok(())
    }

    pub async fn insert_emote_set(&self, set: EmoteSetDoc) {
        self.emote_sets.write().await.insert(set.id, set);
    }

    pub async fn insert_role(&self, role: RoleDoc) {
        self.roles.write().await.insert(role.id, role);
    }

    /// Number of conditional updates that matched and were written
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EntityStore for MemoryStore {
    async fn find_user(&self, id: ObjectId) -> Result<Option<UserDoc>> {
        match self.users.read().await.get(&id) {
            Some(doc) => Ok(Some(bson::from_document(doc.clone())?)),
            None => Ok(None),
        }
    }

    async fn find_emote_set(&self, id: ObjectId) -> Result<Option<EmoteSetDoc>> {
        Ok(self.emote_sets.read().await.get(&id).cloned())
    }

    async fn find_roles(&self, ids: &[ObjectId]) -> Result<Vec<RoleDoc>> {
        let roles = self.roles.read().await;
        Ok(ids.iter().filter_map(|id| roles.get(id).cloned()).collect())
    }

    async fn find_one_and_update_user(
        &self,
        filter: Document,
        update: &UpdateDescription,
    ) -> Result<Option<UserDoc>> {
        let mut users = self.users.write().await;

        let Some(stored) = users.values_mut().find(|doc| matches_filter(doc, &filter)) else {
            debug!(?filter, "no user matched conditional update");
            return Ok(None);
        };

        let mut next = stored.clone();
        update.apply_to(&mut next)?;
        let user: UserDoc = bson::from_document(next.clone())?;

        *stored = next;
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(Some(user))
    }
}
